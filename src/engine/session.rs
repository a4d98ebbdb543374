//! Session orchestrator.
//!
//! Fans out one `MarketMonitor` per eligible market, runs them all
//! concurrently on the tokio runtime, joins them and sends the summary.
//! A monitor that fails or exits early never cancels its siblings.

use chrono::Local;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::alerts::{completion_message, market_setup_message, Notifier};
use crate::engine::monitor::{
    MarketMonitor, MonitorContext, MonitorExit, MonitorOutcome, MonitorSettings,
};
use crate::platforms::GatewayProvider;
use crate::storage::BetLogStore;
use crate::strategy::bands::BandCatalog;
use crate::types::Market;

/// Summary of one session.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// Markets handed to monitors.
    pub markets: usize,
    /// Outcomes of the monitors that ran to completion.
    pub outcomes: Vec<MonitorOutcome>,
    /// Monitor tasks that panicked and produced no outcome.
    pub aborted: usize,
}

impl SessionReport {
    pub fn bets_placed(&self) -> usize {
        self.outcomes.iter().map(|o| o.bets.len()).sum()
    }

    /// Monitors that ended on an error, including aborted tasks.
    pub fn failed_monitors(&self) -> usize {
        self.outcomes.iter().filter(|o| o.exit.is_failure()).count() + self.aborted
    }

    pub fn count_exits(&self, pred: impl Fn(&MonitorExit) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.exit)).count()
    }
}

/// Runs every market of a session against a shared catalog and log.
pub struct Session {
    provider: Arc<dyn GatewayProvider>,
    ctx: Arc<MonitorContext>,
}

impl Session {
    pub fn new(
        provider: Arc<dyn GatewayProvider>,
        catalog: Arc<BandCatalog>,
        store: Arc<BetLogStore>,
        notifier: Arc<dyn Notifier>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            provider,
            ctx: Arc::new(MonitorContext {
                catalog,
                store,
                notifier,
                settings,
            }),
        }
    }

    /// Monitor every market until each reaches `Done`, then send the
    /// completion notification.
    pub async fn run(&self, markets: Vec<Market>) -> SessionReport {
        let total = markets.len();
        info!(
            markets = total,
            provider = self.provider.name(),
            dry_run = self.ctx.settings.dry_run,
            "Starting session"
        );

        // Monitors start before the set-up notices so a slow sink never
        // delays a market.
        let handles: Vec<_> = markets
            .iter()
            .cloned()
            .map(|market| {
                let provider = Arc::clone(&self.provider);
                let ctx = Arc::clone(&self.ctx);
                tokio::spawn(monitor_market(provider, ctx, market))
            })
            .collect();

        self.announce(&markets).await;

        let mut report = SessionReport {
            markets: total,
            ..SessionReport::default()
        };
        for joined in join_all(handles).await {
            match joined {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    error!(error = %e, "Market monitor task aborted");
                    report.aborted += 1;
                }
            }
        }

        self.ctx
            .notifier
            .send(&completion_message(
                report.markets,
                report.bets_placed(),
                report.failed_monitors(),
                Local::now(),
            ))
            .await;

        info!(
            markets = report.markets,
            bets = report.bets_placed(),
            failed = report.failed_monitors(),
            closed = report.count_exits(|e| *e == MonitorExit::MarketClosed),
            timed_out = report.count_exits(|e| *e == MonitorExit::InPlayTimeout),
            "All markets processed"
        );
        report
    }

    /// One set-up notification per track, in first-seen order.
    async fn announce(&self, markets: &[Market]) {
        let mut tracks: Vec<(&str, usize)> = Vec::new();
        for market in markets {
            match tracks.iter_mut().find(|(track, _)| *track == market.track) {
                Some((_, races)) => *races += 1,
                None => tracks.push((market.track.as_str(), 1)),
            }
        }

        for (track, races) in tracks {
            info!(track, races, "Markets set up");
            self.ctx
                .notifier
                .send(&market_setup_message(track, races, Local::now()))
                .await;
        }
    }
}

async fn monitor_market(
    provider: Arc<dyn GatewayProvider>,
    ctx: Arc<MonitorContext>,
    market: Market,
) -> MonitorOutcome {
    match provider.open_session() {
        Ok(gateway) => MarketMonitor::new(market, gateway, ctx).run().await,
        Err(e) => {
            warn!(market = %market, error = %e, "Failed to open gateway session");
            MonitorOutcome {
                market,
                exit: MonitorExit::OpenFailed(format!("{e:#}")),
                bets: Vec::new(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
