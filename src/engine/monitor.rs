//! Per-market monitor.
//!
//! Drives one race market through its lifecycle:
//!
//! ```text
//! Idle → MarketOpening → MarketOpen → WaitingInPlay → PricesFetched
//!      → Evaluating → Settling → Done
//! ```
//!
//! with early exits to `Done` when the market cannot be opened or is
//! already closed. Every gateway error is contained here: a failing
//! market ends its own monitor and nothing else.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::alerts::{bet_placed_message, Notifier};
use crate::config::MonitorConfig;
use crate::platforms::MarketGateway;
use crate::storage::{BetLedger, BetLogStore};
use crate::strategy::bands::{BandCatalog, PriceBand};
use crate::strategy::{find_matches, BandMatch};
use crate::types::{
    BetRecord, BetSide, DepthSelection, Market, OddsBandError, OrderRequest, PriceQuote,
};

/// Stake on every order.
pub const STAKE: Decimal = dec!(0.05);

/// Back at the minimum odds so the order matches immediately at
/// whatever price is on offer.
pub const TAKE_PRICE: Decimal = dec!(1.01);

// ---------------------------------------------------------------------------
// State & outcome
// ---------------------------------------------------------------------------

/// Lifecycle state of a `MarketMonitor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    MarketOpening,
    MarketOpen,
    WaitingInPlay,
    PricesFetched,
    Evaluating,
    Settling,
    Done,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a monitor reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    /// Full lifecycle completed (possibly with zero bets).
    Settled,
    /// Market reported closed straight after opening.
    MarketClosed,
    /// Gateway refused to open the market.
    OpenFailed(String),
    /// The configured in-play deadline passed.
    InPlayTimeout,
    /// A gateway read failed mid-lifecycle.
    Failed(String),
}

impl MonitorExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, MonitorExit::OpenFailed(_) | MonitorExit::Failed(_))
    }
}

/// Result of one monitor run.
#[derive(Debug, Clone)]
pub struct MonitorOutcome {
    pub market: Market,
    pub exit: MonitorExit,
    pub bets: Vec<BetRecord>,
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Timing and execution settings for a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    /// `None` waits for in-play indefinitely.
    pub in_play_timeout: Option<Duration>,
    pub dry_run: bool,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            settle_delay: cfg.settle_delay(),
            poll_interval: cfg.poll_interval(),
            in_play_timeout: cfg.in_play_timeout(),
            dry_run: cfg.dry_run,
        }
    }
}

/// Read-only collaborators shared by every monitor in a session.
pub struct MonitorContext {
    pub catalog: Arc<BandCatalog>,
    pub store: Arc<BetLogStore>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: MonitorSettings,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// State machine for a single market. Owns its gateway session and
/// its bet ledger; shares everything else read-only.
pub struct MarketMonitor {
    market: Market,
    gateway: Box<dyn MarketGateway>,
    ctx: Arc<MonitorContext>,
    ledger: BetLedger,
    state: MonitorState,
}

impl MarketMonitor {
    pub fn new(market: Market, gateway: Box<dyn MarketGateway>, ctx: Arc<MonitorContext>) -> Self {
        Self {
            market,
            gateway,
            ctx,
            ledger: BetLedger::new(),
            state: MonitorState::Idle,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Run the market to completion.
    pub async fn run(self) -> MonitorOutcome {
        let span = info_span!(
            "market",
            track = %self.market.track,
            race = %self.market.name,
            market_id = %self.market.event_id,
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> MonitorOutcome {
        info!(start = %self.market.start_time, "--- Monitoring race ---");

        self.transition(MonitorState::MarketOpening);
        if let Err(e) = self.gateway.open_market(&self.market).await {
            warn!(error = %e, "Error opening market");
            self.transition(MonitorState::Done);
            return self.finish(MonitorExit::OpenFailed(format!("{e:#}")), Vec::new());
        }

        tokio::time::sleep(self.ctx.settings.settle_delay).await;
        self.transition(MonitorState::MarketOpen);
        info!("Market opened");

        let exit = match self.drive().await {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %format!("{e:#}"), state = %self.state, "Market monitor failed");
                MonitorExit::Failed(format!("{e:#}"))
            }
        };

        // Bets already placed are always persisted, even after a failure.
        let bets = if exit == MonitorExit::Settled || !self.ledger.is_empty() {
            self.settle().await
        } else {
            Vec::new()
        };

        self.transition(MonitorState::Done);
        info!(exit = ?exit, bets = bets.len(), "--- Finished monitoring race ---");
        self.finish(exit, bets)
    }

    /// MarketOpen through Evaluating.
    async fn drive(&mut self) -> Result<MonitorExit> {
        debug!("Checking to see if market is closed");
        let quotes = self
            .gateway
            .live_prices()
            .await
            .context("Failed to read market status")?;
        if self.market_flags(&quotes)?.closed {
            info!("Market is closed");
            return Ok(MonitorExit::MarketClosed);
        }

        self.transition(MonitorState::WaitingInPlay);
        if !self.wait_for_in_play().await? {
            return Ok(MonitorExit::InPlayTimeout);
        }
        info!("Market is in-play");

        let depth = self
            .gateway
            .market_depth(true)
            .await
            .context("Failed to fetch market depth")?;
        let quotes = self
            .gateway
            .live_prices()
            .await
            .context("Failed to fetch selection prices")?;
        self.transition(MonitorState::PricesFetched);
        let liquidity: Decimal = depth.iter().map(DepthSelection::total_available).sum();
        info!(runners = depth.len(), liquidity = %liquidity, "Retrieved prices");

        self.transition(MonitorState::Evaluating);
        let catalog = Arc::clone(&self.ctx.catalog);
        match catalog.bands_for(&self.market.track) {
            Some(bands) => {
                let tokens: Vec<&str> = bands.iter().map(|b| b.token.as_str()).collect();
                info!(bands = %tokens.join(", "), "Positive SP bands found");
                self.evaluate(&depth, &quotes, bands).await;
            }
            None => info!("No positive SP bands for track"),
        }

        Ok(MonitorExit::Settled)
    }

    /// Poll until the market turns in-play. Returns `false` if the
    /// configured deadline passes first.
    async fn wait_for_in_play(&self) -> Result<bool> {
        info!("Waiting for market to go in-play");
        let started = Instant::now();

        loop {
            let quotes = self
                .gateway
                .live_prices()
                .await
                .context("Failed to poll in-play status")?;
            if self.market_flags(&quotes)?.in_play {
                return Ok(true);
            }

            if let Some(limit) = self.ctx.settings.in_play_timeout {
                if started.elapsed() >= limit {
                    let err = OddsBandError::InPlayTimeout {
                        market: self.market.event_id.clone(),
                        waited_secs: limit.as_secs(),
                    };
                    warn!(error = %err, "Giving up on market");
                    return Ok(false);
                }
            }

            tokio::time::sleep(self.ctx.settings.poll_interval).await;
        }
    }

    /// Market-level flags, read from the first runner's quote.
    fn market_flags(&self, quotes: &[PriceQuote]) -> Result<MarketFlags> {
        let first = quotes
            .first()
            .ok_or_else(|| OddsBandError::NoPriceData(self.market.event_id.clone()))?;
        Ok(MarketFlags {
            closed: first.closed,
            in_play: first.in_play,
        })
    }

    async fn evaluate(
        &mut self,
        depth: &[DepthSelection],
        quotes: &[PriceQuote],
        bands: &[PriceBand],
    ) {
        let matches = find_matches(depth, quotes, bands);
        info!(matches = matches.len(), "Evaluated odds against bands");

        for band_match in matches {
            self.place_bet(band_match).await;
        }
    }

    /// Place one bet and record it. Gateway rejections are recorded with
    /// an empty reference and never stop the evaluation.
    async fn place_bet(&mut self, m: BandMatch) {
        info!(
            selection = %m.selection_name,
            sp = %m.price,
            band = %m.band,
            "Placing bet"
        );

        let reference = if self.ctx.settings.dry_run {
            let reference = format!("dry-run-{}", uuid::Uuid::new_v4());
            info!(reference = %reference, "[DRY RUN] Would place bet");
            reference
        } else {
            let order = OrderRequest {
                entrant_index: m.entrant_index,
                selection_id: m.selection_id,
                side: BetSide::Back,
                price: TAKE_PRICE,
                stake: STAKE,
            };
            match self.gateway.place_order(&order).await {
                Ok(reference) => reference,
                Err(e) => {
                    warn!(selection = %m.selection_name, error = %e, "Bet rejected by gateway");
                    String::new()
                }
            }
        };

        let bet = BetRecord {
            track: self.market.track.clone(),
            odds_band: m.band.token,
            selection_name: m.selection_name,
            bet_price: m.price,
            timestamp: Utc::now(),
            bet_reference: reference,
        };
        if bet.is_confirmed() {
            info!(selection = %bet.selection_name, reference = %bet.bet_reference, "Bet placed");
        } else {
            warn!(selection = %bet.selection_name, "Bet recorded without a reference");
        }
        self.ledger.add(bet);
    }

    /// Flush the ledger to disk, then notify each bet.
    async fn settle(&mut self) -> Vec<BetRecord> {
        self.transition(MonitorState::Settling);

        let mut ledger = std::mem::take(&mut self.ledger);
        let store = Arc::clone(&self.ctx.store);
        let records = tokio::task::spawn_blocking(move || ledger.flush_and_clear(&store))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Bet log writer task failed");
                Vec::new()
            });

        for bet in &records {
            self.ctx.notifier.send(&bet_placed_message(bet)).await;
        }
        if !records.is_empty() {
            info!(count = records.len(), "Bet notifications sent");
        }

        debug!("Cleared in-memory bet ledger");
        records
    }

    fn transition(&mut self, next: MonitorState) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    fn finish(self, exit: MonitorExit, bets: Vec<BetRecord>) -> MonitorOutcome {
        MonitorOutcome {
            market: self.market,
            exit,
            bets,
        }
    }
}

struct MarketFlags {
    closed: bool,
    in_play: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
