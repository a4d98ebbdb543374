//! In-memory exchange used by the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use oddsband::engine::MonitorSettings;
use oddsband::platforms::{GatewayProvider, MarketGateway};
use oddsband::types::{DepthSelection, Market, OrderRequest, PriceQuote};

/// Scripted behaviour of one market on the fake exchange.
#[derive(Debug, Clone)]
pub struct FakeMarket {
    /// Runners as (selection id, name, SP).
    pub runners: Vec<(u64, String, Decimal)>,
    /// Polls answered pre-play before turning in-play. `None` never turns.
    pub pre_play_polls: Option<usize>,
    pub closed: bool,
    pub open_error: Option<String>,
}

impl FakeMarket {
    pub fn racing(runners: &[(u64, &str, Decimal)]) -> Self {
        Self {
            runners: runners
                .iter()
                .map(|(id, name, sp)| (*id, name.to_string(), *sp))
                .collect(),
            pre_play_polls: Some(1),
            closed: false,
            open_error: None,
        }
    }

    pub fn never_in_play(mut self) -> Self {
        self.pre_play_polls = None;
        self
    }

    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    pub fn unknown(mut self, reason: &str) -> Self {
        self.open_error = Some(reason.to_string());
        self
    }
}

/// Orders received by the fake exchange, keyed by market id.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub market_id: String,
    pub order: OrderRequest,
}

#[derive(Default)]
pub struct FakeExchange {
    markets: HashMap<String, FakeMarket>,
    orders: Mutex<Vec<PlacedOrder>>,
    depth_reads: AtomicUsize,
    sessions: AtomicUsize,
}

impl FakeExchange {
    pub fn new(markets: Vec<(&str, FakeMarket)>) -> Arc<Self> {
        Arc::new(Self {
            markets: markets
                .into_iter()
                .map(|(id, m)| (id.to_string(), m))
                .collect(),
            ..Self::default()
        })
    }

    pub fn orders(&self) -> Vec<PlacedOrder> {
        self.orders.lock().unwrap().clone()
    }

    pub fn depth_reads(&self) -> usize {
        self.depth_reads.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

/// Provider handing out one `FakeSession` per monitor.
pub struct FakeProvider(pub Arc<FakeExchange>);

impl GatewayProvider for FakeProvider {
    fn open_session(&self) -> Result<Box<dyn MarketGateway>> {
        self.0.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            exchange: Arc::clone(&self.0),
            market_id: None,
            polls: AtomicUsize::new(0),
            next_ref: AtomicUsize::new(1),
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

pub struct FakeSession {
    exchange: Arc<FakeExchange>,
    market_id: Option<String>,
    polls: AtomicUsize,
    next_ref: AtomicUsize,
}

impl FakeSession {
    fn market(&self) -> Result<(&str, &FakeMarket)> {
        let Some(id) = self.market_id.as_deref() else {
            bail!("No market opened");
        };
        match self.exchange.markets.get(id) {
            Some(m) => Ok((id, m)),
            None => bail!("Unknown market {id}"),
        }
    }
}

#[async_trait]
impl MarketGateway for FakeSession {
    async fn open_market(&mut self, market: &Market) -> Result<()> {
        match self.exchange.markets.get(&market.event_id) {
            Some(m) if m.open_error.is_some() => {
                bail!("{}", m.open_error.clone().unwrap_or_default())
            }
            Some(_) => {
                self.market_id = Some(market.event_id.clone());
                Ok(())
            }
            None => bail!("MARKET_NOT_FOUND"),
        }
    }

    async fn live_prices(&self) -> Result<Vec<PriceQuote>> {
        let (_, m) = self.market()?;
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        let in_play = m.pre_play_polls.is_some_and(|n| poll > n);
        Ok(m.runners
            .iter()
            .map(|(id, name, sp)| PriceQuote {
                selection_id: *id,
                selection_name: name.clone(),
                closed: m.closed,
                in_play,
                sp_price: Some(*sp),
            })
            .collect())
    }

    async fn market_depth(&self, _include_all: bool) -> Result<Vec<DepthSelection>> {
        let (_, m) = self.market()?;
        self.exchange.depth_reads.fetch_add(1, Ordering::SeqCst);
        Ok(m.runners
            .iter()
            .map(|(id, name, sp)| DepthSelection {
                selection_id: *id,
                selection_name: name.clone(),
                actual_sp: Some(*sp),
                available_to_back: Vec::new(),
                available_to_lay: Vec::new(),
            })
            .collect())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String> {
        let (id, _) = self.market()?;
        self.exchange.orders.lock().unwrap().push(PlacedOrder {
            market_id: id.to_string(),
            order: order.clone(),
        });
        let n = self.next_ref.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{id}-bet-{n}"))
    }
}

pub fn market(id: &str, track: &str, name: &str) -> Market {
    Market {
        event_id: id.to_string(),
        exchange_id: 1,
        name: name.to_string(),
        track: track.to_string(),
        start_time: Utc.with_ymd_and_hms(2026, 10, 16, 14, 30, 0).unwrap(),
    }
}

pub fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        settle_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
        in_play_timeout: None,
        dry_run: false,
    }
}

pub fn temp_path(prefix: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("{prefix}_{}.json", uuid::Uuid::new_v4()));
    p
}
