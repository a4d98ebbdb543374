//! Exchange integrations.
//!
//! Defines the traits the core consumes:
//! - `MarketGateway`: one open market: live prices, depth, orders
//! - `GatewayProvider`: hands out a fresh gateway session per monitor
//! - `MarketDiscovery`: lists the markets eligible for today's session
//!
//! and provides the Betfair Exchange implementation of all three.

pub mod betfair;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{DepthSelection, Market, OrderRequest, PriceQuote};

/// A gateway session bound to (at most) one open market.
///
/// Sessions are never shared between monitors: each concurrently
/// monitored market gets its own from a `GatewayProvider`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Open `market` on this session. An error means the market could
    /// not be opened and nothing else should be attempted on it.
    async fn open_market(&mut self, market: &Market) -> Result<()>;

    /// Live state for every runner of the open market.
    async fn live_prices(&self) -> Result<Vec<PriceQuote>>;

    /// Depth-of-market snapshot. `include_all` requests the full ladder
    /// rather than the best offers only.
    async fn market_depth(&self, include_all: bool) -> Result<Vec<DepthSelection>>;

    /// Submit an order. Returns the exchange bet reference, which may
    /// be empty if the exchange accepted the request but issued none.
    async fn place_order(&self, order: &OrderRequest) -> Result<String>;
}

/// Factory for per-monitor gateway sessions.
pub trait GatewayProvider: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn MarketGateway>>;

    /// Provider name for logging and identification.
    fn name(&self) -> &str;
}

/// Lists the markets to monitor this session.
#[async_trait]
pub trait MarketDiscovery: Send + Sync {
    async fn eligible_markets(&self) -> Result<Vec<Market>>;
}
