//! Betfair Exchange integration.
//!
//! Uses the Betfair Exchange API (JSON-RPC over REST).
//!
//! API docs: https://docs.developer.betfair.com/display/1smk3cen4v3lu3yomq5qye0ni/API+Overview
//! Betting API base: https://api.betfair.com/exchange/betting/rest/v1.0/
//! Auth: https://identitysso.betfair.com/api/login
//!
//! Auth requires: App Key + session token (obtained via username/password login).
//! Headers: `X-Application: {app_key}`, `X-Authentication: {session_token}`
//!
//! One `BetfairClient` holds the HTTP connection pool and the login
//! session. Each monitored market gets its own `BetfairSession` that
//! remembers which market it opened and the runner names for it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use reqwest::Client;
use rust_decimal::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::{GatewayProvider, MarketDiscovery, MarketGateway};
use crate::types::{
    d, DepthSelection, Market, OddsBandError, OrderRequest, PriceLevel, PriceQuote,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const AUTH_URL: &str = "https://identitysso.betfair.com/api/login";
const BETTING_URL: &str = "https://api.betfair.com/exchange/betting/rest/v1.0";
const PLATFORM_NAME: &str = "betfair";

/// Betfair event type id for horse racing.
const HORSE_RACING_EVENT_TYPE: &str = "7";

/// Countries whose meetings are monitored.
const MARKET_COUNTRIES: [&str; 2] = ["GB", "IE"];

/// Race-name markers of the race types the bands were built from.
const RACE_TYPE_MARKERS: [&str; 4] = ["Hcap", "Mdn", "Nov", "NHF"];

/// Maximum markets per catalogue request (API limit is 1000).
const DEFAULT_FETCH_LIMIT: u32 = 1000;

/// Exchange id of the main (UK) Betfair exchange.
const UK_EXCHANGE_ID: u32 = 1;

/// SP prices visible before and after reconciliation.
const SP_PRICE_DATA: [&str; 2] = ["SP_AVAILABLE", "SP_TRADED"];

// ---------------------------------------------------------------------------
// Betfair API types
// ---------------------------------------------------------------------------

/// Login response from the SSO endpoint.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "sessionToken")]
    session_token: Option<String>,
    #[serde(rename = "loginStatus")]
    login_status: String,
}

/// Market catalogue entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketCatalogue {
    market_id: String,
    market_name: String,
    #[serde(default)]
    event: Option<EventInfo>,
    #[serde(default)]
    market_start_time: Option<String>,
    #[serde(default)]
    runners: Vec<RunnerCatalogue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerCatalogue {
    selection_id: u64,
    runner_name: String,
}

/// Market book (live prices/state).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketBook {
    market_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    inplay: Option<bool>,
    #[serde(default)]
    runners: Vec<RunnerBook>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerBook {
    selection_id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    sp: Option<StartingPrices>,
    #[serde(default)]
    ex: Option<ExchangePrices>,
}

/// SP fields may come back as numbers or as "NaN"/"Infinity" strings,
/// so they are kept raw and read through `price_of`.
#[derive(Debug, Deserialize)]
struct StartingPrices {
    #[serde(rename = "nearPrice", default)]
    near_price: Option<Value>,
    #[serde(rename = "farPrice", default)]
    far_price: Option<Value>,
    #[serde(rename = "actualSP", default)]
    actual_sp: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangePrices {
    #[serde(default)]
    available_to_back: Vec<PriceSize>,
    #[serde(default)]
    available_to_lay: Vec<PriceSize>,
}

#[derive(Debug, Deserialize)]
struct PriceSize {
    price: f64,
    size: f64,
}

/// Place orders response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrdersResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    instruction_reports: Vec<InstructionReport>,
    #[serde(default)]
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstructionReport {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    bet_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Betfair Exchange client: HTTP pool plus login session.
pub struct BetfairClient {
    http: Client,
    app_key: String,
    session_token: RwLock<Option<String>>,
    username: String,
    password: String,
}

impl BetfairClient {
    /// Create a new Betfair client.
    ///
    /// Reads credentials from environment variables:
    /// - `BETFAIR_APP_KEY`: application key
    /// - `BETFAIR_USERNAME`: account username
    /// - `BETFAIR_PASSWORD`: account password
    pub fn new() -> Result<Self> {
        let app_key = std::env::var("BETFAIR_APP_KEY")
            .context("BETFAIR_APP_KEY environment variable not set")?;
        let username = std::env::var("BETFAIR_USERNAME")
            .context("BETFAIR_USERNAME environment variable not set")?;
        let password = std::env::var("BETFAIR_PASSWORD")
            .context("BETFAIR_PASSWORD environment variable not set")?;

        Self::with_credentials(app_key, username, password)
    }

    /// Create a client with explicit credentials (for testing).
    pub fn with_credentials(app_key: String, username: String, password: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("ODDSBAND/0.1.0 (sp-band-bettor)")
            .build()
            .context("Failed to build HTTP client for Betfair")?;

        Ok(Self {
            http,
            app_key,
            session_token: RwLock::new(None),
            username,
            password,
        })
    }

    // -- Authentication ----------------------------------------------------

    /// Authenticate with Betfair SSO and store the session token.
    async fn login(&self) -> Result<()> {
        info!("Authenticating with Betfair...");

        let resp = self
            .http
            .post(AUTH_URL)
            .header("X-Application", &self.app_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .context("Betfair login request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Betfair login failed {status}: {body}");
        }

        let login: LoginResponse = resp
            .json()
            .await
            .context("Failed to parse Betfair login response")?;

        if login.login_status != "SUCCESS" {
            anyhow::bail!("Betfair login rejected: {}", login.login_status);
        }

        let token = login
            .session_token
            .context("Betfair login succeeded but no session token returned")?;

        *self
            .session_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);

        info!("Betfair authentication successful");
        Ok(())
    }

    fn cached_token(&self) -> Option<String> {
        self.session_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the cached token if it is still the one that was rejected.
    /// A token refreshed by another session in the meantime is kept.
    fn invalidate_token(&self, rejected: &str) -> bool {
        let mut cached = self
            .session_token
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if cached.as_deref() == Some(rejected) {
            *cached = None;
            true
        } else {
            false
        }
    }

    /// Get a valid session token, logging in if necessary.
    async fn ensure_session(&self) -> Result<String> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }
        self.login().await?;
        self.cached_token()
            .context("Session token missing after login")
    }

    // -- API helpers -------------------------------------------------------

    async fn post_betting(
        &self,
        url: &str,
        token: &str,
        body: &Value,
    ) -> reqwest::Result<reqwest::Response> {
        self.http
            .post(url)
            .header("X-Application", &self.app_key)
            .header("X-Authentication", token)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
    }

    /// Make an authenticated POST to the Betfair Betting API.
    /// An expired session is refreshed and the call retried once.
    async fn betting_api<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Value,
    ) -> Result<T> {
        let url = format!("{BETTING_URL}/{endpoint}/");
        let token = self.ensure_session().await?;

        debug!(url = %url, "Betfair API request");

        let mut resp = self
            .post_betting(&url, &token, body)
            .await
            .with_context(|| format!("Betfair {endpoint} request failed"))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token(&token);
            warn!("Betfair session expired, re-authenticating...");
            let token = self.ensure_session().await?;

            resp = self
                .post_betting(&url, &token, body)
                .await
                .with_context(|| format!("Betfair {endpoint} retry failed"))?;
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(OddsBandError::Gateway {
                operation: endpoint.to_string(),
                message: format!("{status}: {body_text}"),
            }
            .into());
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse Betfair {endpoint} response"))
    }

    // -- Market fetching ---------------------------------------------------

    /// Today's GB/IE horse-racing WIN markets that have not started yet.
    async fn fetch_todays_win_markets(&self) -> Result<Vec<MarketCatalogue>> {
        let (from, to) = today_window(Local::now());

        let body = serde_json::json!({
            "filter": {
                "eventTypeIds": [HORSE_RACING_EVENT_TYPE],
                "marketCountries": MARKET_COUNTRIES,
                "marketTypeCodes": ["WIN"],
                "marketStartTime": {
                    "from": from.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    "to": to.format("%Y-%m-%dT%H:%M:%SZ").to_string()
                }
            },
            "maxResults": DEFAULT_FETCH_LIMIT,
            "marketProjection": ["EVENT", "MARKET_START_TIME"],
            "sort": "FIRST_TO_START"
        });

        self.betting_api("listMarketCatalogue", &body).await
    }

    /// Catalogue (with runner names) for a single market.
    async fn fetch_catalogue(&self, market_id: &str) -> Result<Option<MarketCatalogue>> {
        let body = serde_json::json!({
            "filter": { "marketIds": [market_id] },
            "maxResults": 1,
            "marketProjection": ["EVENT", "MARKET_START_TIME", "RUNNER_DESCRIPTION"]
        });

        let catalogues: Vec<MarketCatalogue> =
            self.betting_api("listMarketCatalogue", &body).await?;
        Ok(catalogues.into_iter().next())
    }

    /// Market book for a single market with the given price projection.
    async fn fetch_market_book(&self, market_id: &str, price_data: &[&str]) -> Result<MarketBook> {
        let body = serde_json::json!({
            "marketIds": [market_id],
            "priceProjection": {
                "priceData": price_data,
                "virtualise": false
            }
        });

        let books: Vec<MarketBook> = self.betting_api("listMarketBook", &body).await?;
        books
            .into_iter()
            .next()
            .ok_or_else(|| OddsBandError::NoPriceData(market_id.to_string()).into())
    }

    // -- Conversion helpers ------------------------------------------------

    /// Whether the race name marks one of the monitored race types.
    fn is_race_type(market_name: &str) -> bool {
        RACE_TYPE_MARKERS
            .iter()
            .any(|marker| market_name.contains(marker))
    }

    /// Monitored race types in GB/IE, as `Market`s ordered by start time.
    /// Catalogues without a country code are kept.
    fn select_markets(catalogues: &[MarketCatalogue]) -> Vec<Market> {
        let mut markets: Vec<Market> = catalogues
            .iter()
            .filter(|c| Self::is_race_type(&c.market_name))
            .filter(|c| {
                c.event
                    .as_ref()
                    .and_then(|e| e.country_code.as_deref())
                    .map_or(true, |cc| MARKET_COUNTRIES.contains(&cc))
            })
            .filter_map(Self::to_market)
            .collect();

        markets.sort_by_key(|m| m.start_time);
        markets
    }

    /// Convert a catalogue entry into a `Market`. The track is the
    /// event venue, falling back to the event name.
    fn to_market(catalogue: &MarketCatalogue) -> Option<Market> {
        let event = catalogue.event.as_ref()?;
        let track = event
            .venue
            .clone()
            .or_else(|| event.name.clone())
            .filter(|t| !t.is_empty())?;

        let start_time = catalogue
            .market_start_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))?;

        Some(Market {
            event_id: catalogue.market_id.clone(),
            exchange_id: UK_EXCHANGE_ID,
            name: catalogue.market_name.clone(),
            track,
            start_time,
        })
    }

    /// Live quotes from a market book, one per runner.
    fn to_quotes(book: &MarketBook, names: &HashMap<u64, String>) -> Vec<PriceQuote> {
        let closed = book.status.as_deref() == Some("CLOSED");
        let in_play = book.inplay.unwrap_or(false);

        book.runners
            .iter()
            .map(|runner| PriceQuote {
                selection_id: runner.selection_id,
                selection_name: runner_name(names, runner.selection_id),
                closed,
                in_play,
                sp_price: runner.sp.as_ref().and_then(sp_estimate),
            })
            .collect()
    }

    /// Depth-of-market snapshot from a market book. Removed runners
    /// are dropped.
    fn to_depth(book: &MarketBook, names: &HashMap<u64, String>) -> Vec<DepthSelection> {
        book.runners
            .iter()
            .filter(|runner| runner.status.as_deref() != Some("REMOVED"))
            .map(|runner| {
                let (back, lay) = runner
                    .ex
                    .as_ref()
                    .map(|ex| (ladder(&ex.available_to_back), ladder(&ex.available_to_lay)))
                    .unwrap_or_default();

                DepthSelection {
                    selection_id: runner.selection_id,
                    selection_name: runner_name(names, runner.selection_id),
                    actual_sp: runner
                        .sp
                        .as_ref()
                        .and_then(|sp| sp.actual_sp.as_ref())
                        .and_then(price_of),
                    available_to_back: back,
                    available_to_lay: lay,
                }
            })
            .collect()
    }

    /// Extract the bet reference from a placeOrders response.
    fn bet_reference(resp: PlaceOrdersResponse) -> Result<String> {
        let report = resp.instruction_reports.into_iter().next();

        if let Some(error_code) = resp.error_code {
            let message = match report.and_then(|r| r.error_code) {
                Some(instruction_error) => format!("{error_code} ({instruction_error})"),
                None => error_code,
            };
            return Err(OddsBandError::Gateway {
                operation: "placeOrders".to_string(),
                message,
            }
            .into());
        }

        if resp.status.as_deref() == Some("FAILURE") {
            let instruction_error = report
                .and_then(|r| r.error_code)
                .unwrap_or_else(|| "UNKNOWN".to_string());
            anyhow::bail!("Betfair order failed: {instruction_error}");
        }

        Ok(report.and_then(|r| r.bet_id).unwrap_or_default())
    }
}

fn ladder(levels: &[PriceSize]) -> Vec<PriceLevel> {
    levels
        .iter()
        .map(|l| PriceLevel {
            price: d(l.price),
            size: d(l.size),
        })
        .collect()
}

/// Read a Betfair price value, ignoring "NaN"/"Infinity" and non-positive values.
fn price_of(value: &Value) -> Option<Decimal> {
    value
        .as_f64()
        .filter(|p| p.is_finite() && *p > 0.0)
        .map(d)
}

/// Best SP estimate: actual SP once reconciled, else the near price,
/// else the far price.
fn sp_estimate(sp: &StartingPrices) -> Option<Decimal> {
    [&sp.actual_sp, &sp.near_price, &sp.far_price]
        .into_iter()
        .flatten()
        .find_map(price_of)
}

fn runner_name(names: &HashMap<u64, String>, selection_id: u64) -> String {
    names
        .get(&selection_id)
        .cloned()
        .unwrap_or_else(|| selection_id.to_string())
}

/// Discovery window: from `now` until the next local midnight.
fn today_window(now: DateTime<Local>) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = now.with_timezone(&Utc);
    let to = (now.date_naive() + Duration::days(1))
        .and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| from + Duration::hours(24));
    (from, to)
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDiscovery for BetfairClient {
    /// Today's UK & IRE handicap, maiden, novice and bumper WIN markets,
    /// ordered by start time.
    async fn eligible_markets(&self) -> Result<Vec<Market>> {
        info!("Scanning Betfair for today's UK & IRE races...");

        let catalogues = self.fetch_todays_win_markets().await?;
        info!(count = catalogues.len(), "Betfair market catalogues fetched");

        let markets = Self::select_markets(&catalogues);

        info!(eligible = markets.len(), "Betfair discovery complete");
        Ok(markets)
    }
}

// ---------------------------------------------------------------------------
// Per-market session
// ---------------------------------------------------------------------------

impl GatewayProvider for Arc<BetfairClient> {
    fn open_session(&self) -> Result<Box<dyn MarketGateway>> {
        Ok(Box::new(BetfairSession::new(Arc::clone(self))))
    }

    fn name(&self) -> &str {
        PLATFORM_NAME
    }
}

/// A gateway session bound to one Betfair market.
pub struct BetfairSession {
    client: Arc<BetfairClient>,
    market_id: Option<String>,
    runner_names: HashMap<u64, String>,
}

impl BetfairSession {
    pub fn new(client: Arc<BetfairClient>) -> Self {
        Self {
            client,
            market_id: None,
            runner_names: HashMap::new(),
        }
    }

    fn market_id(&self) -> Result<&str> {
        self.market_id
            .as_deref()
            .context("No market opened on this Betfair session")
    }
}

#[async_trait]
impl MarketGateway for BetfairSession {
    async fn open_market(&mut self, market: &Market) -> Result<()> {
        let catalogue = self
            .client
            .fetch_catalogue(&market.event_id)
            .await?
            .ok_or_else(|| OddsBandError::OpenMarket {
                market: market.event_id.clone(),
                reason: "market not found".to_string(),
            })?;

        self.runner_names = catalogue
            .runners
            .into_iter()
            .map(|r| (r.selection_id, r.runner_name))
            .collect();
        self.market_id = Some(catalogue.market_id);

        debug!(
            market_id = %market.event_id,
            runners = self.runner_names.len(),
            "Betfair market opened"
        );
        Ok(())
    }

    async fn live_prices(&self) -> Result<Vec<PriceQuote>> {
        let book = self
            .client
            .fetch_market_book(self.market_id()?, &SP_PRICE_DATA)
            .await?;
        Ok(BetfairClient::to_quotes(&book, &self.runner_names))
    }

    async fn market_depth(&self, include_all: bool) -> Result<Vec<DepthSelection>> {
        let offers = if include_all {
            "EX_ALL_OFFERS"
        } else {
            "EX_BEST_OFFERS"
        };
        let price_data = [offers, SP_PRICE_DATA[0], SP_PRICE_DATA[1]];

        let book = self
            .client
            .fetch_market_book(self.market_id()?, &price_data)
            .await?;
        debug!(market_id = %book.market_id, runners = book.runners.len(), "Depth fetched");
        Ok(BetfairClient::to_depth(&book, &self.runner_names))
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String> {
        let market_id = self.market_id()?;

        let body = serde_json::json!({
            "marketId": market_id,
            "instructions": [{
                "orderType": "LIMIT",
                "selectionId": order.selection_id,
                "side": order.side.to_string(),
                "limitOrder": {
                    "size": order.stake.to_f64().unwrap_or(0.0),
                    "price": order.price.to_f64().unwrap_or(0.0),
                    "persistenceType": "PERSIST"
                }
            }]
        });

        let resp: PlaceOrdersResponse = self.client.betting_api("placeOrders", &body).await?;
        let reference = BetfairClient::bet_reference(resp)?;

        info!(
            market_id = %market_id,
            selection_id = order.selection_id,
            side = %order.side,
            stake = %order.stake,
            price = %order.price,
            bet_id = %reference,
            "Betfair order placed"
        );

        Ok(reference)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
