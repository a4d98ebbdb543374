//! Core engine: one monitor per market, orchestrated by a session.

pub mod monitor;
pub mod session;

pub use monitor::{MarketMonitor, MonitorExit, MonitorOutcome, MonitorSettings, MonitorState};
pub use session::{Session, SessionReport};
