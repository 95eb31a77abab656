//! # Price Dealer
//!
//! Runs a buy-then-sell deal per instrument against a live candle stream.
//! Each deal's progress is persisted as a marker file, so a restarted process
//! resumes every deal from its last recorded step.
//!
//! ## Architecture
//!
//! - `config`: Application settings and the per-instrument prices file
//! - `feed`: Quote feed contract, streaming client and connection lifecycle
//! - `persistence`: Marker files and the deal state store
//! - `dealer`: Price gate, deal state machine and scheduler
//! - `error`: Error types

pub mod config;
pub mod dealer;
pub mod error;
pub mod feed;
pub mod persistence;

pub use config::Config;
pub use error::{ConfigError, DealError, FeedError};
