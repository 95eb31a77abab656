//! Market data feed integration.
//!
//! ## Streaming
//! WebSocket candle stream shared by every instrument, with routing of
//! candles and error replies to per-subscription sinks.
//!
//! ## Lifecycle
//! [`FeedConnection`] owns the shared feed: sandbox registration over REST
//! on open, a single idempotent close on shutdown.

mod client;
mod connection;
#[cfg(test)]
pub(crate) mod mock;
mod traits;
mod types;
mod websocket;

pub use client::{BrokerClient, REST_URL, SANDBOX_REST_URL};
pub use connection::FeedConnection;
#[cfg(test)]
pub(crate) use mock::MockQuoteFeed;
pub use traits::{QuoteFeed, QuoteSink};
pub use types::*;
pub use websocket::{StreamingFeed, STREAMING_URL};
