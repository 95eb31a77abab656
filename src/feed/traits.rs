//! Feed-agnostic subscription contract.
//!
//! A feed delivers events to a [`QuoteSink`] from its own task. The sink's
//! return value tells the feed whether the subscriber still wants events.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{CandleInterval, FeedEvent};
use crate::error::FeedError;

/// Receiving end a feed pushes events into.
#[derive(Debug, Clone)]
pub struct QuoteSink {
    tx: mpsc::UnboundedSender<FeedEvent>,
}

impl QuoteSink {
    /// Create a sink and the receiver the waiting task reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hand one event to the subscriber. Returns `false` once the subscriber
    /// has stopped listening; the feed should then drop the sink.
    pub fn deliver(&self, event: FeedEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Streaming market data source.
///
/// Implement this trait to plug in another quote source. Implementations
/// must not run subscriber logic inline; they only push into the sink.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Start streaming candles for `instrument_id` into `sink`.
    async fn subscribe(
        &self,
        instrument_id: &str,
        interval: CandleInterval,
        sink: QuoteSink,
    ) -> Result<(), FeedError>;

    /// Stop streaming for the pair and drop its sink.
    async fn unsubscribe(
        &self,
        instrument_id: &str,
        interval: CandleInterval,
    ) -> Result<(), FeedError>;

    /// Tear down the underlying connection. Called once by
    /// [`FeedConnection`](super::FeedConnection).
    fn shutdown(&self) {}
}
