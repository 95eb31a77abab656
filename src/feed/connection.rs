//! Process-wide feed connection lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::client::BrokerClient;
use super::traits::QuoteFeed;
use super::websocket::StreamingFeed;
use crate::config::FeedConfig;
use crate::error::FeedError;

/// Owns the shared feed for the lifetime of a run.
///
/// Opened once at start-up; [`close`](Self::close) is idempotent and also
/// runs on drop, so every exit path releases the connection exactly once.
pub struct FeedConnection {
    feed: Arc<dyn QuoteFeed>,
    closed: AtomicBool,
}

impl FeedConnection {
    /// Register the sandbox account if needed and open the candle stream.
    pub async fn open(config: &FeedConfig) -> Result<Self, FeedError> {
        if config.sandbox {
            BrokerClient::new(config.rest_url(), &config.token)?
                .register_sandbox()
                .await?;
        }

        let feed = StreamingFeed::connect(config.streaming_url(), &config.token).await?;
        Ok(Self::from_feed(Arc::new(feed)))
    }

    /// Wrap an already connected feed.
    pub fn from_feed(feed: Arc<dyn QuoteFeed>) -> Self {
        Self {
            feed,
            closed: AtomicBool::new(false),
        }
    }

    pub fn feed(&self) -> Arc<dyn QuoteFeed> {
        self.feed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Feed connection already closed");
            return false;
        }
        info!("Close connection...");
        self.feed.shutdown();
        true
    }
}

impl Drop for FeedConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MockQuoteFeed;

    #[test]
    fn test_close_is_idempotent() {
        let mock = Arc::new(MockQuoteFeed::new());
        let connection = FeedConnection::from_feed(mock.clone());

        assert!(connection.close());
        assert!(!connection.close());
        assert!(connection.is_closed());
        drop(connection);

        assert_eq!(mock.shutdown_count(), 1);
    }

    #[test]
    fn test_drop_closes_connection() {
        let mock = Arc::new(MockQuoteFeed::new());
        drop(FeedConnection::from_feed(mock.clone()));
        assert_eq!(mock.shutdown_count(), 1);
    }
}
