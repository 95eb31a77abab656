//! Scripted quote feed for tests.
//!
//! Every subscription to an instrument takes the next scripted batch and
//! replays it from a background task. The sink stays registered after the
//! batch is exhausted, so a waiting subscriber blocks until it unsubscribes,
//! like it would on a quiet live market.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

use super::traits::{QuoteFeed, QuoteSink};
use super::types::{CandleInterval, FeedEvent, Quote};
use crate::error::FeedError;

/// One scripted step delivered to a subscriber.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Quote(Decimal),
    Fail(String),
}

/// Turn a list of prices into a batch.
pub fn quotes(prices: &[Decimal]) -> Vec<ScriptStep> {
    prices.iter().copied().map(ScriptStep::Quote).collect()
}

/// Call made against the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCall {
    Subscribe(String, CandleInterval),
    Unsubscribe(String, CandleInterval),
}

/// In-memory [`QuoteFeed`] with per-subscription scripts.
#[derive(Default)]
pub struct MockQuoteFeed {
    scripts: Mutex<HashMap<String, VecDeque<Vec<ScriptStep>>>>,
    live: Mutex<HashMap<(String, CandleInterval), QuoteSink>>,
    rejected: Mutex<HashSet<String>>,
    calls: Mutex<Vec<FeedCall>>,
    shutdowns: AtomicUsize,
}

impl MockQuoteFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a batch for the next subscription to `instrument_id`.
    pub fn with_batch(self, instrument_id: &str, batch: Vec<ScriptStep>) -> Self {
        self.push_batch(instrument_id, batch);
        self
    }

    /// Make every subscribe call for `instrument_id` fail.
    pub fn with_rejected(self, instrument_id: &str) -> Self {
        lock(&self.rejected).insert(instrument_id.to_string());
        self
    }

    pub fn push_batch(&self, instrument_id: &str, batch: Vec<ScriptStep>) {
        lock(&self.scripts)
            .entry(instrument_id.to_string())
            .or_default()
            .push_back(batch);
    }

    pub fn calls(&self) -> Vec<FeedCall> {
        lock(&self.calls).clone()
    }

    /// Number of subscriptions still registered.
    pub fn live_subscriptions(&self) -> usize {
        lock(&self.live).len()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl QuoteFeed for MockQuoteFeed {
    async fn subscribe(
        &self,
        instrument_id: &str,
        interval: CandleInterval,
        sink: QuoteSink,
    ) -> Result<(), FeedError> {
        lock(&self.calls).push(FeedCall::Subscribe(instrument_id.to_string(), interval));
        if lock(&self.rejected).contains(instrument_id) {
            return Err(FeedError::Subscribe {
                instrument_id: instrument_id.to_string(),
                reason: "rejected by mock".to_string(),
            });
        }

        let batch = lock(&self.scripts)
            .get_mut(instrument_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        lock(&self.live).insert((instrument_id.to_string(), interval), sink.clone());

        let instrument_id = instrument_id.to_string();
        tokio::spawn(async move {
            for step in batch {
                tokio::task::yield_now().await;
                let event = match step {
                    ScriptStep::Quote(price) => {
                        FeedEvent::Quote(Quote::new(instrument_id.clone(), interval, price))
                    }
                    ScriptStep::Fail(reason) => FeedEvent::Error(reason),
                };
                if !sink.deliver(event) {
                    debug!(instrument = %instrument_id, "Mock subscriber stopped listening");
                    break;
                }
            }
        });
        Ok(())
    }

    async fn unsubscribe(
        &self,
        instrument_id: &str,
        interval: CandleInterval,
    ) -> Result<(), FeedError> {
        lock(&self.calls).push(FeedCall::Unsubscribe(instrument_id.to_string(), interval));
        lock(&self.live).remove(&(instrument_id.to_string(), interval));
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        lock(&self.live).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_batches_are_consumed_per_subscription() {
        let feed = MockQuoteFeed::new()
            .with_batch("FIGI", quotes(&[dec!(1), dec!(2)]))
            .with_batch("FIGI", quotes(&[dec!(3)]));

        let (sink, mut rx) = QuoteSink::channel();
        feed.subscribe("FIGI", CandleInterval::OneMin, sink).await.unwrap();
        for expected in [dec!(1), dec!(2)] {
            match rx.recv().await.unwrap() {
                FeedEvent::Quote(q) => assert_eq!(q.price, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        feed.unsubscribe("FIGI", CandleInterval::OneMin).await.unwrap();

        let (sink, mut rx) = QuoteSink::channel();
        feed.subscribe("FIGI", CandleInterval::OneMin, sink).await.unwrap();
        assert!(matches!(rx.recv().await, Some(FeedEvent::Quote(q)) if q.price == dec!(3)));
        assert_eq!(feed.live_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_rejected_instrument_fails_subscribe() {
        let feed = MockQuoteFeed::new().with_rejected("FIGI");
        let (sink, _rx) = QuoteSink::channel();

        let err = feed
            .subscribe("FIGI", CandleInterval::OneMin, sink)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Subscribe { .. }));
        assert_eq!(feed.live_subscriptions(), 0);
    }
}
