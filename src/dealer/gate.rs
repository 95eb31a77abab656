//! Price stream gate.
//!
//! Turns the push-style feed into an awaitable condition: subscribe to an
//! instrument, consume quotes until a price condition holds, unsubscribe.

use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{DealError, FeedError};
use crate::feed::{CandleInterval, FeedEvent, Quote, QuoteFeed, QuoteSink};

/// Price level a deal step waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceCondition {
    /// Buy step: price at or below the target
    AtOrBelow(Decimal),
    /// Sell step: price at or above the target
    AtOrAbove(Decimal),
}

impl PriceCondition {
    pub fn is_met(&self, price: Decimal) -> bool {
        match self {
            PriceCondition::AtOrBelow(target) => price <= *target,
            PriceCondition::AtOrAbove(target) => price >= *target,
        }
    }
}

impl fmt::Display for PriceCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceCondition::AtOrBelow(target) => write!(f, "price <= {}", target),
            PriceCondition::AtOrAbove(target) => write!(f, "price >= {}", target),
        }
    }
}

/// Shared entry point for quote subscriptions.
pub struct PriceGate {
    feed: Arc<dyn QuoteFeed>,
    interval: CandleInterval,
    max_wait: Option<Duration>,
}

impl PriceGate {
    pub fn new(feed: Arc<dyn QuoteFeed>, interval: CandleInterval) -> Self {
        Self {
            feed,
            interval,
            max_wait: None,
        }
    }

    /// Bound every wait. Without it a wait lasts until the condition holds.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Open a quote stream for the pair.
    pub async fn subscribe(
        &self,
        instrument_id: &str,
        interval: CandleInterval,
    ) -> Result<QuoteSubscription, DealError> {
        let (sink, rx) = QuoteSink::channel();
        self.feed.subscribe(instrument_id, interval, sink).await?;
        debug!(instrument = %instrument_id, %interval, "Subscribed to candles");

        Ok(QuoteSubscription {
            feed: self.feed.clone(),
            instrument_id: instrument_id.to_string(),
            interval,
            rx,
            max_wait: self.max_wait,
            active: true,
        })
    }

    /// Subscribe, wait for `condition`, unsubscribe.
    ///
    /// The unsubscribe runs on every exit path. When both the wait and the
    /// unsubscribe fail, the wait error is returned.
    pub async fn wait_for<F>(
        &self,
        instrument_id: &str,
        condition: &PriceCondition,
        on_quote: F,
    ) -> Result<Quote, DealError>
    where
        F: FnMut(&Quote) -> Result<(), DealError> + Send,
    {
        let mut subscription = self.subscribe(instrument_id, self.interval).await?;
        let waited = subscription.await_condition(condition, on_quote).await;
        let unsubscribed = subscription.unsubscribe().await;

        match (waited, unsubscribed) {
            (Ok(quote), Ok(())) => Ok(quote),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unsubscribe_error)) => {
                warn!(
                    instrument = %instrument_id,
                    error = %unsubscribe_error,
                    "Unsubscribe failed after an aborted wait"
                );
                Err(e)
            }
        }
    }
}

/// Live quote stream for one instrument.
///
/// Quotes arrive from the feed's task through a channel; the stream never
/// restarts once closed. Dropping an active subscription issues the
/// unsubscribe in the background.
pub struct QuoteSubscription {
    feed: Arc<dyn QuoteFeed>,
    instrument_id: String,
    interval: CandleInterval,
    rx: mpsc::UnboundedReceiver<FeedEvent>,
    max_wait: Option<Duration>,
    active: bool,
}

impl QuoteSubscription {
    /// Next quote for this instrument.
    pub async fn next_quote(&mut self) -> Result<Quote, DealError> {
        loop {
            match self.rx.recv().await {
                Some(FeedEvent::Quote(quote)) if quote.instrument_id == self.instrument_id => {
                    return Ok(quote)
                }
                Some(FeedEvent::Quote(quote)) => {
                    debug!(
                        instrument = %self.instrument_id,
                        other = %quote.instrument_id,
                        "Ignoring quote for another instrument"
                    );
                }
                Some(FeedEvent::Error(reason)) => return Err(FeedError::Stream(reason).into()),
                None => return Err(FeedError::Disconnected.into()),
            }
        }
    }

    /// Consume quotes until `condition` holds and return the quote that met it.
    ///
    /// Every quote is handed to `on_quote` before the condition is checked.
    pub async fn await_condition<F>(
        &mut self,
        condition: &PriceCondition,
        on_quote: F,
    ) -> Result<Quote, DealError>
    where
        F: FnMut(&Quote) -> Result<(), DealError> + Send,
    {
        let Some(limit) = self.max_wait else {
            return self.consume(condition, on_quote).await;
        };

        let waited = tokio::time::timeout(limit, self.consume(condition, on_quote)).await;
        match waited {
            Ok(result) => result,
            Err(_) => Err(DealError::WaitTimeout {
                instrument_id: self.instrument_id.clone(),
                condition: condition.to_string(),
                waited_secs: limit.as_secs(),
            }),
        }
    }

    async fn consume<F>(
        &mut self,
        condition: &PriceCondition,
        mut on_quote: F,
    ) -> Result<Quote, DealError>
    where
        F: FnMut(&Quote) -> Result<(), DealError> + Send,
    {
        loop {
            let quote = self.next_quote().await?;
            on_quote(&quote)?;

            if condition.is_met(quote.price) {
                debug!(
                    instrument = %self.instrument_id,
                    price = %quote.price,
                    %condition,
                    "Price condition met"
                );
                self.rx.close();
                return Ok(quote);
            }
            debug!(instrument = %self.instrument_id, price = %quote.price, %condition, "Waiting");
        }
    }

    /// Stop the stream.
    pub async fn unsubscribe(mut self) -> Result<(), DealError> {
        self.active = false;
        self.rx.close();
        self.feed
            .unsubscribe(&self.instrument_id, self.interval)
            .await?;
        debug!(instrument = %self.instrument_id, "Unsubscribed from candles");
        Ok(())
    }
}

impl Drop for QuoteSubscription {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(instrument = %self.instrument_id, "Subscription dropped outside a runtime");
            return;
        };

        let feed = self.feed.clone();
        let instrument_id = self.instrument_id.clone();
        let interval = self.interval;
        runtime.spawn(async move {
            if let Err(e) = feed.unsubscribe(&instrument_id, interval).await {
                warn!(instrument = %instrument_id, error = %e, "Background unsubscribe failed");
            }
        });
    }
}
