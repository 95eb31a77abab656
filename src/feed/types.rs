//! Quote and streaming message types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle interval a subscription is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CandleInterval {
    #[default]
    #[serde(rename = "1min")]
    OneMin,
    #[serde(rename = "2min")]
    TwoMin,
    #[serde(rename = "3min")]
    ThreeMin,
    #[serde(rename = "5min")]
    FiveMin,
    #[serde(rename = "10min")]
    TenMin,
    #[serde(rename = "15min")]
    FifteenMin,
    #[serde(rename = "30min")]
    HalfHour,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMin => "1min",
            CandleInterval::TwoMin => "2min",
            CandleInterval::ThreeMin => "3min",
            CandleInterval::FiveMin => "5min",
            CandleInterval::TenMin => "10min",
            CandleInterval::FifteenMin => "15min",
            CandleInterval::HalfHour => "30min",
            CandleInterval::Hour => "hour",
            CandleInterval::Day => "day",
            CandleInterval::Week => "week",
            CandleInterval::Month => "month",
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed price for an instrument.
///
/// Quotes are only ordered by arrival; `received_at` is informational.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub instrument_id: String,
    pub interval: CandleInterval,
    pub price: Decimal,
    pub received_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(instrument_id: impl Into<String>, interval: CandleInterval, price: Decimal) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            interval,
            price,
            received_at: Utc::now(),
        }
    }
}

/// What a feed hands to a subscriber.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Quote(Quote),
    /// The feed reported a failure for this subscription.
    Error(String),
}

// ==================== Streaming wire format ====================

/// Outgoing streaming request.
#[derive(Debug, Clone, Serialize)]
pub struct StreamingRequest<'a> {
    pub event: &'a str,
    pub figi: &'a str,
    pub interval: CandleInterval,
    pub request_id: String,
}

impl<'a> StreamingRequest<'a> {
    pub fn subscribe_candle(figi: &'a str, interval: CandleInterval) -> Self {
        Self {
            event: "candle:subscribe",
            figi,
            interval,
            request_id: request_id(figi, interval),
        }
    }

    pub fn unsubscribe_candle(figi: &'a str, interval: CandleInterval) -> Self {
        Self {
            event: "candle:unsubscribe",
            figi,
            interval,
            request_id: request_id(figi, interval),
        }
    }
}

/// Request id used to route error replies back to a subscription.
pub fn request_id(figi: &str, interval: CandleInterval) -> String {
    format!("{figi}@{interval}")
}

/// Incoming streaming message envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Candle payload of a `candle` event.
#[derive(Debug, Clone, Deserialize)]
pub struct CandlePayload {
    pub figi: String,
    pub interval: CandleInterval,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
    pub time: DateTime<Utc>,
}

/// Payload of an `error` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Decoded streaming message.
#[derive(Debug, Clone)]
pub enum StreamingMessage {
    Candle(CandlePayload),
    Error(ErrorPayload),
    Other(String),
}

impl StreamingMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let envelope: StreamingEnvelope = serde_json::from_str(text)?;
        Ok(match envelope.event.as_str() {
            "candle" => StreamingMessage::Candle(serde_json::from_value(envelope.payload)?),
            "error" => StreamingMessage::Error(serde_json::from_value(envelope.payload)?),
            _ => StreamingMessage::Other(envelope.event),
        })
    }
}
