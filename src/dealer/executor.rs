//! Order execution collaborator.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::error::DealError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// What the executor reports back for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub side: OrderSide,
    pub instrument_id: String,
    pub quantity: Decimal,
    /// Fill price, if the executor knows it
    pub fill_price: Option<Decimal>,
    pub note: String,
}

/// Places buy and sell orders.
///
/// The deal is only advanced after `execute` returns `Ok`. An error keeps the
/// deal in its current step.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn execute(
        &self,
        side: OrderSide,
        instrument_id: &str,
        quantity: Decimal,
    ) -> Result<ExecutionReport, DealError>;
}

/// Executor that only logs. No order reaches the broker.
#[derive(Debug, Default, Clone)]
pub struct PaperExecutor;

impl PaperExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    async fn execute(
        &self,
        side: OrderSide,
        instrument_id: &str,
        quantity: Decimal,
    ) -> Result<ExecutionReport, DealError> {
        let note = match side {
            OrderSide::Buy => "Stub for buy",
            OrderSide::Sell => "Stub for sell",
        };
        info!(instrument = %instrument_id, %side, %quantity, "{}", note);

        Ok(ExecutionReport {
            side,
            instrument_id: instrument_id.to_string(),
            quantity,
            fill_price: None,
            note: note.to_string(),
        })
    }
}
