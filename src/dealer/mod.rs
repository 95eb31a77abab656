//! Deal lifecycle.
//!
//! - [`PriceGate`] waits on price conditions over the quote feed
//! - [`DealStateMachine`] drives one instrument from buy to profit
//! - [`DealScheduler`] runs one machine per instrument concurrently

mod executor;
mod gate;
mod machine;
mod scheduler;

pub use executor::{ExecutionReport, OrderExecutor, OrderSide, PaperExecutor};
pub use gate::{PriceCondition, PriceGate, QuoteSubscription};
pub use machine::{DealStateMachine, DealSummary};
pub use scheduler::{DealOutcome, DealScheduler};
