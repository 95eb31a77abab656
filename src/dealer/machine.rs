//! Per-instrument deal state machine.
//!
//! Drives one instrument through `NotStarted -> Buy -> Sell -> Profit`.
//! Every step starts by reading the persisted state, so a restarted process
//! picks up where the last one stopped without repeating finished steps.

use chrono::Utc;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::executor::{OrderExecutor, OrderSide};
use super::gate::{PriceCondition, PriceGate};
use crate::config::TradeConfig;
use crate::error::DealError;
use crate::feed::Quote;
use crate::persistence::{
    ArchivedRecord, AuditEvent, DealState, DealStateStore, MarkerHandle, MarkerLocation,
};

/// Result of a deal that reached `Profit`.
#[derive(Debug, Clone)]
pub struct DealSummary {
    pub instrument_id: String,
    pub archived: ArchivedRecord,
    /// `(sell - buy) * quantity` when both execution prices are known
    pub profit: Option<Decimal>,
}

pub struct DealStateMachine {
    trade: TradeConfig,
    store: Arc<DealStateStore>,
    gate: Arc<PriceGate>,
    executor: Arc<dyn OrderExecutor>,
    archive_dir: PathBuf,
}

impl DealStateMachine {
    pub fn new(
        trade: TradeConfig,
        store: Arc<DealStateStore>,
        gate: Arc<PriceGate>,
        executor: Arc<dyn OrderExecutor>,
        archive_dir: PathBuf,
    ) -> Self {
        Self {
            trade,
            store,
            gate,
            executor,
            archive_dir,
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.trade.instrument_id
    }

    /// Run the deal to completion.
    pub async fn run(&self) -> Result<DealSummary, DealError> {
        let (state, mut handle) = self.store.resolve_current_state(self.instrument_id())?;
        match state {
            DealState::NotStarted => info!(
                instrument = %self.instrument_id(),
                key = %self.trade.key,
                buy = %self.trade.price_to_buy,
                sell = %self.trade.price_to_sell,
                "Starting deal"
            ),
            _ => info!(instrument = %self.instrument_id(), %state, "Resuming deal"),
        }

        let mut archived = None;
        loop {
            match handle.state() {
                DealState::NotStarted => {
                    self.store.transition(&mut handle, DealState::Buy)?;
                }
                DealState::Buy => {
                    self.buy(&mut handle).await?;
                }
                DealState::Sell => {
                    archived = Some(self.sell(&mut handle).await?);
                }
                DealState::Profit => return self.finish(&mut handle, archived),
            }
        }
    }

    async fn buy(&self, handle: &mut MarkerHandle) -> Result<(), DealError> {
        let record = self.store.read(handle)?;
        if let Some(entry) = record.pending_execution(OrderSide::Buy) {
            warn!(
                instrument = %self.instrument_id(),
                executed_at = %entry.at,
                "Buy already executed before restart, not sending it again"
            );
        } else {
            let condition = PriceCondition::AtOrBelow(self.trade.price_to_buy);
            let quote = self.await_price(handle, &condition).await?;
            info!(instrument = %self.instrument_id(), price = %quote.price, "It's time to buy");
            self.execute(handle, OrderSide::Buy, &quote).await?;
        }

        self.store.transition(handle, DealState::Sell)
    }

    async fn sell(&self, handle: &mut MarkerHandle) -> Result<ArchivedRecord, DealError> {
        let record = self.store.read(handle)?;
        if let Some(entry) = record.pending_execution(OrderSide::Sell) {
            warn!(
                instrument = %self.instrument_id(),
                executed_at = %entry.at,
                "Sell already executed before restart, not sending it again"
            );
        } else {
            let condition = PriceCondition::AtOrAbove(self.trade.price_to_sell);
            let quote = self.await_price(handle, &condition).await?;
            info!(instrument = %self.instrument_id(), price = %quote.price, "It's time to sell");
            self.execute(handle, OrderSide::Sell, &quote).await?;
        }

        self.store.archive(handle, &self.archive_dir, Utc::now())
    }

    /// Wait on the gate, recording every quote in the marker.
    async fn await_price(
        &self,
        handle: &MarkerHandle,
        condition: &PriceCondition,
    ) -> Result<Quote, DealError> {
        debug!(instrument = %self.instrument_id(), %condition, "Waiting for price");
        let store = &self.store;
        let quote = self
            .gate
            .wait_for(self.instrument_id(), condition, |quote| {
                store.append(handle, AuditEvent::Quote { price: quote.price })
            })
            .await?;

        self.store.append(
            handle,
            AuditEvent::Note {
                text: format!("{} met at {}", condition, quote.price),
            },
        )?;
        Ok(quote)
    }

    async fn execute(
        &self,
        handle: &MarkerHandle,
        side: OrderSide,
        trigger: &Quote,
    ) -> Result<(), DealError> {
        let report = self
            .executor
            .execute(side, self.instrument_id(), self.trade.quantity)
            .await?;

        self.store.append(
            handle,
            AuditEvent::Execution {
                side,
                quantity: report.quantity,
                price: Some(report.fill_price.unwrap_or(trigger.price)),
                note: report.note,
            },
        )
    }

    fn finish(
        &self,
        handle: &mut MarkerHandle,
        archived: Option<ArchivedRecord>,
    ) -> Result<DealSummary, DealError> {
        let archived = match (archived, handle.location()) {
            (Some(archived), _) => archived,
            (None, MarkerLocation::Active) => {
                info!(instrument = %self.instrument_id(), "Archiving deal left behind by a crash");
                self.store.archive(handle, &self.archive_dir, Utc::now())?
            }
            (None, _) => ArchivedRecord::from_path(handle.path()).ok_or_else(|| {
                DealError::CorruptState {
                    instrument_id: self.instrument_id().to_string(),
                    reason: format!("unrecognized archive name {:?}", handle.path()),
                }
            })?,
        };

        let record = self.store.read(handle)?;
        let profit = match (
            record.execution_price(OrderSide::Buy),
            record.execution_price(OrderSide::Sell),
        ) {
            (Some(buy), Some(sell)) => Some((sell - buy) * self.trade.quantity),
            _ => None,
        };

        let text = match profit {
            Some(profit) => format!("Profit = {}", profit),
            None => "Profit unknown, execution prices missing".to_string(),
        };
        self.store.append(handle, AuditEvent::Note { text })?;
        info!(
            instrument = %self.instrument_id(),
            profit = ?profit,
            path = ?archived.path,
            "Profit"
        );

        Ok(DealSummary {
            instrument_id: self.instrument_id().to_string(),
            archived,
            profit,
        })
    }
}
