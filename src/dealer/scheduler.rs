//! Runs one deal task per configured instrument.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::executor::OrderExecutor;
use super::gate::PriceGate;
use super::machine::{DealStateMachine, DealSummary};
use crate::config::TradeConfig;
use crate::error::DealError;
use crate::persistence::DealStateStore;

/// How an instrument's task ended.
#[derive(Debug)]
pub enum DealOutcome {
    Completed(DealSummary),
    Failed {
        instrument_id: String,
        error: DealError,
    },
    /// The task panicked or was cancelled.
    Aborted {
        instrument_id: String,
        reason: String,
    },
}

impl DealOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, DealOutcome::Completed(_))
    }
}

pub struct DealScheduler {
    trades: Vec<TradeConfig>,
    store: Arc<DealStateStore>,
    gate: Arc<PriceGate>,
    executor: Arc<dyn OrderExecutor>,
    archive_dir: PathBuf,
}

impl DealScheduler {
    pub fn new(
        trades: Vec<TradeConfig>,
        store: Arc<DealStateStore>,
        gate: Arc<PriceGate>,
        executor: Arc<dyn OrderExecutor>,
        archive_dir: PathBuf,
    ) -> Self {
        Self {
            trades,
            store,
            gate,
            executor,
            archive_dir,
        }
    }

    /// Start every deal on its own task and return without waiting.
    ///
    /// A failing deal is logged with its instrument and ends only its own task.
    pub fn spawn_all(&self) -> Vec<JoinHandle<DealOutcome>> {
        self.trades
            .iter()
            .map(|trade| {
                let machine = DealStateMachine::new(
                    trade.clone(),
                    self.store.clone(),
                    self.gate.clone(),
                    self.executor.clone(),
                    self.archive_dir.clone(),
                );
                tokio::spawn(async move {
                    let instrument_id = machine.instrument_id().to_string();
                    match machine.run().await {
                        Ok(summary) => {
                            info!(
                                instrument = %instrument_id,
                                profit = ?summary.profit,
                                "Deal completed"
                            );
                            DealOutcome::Completed(summary)
                        }
                        Err(e) => {
                            error!(instrument = %instrument_id, error = %e, "Deal failed");
                            DealOutcome::Failed {
                                instrument_id,
                                error: e,
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Wait for the handles returned by [`spawn_all`](Self::spawn_all), in
    /// the same order.
    pub async fn join_all(&self, handles: Vec<JoinHandle<DealOutcome>>) -> Vec<DealOutcome> {
        futures_util::future::join_all(handles)
            .await
            .into_iter()
            .zip(&self.trades)
            .map(|(joined, trade)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(instrument = %trade.instrument_id, error = %e, "Deal task did not finish");
                    DealOutcome::Aborted {
                        instrument_id: trade.instrument_id.clone(),
                        reason: e.to_string(),
                    }
                }
            })
            .collect()
    }
}
