//! Simulated Flow network for the demo command.
//!
//! Submissions return after one step; a background task then walks the
//! transaction through its status codes on a replaying
//! [`MemoryStatusStream`], so a subscription opened after the first emit
//! still sees the latest status.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flowtx::actions::{QueryAction, ScriptRequest, SubmitAction, TransactionRequest};
use flowtx::cadence::UFix64;
use flowtx::error::ProviderError;
use flowtx::memory::MemoryStatusStream;
use flowtx::status::{TxId, TxStatusCode, TxStatusUpdate};
use flowtx::subscription::{Registration, StatusCallback, StatusStreamProvider};
use tracing::{debug, info};

/// How the simulated network treats the next submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Pending, finalized, executed, sealed.
    Seal,
    /// Pending, then dropped.
    Expire,
    /// Sealed with an execution error.
    Revert,
    /// The user rejects the wallet prompt.
    Cancel,
}

impl Scenario {
    fn statuses(self) -> Vec<TxStatusUpdate> {
        match self {
            Self::Seal => vec![
                TxStatusCode::Pending.into(),
                TxStatusCode::Finalized.into(),
                TxStatusCode::Executed.into(),
                TxStatusCode::Sealed.into(),
            ],
            Self::Expire => vec![TxStatusCode::Pending.into(), TxStatusCode::Expired.into()],
            Self::Revert => vec![
                TxStatusCode::Pending.into(),
                TxStatusCode::Finalized.into(),
                TxStatusCode::Executed.into(),
                TxStatusUpdate::failed(
                    TxStatusCode::Sealed,
                    "[Error Code: 1101] cadence runtime error: Amount withdrawn must be less than or equal than the balance of the Vault",
                ),
            ],
            Self::Cancel => Vec::new(),
        }
    }
}

/// In-process stand-in for the wallet's submit action, the access node and
/// the status stream.
#[derive(Debug)]
pub struct SimulatedNetwork {
    stream: MemoryStatusStream,
    scenario: Scenario,
    step: Duration,
    balance: UFix64,
    counter: AtomicU64,
}

impl SimulatedNetwork {
    /// A network that plays `scenario` with `step` between status changes.
    pub fn new(scenario: Scenario, step: Duration, balance: UFix64) -> Self {
        Self {
            stream: MemoryStatusStream::replaying(),
            scenario,
            step,
            balance,
            counter: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> TxId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        TxId::new(format!("{n:064x}"))
    }
}

#[async_trait]
impl SubmitAction for SimulatedNetwork {
    async fn submit(&self, request: TransactionRequest) -> Result<TxId, ProviderError> {
        debug!(
            args = request.args.len(),
            compute_limit = request.compute_limit,
            "simulated submit"
        );
        tokio::time::sleep(self.step).await;
        if self.scenario == Scenario::Cancel {
            return Err(ProviderError::new("User rejected signature"));
        }

        let id = self.next_id();
        let stream = self.stream.clone();
        let statuses = self.scenario.statuses();
        let step = self.step;
        let tx_id = id.clone();
        tokio::spawn(async move {
            for update in statuses {
                tokio::time::sleep(step).await;
                let delivered = stream.emit(&tx_id, update);
                if delivered == 0 {
                    debug!(tx_id = %tx_id, "no listener for simulated status");
                }
            }
        });
        info!(tx_id = %id, scenario = ?self.scenario, "simulated transaction accepted");
        Ok(id)
    }
}

#[async_trait]
impl QueryAction for SimulatedNetwork {
    async fn query(&self, request: ScriptRequest) -> Result<serde_json::Value, ProviderError> {
        debug!(args = request.args.len(), "simulated query");
        tokio::time::sleep(self.step).await;
        Ok(serde_json::Value::String(self.balance.to_string()))
    }
}

impl StatusStreamProvider for SimulatedNetwork {
    fn subscribe_status(
        &self,
        id: &TxId,
        on_update: StatusCallback,
    ) -> Result<Registration, ProviderError> {
        self.stream.subscribe_status(id, on_update)
    }
}
