//! Step log for multi-step fund movement.
//!
//! Every on-chain step of a transfer or swap is appended here and persisted
//! through [`SagaStore`], so a partial failure is observable after the fact.
//! There is deliberately no compensation path: a failure after `Pulled`
//! leaves funds in the custodial account, and the executor surfaces that
//! state with a warning instead of hiding it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exec::pending::OperationKind;

/// One executed step of a saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SagaStep {
    /// Spend calls landed; funds are now in custody.
    Pulled {
        operation_id: String,
        amount: u128,
        spend_calls: usize,
    },
    /// Custody holds at least the required amount.
    BalanceVerified { balance: u128 },
    /// Swap-router allowance granted from custody.
    Approved { operation_id: String },
    Swapped {
        operation_id: String,
        transaction_hash: Option<String>,
    },
    Transferred {
        operation_id: String,
        transaction_hash: Option<String>,
    },
    /// Destination funds handed back out of custody.
    Forwarded {
        operation_id: String,
        amount: u128,
    },
}

impl SagaStep {
    fn releases_custody(&self) -> bool {
        matches!(self, Self::Transferred { .. } | Self::Forwarded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub step: SagaStep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SagaOutcome {
    Running,
    Succeeded,
    Failed { error: String },
}

/// The persisted record of one fund movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaLog {
    pub id: Uuid,
    pub kind: OperationKind,
    /// Grantor whose funds move.
    pub sender: String,
    /// Custodial smart account executing the steps.
    pub smart_account: String,
    /// Required base-unit amount.
    pub amount: u128,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
    pub outcome: SagaOutcome,
}

impl SagaLog {
    pub fn begin(
        kind: OperationKind,
        sender: impl Into<String>,
        smart_account: impl Into<String>,
        amount: u128,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender: sender.into(),
            smart_account: smart_account.into(),
            amount,
            started_at: Utc::now(),
            steps: Vec::new(),
            outcome: SagaOutcome::Running,
        }
    }

    pub fn push(&mut self, step: SagaStep) {
        self.steps.push(StepRecord {
            at: Utc::now(),
            step,
        });
    }

    pub fn has_pulled(&self) -> bool {
        self.steps
            .iter()
            .any(|r| matches!(r.step, SagaStep::Pulled { .. }))
    }

    /// True when custody took funds in but never released them. This is the
    /// known partial-failure state with no automatic recovery.
    pub fn funds_stranded(&self) -> bool {
        self.has_pulled() && !self.steps.iter().any(|r| r.step.releases_custody())
    }
}

/// Persistence seam for saga logs. Recording must never block the money
/// path, so the interface is infallible; durable backends own their retries.
#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn record(&self, log: &SagaLog);

    async fn load(&self, id: Uuid) -> Option<SagaLog>;

    /// Sagas started by `sender`, most recent first.
    async fn for_sender(&self, sender: &str) -> Vec<SagaLog>;
}

/// Process-local saga store.
#[derive(Default)]
pub struct InMemorySagaStore {
    logs: tokio::sync::RwLock<HashMap<Uuid, SagaLog>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn record(&self, log: &SagaLog) {
        self.logs.write().await.insert(log.id, log.clone());
    }

    async fn load(&self, id: Uuid) -> Option<SagaLog> {
        self.logs.read().await.get(&id).cloned()
    }

    async fn for_sender(&self, sender: &str) -> Vec<SagaLog> {
        let mut logs: Vec<SagaLog> = self
            .logs
            .read()
            .await
            .values()
            .filter(|log| log.sender.eq_ignore_ascii_case(sender))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        logs
    }
}
