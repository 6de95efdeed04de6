use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{ItemId, Recipe};

/// Delay before retrying an operation that failed `attempts` times, with the
/// default policy: `min(60s, 2s * 2^attempts)`.
pub fn backoff(attempts: u32) -> Duration {
    BackoffPolicy::default().delay(attempts)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    Save { item: Recipe },
    Remove { item_id: ItemId },
    Reorder { item_ids: Vec<ItemId> },
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Save { .. } => "save",
            OperationKind::Remove { .. } => "remove",
            OperationKind::Reorder { .. } => "reorder",
        }
    }
}

/// A remote mutation that has not been acknowledged yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxOperation {
    pub id: String,
    #[serde(flatten)]
    pub kind: OperationKind,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
}

impl OutboxOperation {
    pub fn new(id: impl Into<String>, kind: OperationKind, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind,
            attempts: 0,
            next_attempt_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }

    /// Count a failed execution and push the next attempt out by the backoff delay.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &BackoffPolicy) {
        self.attempts = self.attempts.saturating_add(1);
        let delay = policy.delay(self.attempts);
        let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        self.next_attempt_at = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

/// Pending operations in enqueue order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxQueue {
    operations: Vec<OutboxOperation>,
}

impl OutboxQueue {
    pub fn new(operations: Vec<OutboxOperation>) -> Self {
        Self { operations }
    }

    pub fn push(&mut self, operation: OutboxOperation) {
        self.operations.push(operation);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[OutboxOperation] {
        &self.operations
    }

    pub fn head(&self) -> Option<&OutboxOperation> {
        self.operations.first()
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut OutboxOperation> {
        self.operations.iter_mut().find(|op| op.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<OutboxOperation> {
        let pos = self.operations.iter().position(|op| op.id == id)?;
        Some(self.operations.remove(pos))
    }
}
