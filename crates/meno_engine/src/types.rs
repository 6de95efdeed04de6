use std::fmt;

use meno_core::{ItemId, ItemStatus, RunId, RunStage};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    RunStageChanged {
        run_id: RunId,
        stage: RunStage,
    },
    ItemSettled {
        run_id: RunId,
        item_id: ItemId,
        status: ItemStatus,
    },
    HydrationCancelled {
        run_id: RunId,
    },
}

/// The summary generator or the item completer failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub message: String,
}

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A worker's result arrived after its hydration was cancelled or superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stale result for run {run_id}")]
pub struct StaleResult {
    pub run_id: RunId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    Encode,
    Decode,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::InvalidUrl => write!(f, "invalid url"),
            TransportKind::HttpStatus(code) => write!(f, "http status {code}"),
            TransportKind::Timeout => write!(f, "timeout"),
            TransportKind::Network => write!(f, "network error"),
            TransportKind::Encode => write!(f, "encode error"),
            TransportKind::Decode => write!(f, "decode error"),
        }
    }
}

/// The remote collection API failed; the outbox retries it with backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<TransportError> for UpstreamError {
    fn from(err: TransportError) -> Self {
        UpstreamError::new(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown run {0}")]
    UnknownRun(RunId),
    #[error("summary generation failed: {0}")]
    Upstream(#[from] UpstreamError),
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Tally of one `hydrate_run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HydrationReport {
    pub workers: usize,
    /// Items completed by the completer.
    pub hydrated: usize,
    /// Items served from the cache.
    pub cached: usize,
    pub failed: usize,
    /// Results thrown away because the hydration was superseded.
    pub discarded: usize,
    /// Whether at least one worker stopped on a stale token.
    pub superseded: bool,
}

impl HydrationReport {
    pub(crate) fn merge(&mut self, other: HydrationReport) {
        self.hydrated += other.hydrated;
        self.cached += other.cached;
        self.failed += other.failed;
        self.discarded += other.discarded;
        self.superseded |= other.superseded;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush holds the guard.
    AlreadyRunning,
    /// No remote collection is configured.
    NoRemote,
    /// The queue is empty.
    Drained,
    /// Operations remain: the head failed or is waiting out its backoff.
    Pending { remaining: usize },
}
