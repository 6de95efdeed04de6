use std::sync::mpsc;

use meno_core::{GenerationRequest, ItemId, Recipe, RecipeSummary, UserPreferences};

use crate::{EngineEvent, TransportError, UpstreamError};

#[async_trait::async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn generate(
        &self,
        preferences: &UserPreferences,
        request: &GenerationRequest,
        count: usize,
    ) -> Result<Vec<RecipeSummary>, UpstreamError>;
}

/// Turns a summary into a full recipe. Calls may take arbitrarily long.
#[async_trait::async_trait]
pub trait ItemCompleter: Send + Sync {
    async fn complete(
        &self,
        preferences: &UserPreferences,
        request: &GenerationRequest,
        summary: &RecipeSummary,
    ) -> Result<Recipe, UpstreamError>;
}

/// The authoritative cookbook on the server.
///
/// `delete` and `set_order` must tolerate ids the server has never seen.
#[async_trait::async_trait]
pub trait RemoteCollection: Send + Sync {
    async fn list(&self) -> Result<Vec<Recipe>, TransportError>;
    async fn create(&self, item: &Recipe) -> Result<(), TransportError>;
    async fn delete(&self, item_id: &str) -> Result<(), TransportError>;
    async fn set_order(&self, item_ids: &[ItemId]) -> Result<(), TransportError>;
}

/// Receives engine events in transition order. Called with the engine's
/// emission lock held, so implementations must not call back into the engine.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

pub struct ChannelProgressSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: EngineEvent) {}
}
