//! Meno core: pure run registry state machine, cookbook lineage and outbox queue model.
mod cookbook;
mod effect;
mod fingerprint;
pub mod lineage;
mod msg;
mod outbox;
mod run;
mod state;
mod types;
mod update;
mod view_model;

pub use cookbook::{Cookbook, RevisionOutcome};
pub use effect::Effect;
pub use fingerprint::request_fingerprint;
pub use msg::RunMsg;
pub use outbox::{backoff, BackoffPolicy, OperationKind, OutboxOperation, OutboxQueue};
pub use run::{GenerationRun, ItemStatus, RunStage};
pub use state::RunRegistry;
pub use types::{
    CompletionState, DietaryRestriction, Difficulty, GenerationRequest, Ingredient, ItemId,
    Recipe, RecipeStep, RecipeSubstitution, RecipeSummary, RunId, SpiceLevel, UserPreferences,
    Vibe,
};
pub use update::update;
pub use view_model::{RegistryView, RunRowView};
