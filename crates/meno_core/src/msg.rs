use crate::{GenerationRun, ItemId, Recipe, RunId};

#[derive(Debug, Clone, PartialEq)]
pub enum RunMsg {
    /// Summaries arrived and a new run was built.
    RunCreated(GenerationRun),
    /// Hydration (re)started for a run.
    HydrationStarted { run_id: RunId },
    /// A worker completed an item, from the cache or the completer.
    ItemHydrated {
        run_id: RunId,
        item_id: ItemId,
        content: Recipe,
    },
    /// A worker gave up on an item.
    ItemFailed {
        run_id: RunId,
        item_id: ItemId,
        message: String,
    },
    /// Failed items go back to pending.
    FailedItemsReset { run_id: RunId },
    /// User removed a whole run.
    RunRemoved { run_id: RunId },
    /// User removed one item from a run.
    ItemRemoved { run_id: RunId, item_id: ItemId },
    NoOp,
}
