use crate::{ItemId, ItemStatus, RunId, RunStage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// In-flight workers of this run must stop writing.
    CancelHydration { run_id: RunId },
    StageChanged { run_id: RunId, stage: RunStage },
    ItemSettled {
        run_id: RunId,
        item_id: ItemId,
        status: ItemStatus,
    },
}
