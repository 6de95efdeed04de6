use crate::{RunId, RunStage};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryView {
    pub runs: Vec<RunRowView>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRowView {
    pub run_id: RunId,
    pub stage: RunStage,
    pub item_count: usize,
    pub pending: usize,
    pub ready: usize,
    pub failed: usize,
}
