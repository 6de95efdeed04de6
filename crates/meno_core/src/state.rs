use crate::view_model::{RegistryView, RunRowView};
use crate::{GenerationRun, ItemStatus, RunId};

/// In-memory collection of generation runs, newest first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunRegistry {
    runs: Vec<GenerationRun>,
    dirty: bool,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, run_id: RunId) -> Option<&GenerationRun> {
        self.runs.iter().find(|run| run.id() == run_id)
    }

    pub fn runs(&self) -> &[GenerationRun] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn view(&self) -> RegistryView {
        RegistryView {
            runs: self
                .runs
                .iter()
                .map(|run| RunRowView {
                    run_id: run.id(),
                    stage: run.stage(),
                    item_count: run.items().len(),
                    pending: run.count(ItemStatus::Pending),
                    ready: run.count(ItemStatus::Ready),
                    failed: run.count(ItemStatus::Error),
                })
                .collect(),
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call, and resets the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn insert(&mut self, run: GenerationRun) {
        self.runs.retain(|existing| existing.id() != run.id());
        self.runs.insert(0, run);
    }

    pub(crate) fn run_mut(&mut self, run_id: RunId) -> Option<&mut GenerationRun> {
        self.runs.iter_mut().find(|run| run.id() == run_id)
    }

    pub(crate) fn remove(&mut self, run_id: RunId) -> bool {
        let before = self.runs.len();
        self.runs.retain(|run| run.id() != run_id);
        self.runs.len() != before
    }
}
