use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::fingerprint::request_fingerprint;
use crate::{GenerationRequest, ItemId, Recipe, RecipeSummary, RunId, UserPreferences};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStage {
    SummariesReady,
    Hydrating,
    Done,
}

/// One batch of generated candidates and their hydration bookkeeping.
///
/// Every item in `items` has exactly one status entry; `stage` is `Done`
/// exactly when no status is `Pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRun {
    id: RunId,
    created_at: DateTime<Utc>,
    request: GenerationRequest,
    preferences: UserPreferences,
    request_fingerprint: String,
    items: Vec<RecipeSummary>,
    content_by_item_id: HashMap<ItemId, Recipe>,
    status_by_item_id: HashMap<ItemId, ItemStatus>,
    error_by_item_id: HashMap<ItemId, String>,
    stage: RunStage,
}

impl GenerationRun {
    /// Build a run with every item pending. Summaries repeating an earlier id
    /// are dropped.
    pub fn new(
        id: RunId,
        created_at: DateTime<Utc>,
        request: GenerationRequest,
        preferences: UserPreferences,
        summaries: Vec<RecipeSummary>,
    ) -> Self {
        let request_fingerprint = request_fingerprint(&request, &preferences);
        let mut seen = HashSet::new();
        let items: Vec<RecipeSummary> = summaries
            .into_iter()
            .filter(|summary| seen.insert(summary.id.clone()))
            .collect();
        let status_by_item_id = items
            .iter()
            .map(|summary| (summary.id.clone(), ItemStatus::Pending))
            .collect();

        let mut run = Self {
            id,
            created_at,
            request,
            preferences,
            request_fingerprint,
            items,
            content_by_item_id: HashMap::new(),
            status_by_item_id,
            error_by_item_id: HashMap::new(),
            stage: RunStage::SummariesReady,
        };
        run.refresh_stage();
        run
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn preferences(&self) -> &UserPreferences {
        &self.preferences
    }

    pub fn request_fingerprint(&self) -> &str {
        &self.request_fingerprint
    }

    pub fn items(&self) -> &[RecipeSummary] {
        &self.items
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn summary(&self, item_id: &str) -> Option<&RecipeSummary> {
        self.items.iter().find(|summary| summary.id == item_id)
    }

    pub fn status(&self, item_id: &str) -> Option<ItemStatus> {
        self.status_by_item_id.get(item_id).copied()
    }

    pub fn content(&self, item_id: &str) -> Option<&Recipe> {
        self.content_by_item_id.get(item_id)
    }

    pub fn error(&self, item_id: &str) -> Option<&str> {
        self.error_by_item_id.get(item_id).map(String::as_str)
    }

    pub fn statuses(&self) -> &HashMap<ItemId, ItemStatus> {
        &self.status_by_item_id
    }

    pub fn has_pending(&self) -> bool {
        self.status_by_item_id
            .values()
            .any(|status| *status == ItemStatus::Pending)
    }

    /// Pending item ids, in item order.
    pub fn pending_item_ids(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|summary| self.status(&summary.id) == Some(ItemStatus::Pending))
            .map(|summary| summary.id.clone())
            .collect()
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.status_by_item_id
            .values()
            .filter(|s| **s == status)
            .count()
    }

    pub(crate) fn begin_hydration(&mut self) {
        self.stage = if self.has_pending() {
            RunStage::Hydrating
        } else {
            RunStage::Done
        };
    }

    pub(crate) fn mark_ready(&mut self, item_id: &str, content: Recipe) -> bool {
        if self.status(item_id) != Some(ItemStatus::Pending) {
            return false;
        }
        self.content_by_item_id.insert(item_id.to_string(), content);
        self.error_by_item_id.remove(item_id);
        self.status_by_item_id
            .insert(item_id.to_string(), ItemStatus::Ready);
        self.refresh_stage();
        true
    }

    pub(crate) fn mark_error(&mut self, item_id: &str, message: String) -> bool {
        if self.status(item_id) != Some(ItemStatus::Pending) {
            return false;
        }
        self.error_by_item_id.insert(item_id.to_string(), message);
        self.status_by_item_id
            .insert(item_id.to_string(), ItemStatus::Error);
        self.refresh_stage();
        true
    }

    pub(crate) fn remove_item(&mut self, item_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|summary| summary.id != item_id);
        if self.items.len() == before {
            return false;
        }
        self.status_by_item_id.remove(item_id);
        self.content_by_item_id.remove(item_id);
        self.error_by_item_id.remove(item_id);
        self.refresh_stage();
        true
    }

    /// Put every failed item back to pending. Returns how many were reset.
    pub(crate) fn reset_failed(&mut self) -> usize {
        let mut reset = 0;
        for status in self.status_by_item_id.values_mut() {
            if *status == ItemStatus::Error {
                *status = ItemStatus::Pending;
                reset += 1;
            }
        }
        if reset > 0 {
            self.error_by_item_id.clear();
            if self.stage == RunStage::Done {
                self.stage = RunStage::SummariesReady;
            }
        }
        reset
    }

    fn refresh_stage(&mut self) {
        if !self.has_pending() {
            self.stage = RunStage::Done;
        } else if self.stage == RunStage::Done {
            self.stage = RunStage::Hydrating;
        }
    }
}
