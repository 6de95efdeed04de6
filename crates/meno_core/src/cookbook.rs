use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lineage::{apply_save_defaults, derive_revision};
use crate::{ItemId, Recipe};

/// The user's saved recipes, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cookbook {
    items: Vec<Recipe>,
}

/// Outcome of [`Cookbook::add_revision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionOutcome {
    pub revision: Recipe,
    /// Whether the revision was actually inserted.
    pub inserted: bool,
    /// Base id removed because the caller asked to replace it.
    pub replaced: Option<ItemId>,
}

impl Cookbook {
    pub fn new(items: Vec<Recipe>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[Recipe] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Recipe> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Recipe> {
        self.items.iter().find(|recipe| recipe.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|recipe| recipe.id.clone()).collect()
    }

    /// Insert at the front with lineage defaults. Returns false, leaving the
    /// cookbook untouched, when the id is already saved.
    pub fn add(&mut self, mut recipe: Recipe, now: DateTime<Utc>) -> bool {
        if self.contains(&recipe.id) {
            return false;
        }
        apply_save_defaults(&mut recipe, now);
        self.items.insert(0, recipe);
        true
    }

    /// Save `revised` as the next version of `base_id`.
    ///
    /// Without a saved base the revision is treated as a plain [`Cookbook::add`]
    /// and keeps its own id. Otherwise it takes `new_id`, inherits the base's
    /// family, and lands in the base's slot when `replace_base` is set (the
    /// base is removed) or at the front otherwise.
    pub fn add_revision(
        &mut self,
        base_id: &str,
        revised: Recipe,
        replace_base: bool,
        change_note: Option<String>,
        new_id: ItemId,
        now: DateTime<Utc>,
    ) -> RevisionOutcome {
        let Some(base_index) = self.items.iter().position(|recipe| recipe.id == base_id) else {
            let mut revision = revised;
            if change_note.is_some() {
                revision.change_note = change_note;
            }
            let inserted = self.add(revision.clone(), now);
            let revision = self.get(&revision.id).cloned().unwrap_or(revision);
            return RevisionOutcome {
                revision,
                inserted,
                replaced: None,
            };
        };

        let revision = derive_revision(
            &self.items[base_index],
            &self.items,
            revised,
            new_id,
            change_note,
            now,
        );

        let replaced = if replace_base {
            let base = self.items.remove(base_index);
            self.items.insert(base_index, revision.clone());
            Some(base.id)
        } else {
            self.items.insert(0, revision.clone());
            None
        };

        RevisionOutcome {
            revision,
            inserted: true,
            replaced,
        }
    }

    /// Remove every listed id. Returns the ids that were actually present.
    pub fn remove_many(&mut self, ids: &[ItemId]) -> Vec<ItemId> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut removed = Vec::new();
        self.items.retain(|recipe| {
            if wanted.contains(recipe.id.as_str()) {
                removed.push(recipe.id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Listed ids first, in the given order; unlisted items keep their
    /// relative order behind them. Unknown ids are ignored. Returns the full
    /// resulting order.
    pub fn reorder(&mut self, ordered_ids: &[ItemId]) -> Vec<ItemId> {
        let mut remaining = std::mem::take(&mut self.items);
        let mut ordered = Vec::with_capacity(remaining.len());
        for id in ordered_ids {
            if let Some(pos) = remaining.iter().position(|recipe| &recipe.id == id) {
                ordered.push(remaining.remove(pos));
            }
        }
        ordered.extend(remaining);
        self.items = ordered;
        self.ids()
    }

    /// Selected items first, in their current relative order.
    pub fn move_to_top(&mut self, ids: &[ItemId]) -> Vec<ItemId> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let (selected, rest): (Vec<Recipe>, Vec<Recipe>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|recipe| wanted.contains(recipe.id.as_str()));
        self.items = selected;
        self.items.extend(rest);
        self.ids()
    }

    pub fn replace_all(&mut self, items: Vec<Recipe>) {
        self.items = items;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recipe(id: &str) -> Recipe {
        Recipe {
            id: id.to_string(),
            ..Recipe::default()
        }
    }

    fn book(ids: &[&str]) -> Cookbook {
        Cookbook::new(ids.iter().map(|id| recipe(id)).collect())
    }

    #[test]
    fn add_is_rejected_for_saved_ids() {
        let mut cookbook = Cookbook::default();
        assert!(cookbook.add(recipe("a"), Utc::now()));
        assert!(!cookbook.add(recipe("a"), Utc::now()));
        assert_eq!(cookbook.len(), 1);
    }

    #[test]
    fn add_puts_newest_first() {
        let mut cookbook = book(&["a"]);
        cookbook.add(recipe("b"), Utc::now());
        assert_eq!(cookbook.ids(), vec!["b", "a"]);
    }

    #[test]
    fn reorder_keeps_unlisted_items_behind() {
        let mut cookbook = book(&["a", "b", "c", "d"]);
        let order = cookbook.reorder(&["c".into(), "zz".into(), "a".into()]);
        assert_eq!(order, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn move_to_top_keeps_relative_order() {
        let mut cookbook = book(&["a", "b", "c", "d"]);
        let order = cookbook.move_to_top(&["d".into(), "b".into()]);
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn remove_many_reports_present_ids() {
        let mut cookbook = book(&["a", "b"]);
        let removed = cookbook.remove_many(&["b".into(), "x".into()]);
        assert_eq!(removed, vec!["b"]);
        assert_eq!(cookbook.ids(), vec!["a"]);
    }

    #[test]
    fn replacing_revision_takes_the_base_slot() {
        let mut cookbook = book(&["x", "r1", "y"]);
        let outcome = cookbook.add_revision(
            "r1",
            recipe("ignored"),
            true,
            None,
            "r1-v2".into(),
            Utc::now(),
        );
        assert_eq!(outcome.replaced.as_deref(), Some("r1"));
        assert_eq!(cookbook.ids(), vec!["x", "r1-v2", "y"]);
        assert_eq!(outcome.revision.version_number, Some(2));
    }

    #[test]
    fn revision_without_base_is_a_plain_save() {
        let mut cookbook = Cookbook::default();
        let outcome = cookbook.add_revision(
            "missing",
            recipe("fresh"),
            true,
            Some("note".into()),
            "unused".into(),
            Utc::now(),
        );
        assert!(outcome.inserted);
        assert_eq!(outcome.revision.id, "fresh");
        assert_eq!(outcome.revision.version_number, Some(1));
        assert_eq!(outcome.revision.family_id.as_deref(), Some("fresh"));
        assert!(outcome.revision.based_on_id.is_none());
        assert!(outcome.replaced.is_none());
    }
}
