//! Version lineage of saved recipes.
//!
//! A family is the set of revisions sharing a `family_id`. The first version
//! of a family carries its own id as `family_id` and `version_number == 1`.

use chrono::{DateTime, Utc};

use crate::{ItemId, Recipe};

/// Family the recipe belongs to; legacy items without lineage are their own family.
pub fn family_of(recipe: &Recipe) -> &str {
    recipe.family_id.as_deref().unwrap_or(&recipe.id)
}

pub fn version_of(recipe: &Recipe) -> u32 {
    recipe.version_number.unwrap_or(1)
}

/// Fill the lineage fields a first save needs, keeping any that are set.
pub fn apply_save_defaults(recipe: &mut Recipe, now: DateTime<Utc>) {
    if recipe.family_id.is_none() {
        recipe.family_id = Some(recipe.id.clone());
    }
    if recipe.version_number.is_none() {
        recipe.version_number = Some(1);
    }
    if recipe.created_at.is_none() {
        recipe.created_at = Some(now);
    }
}

/// Next free version number in `family_id` across `collection`.
pub fn next_version<'a, I>(collection: I, family_id: &str) -> u32
where
    I: IntoIterator<Item = &'a Recipe>,
{
    collection
        .into_iter()
        .filter(|recipe| family_of(recipe) == family_id)
        .map(version_of)
        .max()
        .unwrap_or(0)
        + 1
}

/// Build a revision of `base` from `revised`, numbered after every member of
/// the base's family in `collection`.
pub fn derive_revision<'a, I>(
    base: &Recipe,
    collection: I,
    mut revised: Recipe,
    new_id: ItemId,
    change_note: Option<String>,
    now: DateTime<Utc>,
) -> Recipe
where
    I: IntoIterator<Item = &'a Recipe>,
{
    let family_id = family_of(base).to_string();
    let version = next_version(collection, &family_id).max(version_of(base) + 1);
    revised.id = new_id;
    revised.family_id = Some(family_id);
    revised.version_number = Some(version);
    revised.based_on_id = Some(base.id.clone());
    revised.change_note = change_note;
    revised.created_at = Some(now);
    revised
}
