use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RunId = u64;
pub type ItemId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Vibe {
    #[default]
    Comfort,
    Fresh,
    HighProtein,
    Impress,
    Light,
}

impl Vibe {
    pub fn as_str(self) -> &'static str {
        match self {
            Vibe::Comfort => "comfort",
            Vibe::Fresh => "fresh",
            Vibe::HighProtein => "high-protein",
            Vibe::Impress => "impress",
            Vibe::Light => "light",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
        }
    }
}

/// Parameters of one generation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Time target in minutes.
    pub time: u32,
    pub vibe: Vibe,
    pub difficulty: Difficulty,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            time: 30,
            vibe: Vibe::default(),
            difficulty: Difficulty::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DietaryRestriction {
    #[default]
    None,
    Vegetarian,
    Vegan,
    GlutenFree,
    Kosher,
    Halal,
}

impl DietaryRestriction {
    pub fn as_str(self) -> &'static str {
        match self {
            DietaryRestriction::None => "none",
            DietaryRestriction::Vegetarian => "vegetarian",
            DietaryRestriction::Vegan => "vegan",
            DietaryRestriction::GlutenFree => "gluten-free",
            DietaryRestriction::Kosher => "kosher",
            DietaryRestriction::Halal => "halal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpiceLevel {
    Low,
    #[default]
    Med,
    High,
}

impl SpiceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SpiceLevel::Low => "low",
            SpiceLevel::Med => "med",
            SpiceLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub dietary_restriction: DietaryRestriction,
    pub allergies: Vec<String>,
    pub cuisines_liked: Vec<String>,
    pub spice_level: SpiceLevel,
    pub onboarding_complete: bool,
}

/// Cheap draft of a candidate recipe, produced before hydration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeSummary {
    pub id: ItemId,
    pub title: String,
    pub cuisine: String,
    pub total_time_minutes: u32,
    pub difficulty: String,
    pub short_hook: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ingredient {
    pub name: String,
    pub quantity: String,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeStep {
    pub idx: u32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeSubstitution {
    pub ingredient: String,
    pub substitutes: Vec<String>,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionState {
    Summary,
    #[default]
    Full,
}

/// A fully hydrated recipe, and the item kept in the cookbook.
///
/// The lineage fields are absent on freshly generated recipes and filled in
/// when the recipe is first saved.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Recipe {
    pub id: ItemId,
    pub title: String,
    pub cuisine: String,
    pub servings: u32,
    pub total_time_minutes: u32,
    pub difficulty: String,
    pub short_hook: String,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<RecipeStep>,
    pub substitutions: Vec<RecipeSubstitution>,
    pub dietary_tags: Vec<String>,
    pub allergen_warnings: Vec<String>,
    pub completion_state: CompletionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_id: Option<ItemId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub based_on_id: Option<ItemId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}
