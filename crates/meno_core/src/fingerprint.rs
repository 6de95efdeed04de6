use serde_json::json;
use sha2::{Digest, Sha256};

use crate::{GenerationRequest, UserPreferences};

/// Deterministic cache namespace for a request and the preferences it ran with.
///
/// The canonical form is a JSON object with sorted keys; the set-like
/// preference lists are sorted too, so their order never changes the hash.
/// The onboarding flag does not take part.
pub fn request_fingerprint(request: &GenerationRequest, preferences: &UserPreferences) -> String {
    let mut allergies: Vec<&str> = preferences.allergies.iter().map(String::as_str).collect();
    allergies.sort_unstable();
    allergies.dedup();
    let mut cuisines: Vec<&str> = preferences
        .cuisines_liked
        .iter()
        .map(String::as_str)
        .collect();
    cuisines.sort_unstable();
    cuisines.dedup();

    let canonical = json!({
        "request": {
            "time": request.time,
            "vibe": request.vibe.as_str(),
            "difficulty": request.difficulty.as_str(),
        },
        "dietaryRestriction": preferences.dietary_restriction.as_str(),
        "allergies": allergies,
        "cuisinesLiked": cuisines,
        "spiceLevel": preferences.spice_level.as_str(),
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
