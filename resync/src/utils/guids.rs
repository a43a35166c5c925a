//! Braced GUID helpers for geodatabase style identifiers.

use uuid::Uuid;

/// Generates a new braced GUID, e.g. `{0f8fad5b-d9cb-469f-a165-70867728950e}`.
#[must_use]
pub fn generate_guid() -> String {
    format!("{{{}}}", Uuid::new_v4())
}

/// Normalises a GUID for comparison: no braces, lower case.
#[must_use]
pub fn normalize_guid(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .to_ascii_lowercase()
}
