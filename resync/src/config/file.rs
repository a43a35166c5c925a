//! JSON configuration files.
//!
//! Parameter keys may sit at the top level, inside a named section, or both;
//! top-level keys act as defaults for every section:
//!
//! ```json
//! {
//!   "timezone": "Australia/Brisbane",
//!   "sections": {
//!     "birds": { "prefix": "bird", "destination": "birds.gdb", ... }
//!   }
//! }
//! ```

use super::parameters::RawParameters;
use crate::errors::ConfigError;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

const SECTIONS_KEY: &str = "sections";

/// Reads raw parameters from a configuration file.
pub fn load_parameters(path: &Path, section: Option<&str>) -> Result<RawParameters, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| file_error(path, e.to_string()))?;
    parse_parameters(&text, section).map_err(|reason| file_error(path, reason))
}

/// Parses raw parameters from configuration text.
pub fn parse_parameters(text: &str, section: Option<&str>) -> Result<RawParameters, String> {
    let document: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let Value::Object(mut root) = document else {
        return Err("expected a JSON object".to_string());
    };

    let sections = root.remove(SECTIONS_KEY);
    let mut merged: Map<String, Value> = root;
    if let Some(name) = section {
        let overrides = sections
            .as_ref()
            .and_then(|s| s.get(name))
            .and_then(Value::as_object)
            .ok_or_else(|| {
                format!(
                    "no section [{name}] (available: {})",
                    section_names(text).join(", ")
                )
            })?;
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }

    serde_json::from_value(Value::Object(merged)).map_err(|e| e.to_string())
}

/// Lists the section names a configuration file defines.
#[must_use]
pub fn section_names(text: &str) -> Vec<String> {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|doc| doc.get(SECTIONS_KEY).and_then(Value::as_object).cloned())
        .map(|sections| sections.keys().cloned().collect())
        .unwrap_or_default()
}

fn file_error(path: &Path, reason: String) -> ConfigError {
    ConfigError::File {
        path: path.display().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"{
        "timezone": "Australia/Brisbane",
        "portal": "https://www.arcgis.com",
        "reprojection": "7856",
        "extract": { "poll_interval_seconds": 5 },
        "sections": {
            "birds": {
                "sde_conn": "birds.gdb",
                "prefix": "bird",
                "service_url": "https://services.arcgis.com/x/FeatureServer"
            },
            "frogs": { "prefix": "frog", "timezone": "UTC" }
        }
    }"#;

    #[test]
    fn test_section_overrides_top_level() {
        let raw = parse_parameters(CONFIG, Some("frogs")).unwrap();

        assert_eq!(raw.prefix.as_deref(), Some("frog"));
        assert_eq!(raw.timezone.as_deref(), Some("UTC"));
        assert_eq!(raw.portal.as_deref(), Some("https://www.arcgis.com"));
    }

    #[test]
    fn test_section_validates_with_defaults() {
        let parameters = parse_parameters(CONFIG, Some("birds"))
            .unwrap()
            .validate()
            .unwrap();

        assert_eq!(parameters.destination, "birds.gdb");
        assert!((parameters.extract.poll_interval_seconds - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_section() {
        let err = parse_parameters(CONFIG, Some("bats")).unwrap_err();
        assert_eq!(err, "no section [bats] (available: birds, frogs)");
    }

    #[test]
    fn test_top_level_only() {
        let raw = parse_parameters(CONFIG, None).unwrap();
        assert!(raw.prefix.is_none());
        assert_eq!(section_names(CONFIG), vec!["birds".to_string(), "frogs".to_string()]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let raw = load_parameters(file.path(), Some("birds")).unwrap();
        assert_eq!(raw.destination.as_deref(), Some("birds.gdb"));

        let err = load_parameters(Path::new("/nonexistent/resync.json"), None).unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }
}
