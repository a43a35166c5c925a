//! Source to destination field routing for appends.

use crate::store::{FieldMap, FieldType, TableSchema};
use regex::Regex;

/// Builds the field map used to append `source` rows into `destination`.
///
/// A source field maps to the destination field of the same name. Failing
/// that, destination names are searched case-insensitively for the source
/// name (schema tools append `_` or punctuation when they rename), and only
/// an unambiguous single candidate is used.
/// Geometry fields are never mapped; the append carries them implicitly.
#[must_use]
pub fn build_field_map(source: &TableSchema, destination: &TableSchema) -> FieldMap {
    let mut map = FieldMap::default();
    for field in &source.fields {
        if field.field_type == FieldType::Geometry {
            continue;
        }
        if let Some(exact) = destination.fields.iter().find(|d| d.name == field.name) {
            map.map(&field.name, &exact.name);
            continue;
        }

        let candidates: Vec<&str> = match Regex::new(&format!(
            "(?i){}\\W*",
            regex::escape(&field.name)
        )) {
            Ok(pattern) => destination
                .fields
                .iter()
                .filter(|d| d.field_type != FieldType::Geometry && pattern.is_match(&d.name))
                .map(|d| d.name.as_str())
                .collect(),
            Err(_) => Vec::new(),
        };
        match candidates.as_slice() {
            [only] => map.map(&field.name, *only),
            _ => map.unmapped.push(field.name.clone()),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldDef, GeometryType};
    use pretty_assertions::assert_eq;

    fn schema(names: &[&str]) -> TableSchema {
        let mut fields: Vec<FieldDef> = names
            .iter()
            .map(|n| FieldDef::new(*n, FieldType::Text))
            .collect();
        fields.push(FieldDef::new("Shape", FieldType::Geometry));
        TableSchema::feature_class("t", GeometryType::Point, None, fields)
    }

    #[test]
    fn test_exact_match_wins() {
        let map = build_field_map(&schema(&["site", "count"]), &schema(&["site", "count", "SITE_"]));
        assert_eq!(map.destination_for("site"), Some("site"));
        assert_eq!(map.destination_for("count"), Some("count"));
        assert!(map.unmapped.is_empty());
    }

    #[test]
    fn test_renamed_fields_are_matched() {
        let map = build_field_map(&schema(&["Observer"]), &schema(&["observer_"]));
        assert_eq!(map.destination_for("Observer"), Some("observer_"));
        assert!(map.unmapped.is_empty());

        let map = build_field_map(&schema(&["Date"]), &schema(&["DATE_"]));
        assert_eq!(map.destination_for("Date"), Some("DATE_"));

        let map = build_field_map(&schema(&["Observer"]), &schema(&["OBSERVER#"]));
        assert_eq!(map.destination_for("Observer"), Some("OBSERVER#"));
    }

    #[test]
    fn test_unrelated_destination_fields_are_ignored() {
        let map = build_field_map(&schema(&["species"]), &schema(&["site", "count"]));
        assert_eq!(map.unmapped, vec!["species".to_string()]);
    }

    #[test]
    fn test_ambiguous_candidates_are_left_unmapped() {
        let map = build_field_map(&schema(&["note"]), &schema(&["NOTE ", "Note."]));
        assert!(map.destination_for("note").is_none());
        assert_eq!(map.unmapped, vec!["note".to_string()]);
    }

    #[test]
    fn test_geometry_is_never_mapped() {
        let map = build_field_map(&schema(&[]), &schema(&[]));
        assert!(map.is_empty());
        assert!(map.unmapped.is_empty());
    }

    #[test]
    fn test_regex_metacharacters_in_names() {
        let map = build_field_map(&schema(&["a.b"]), &schema(&["AXB", "A.B!"]));
        assert_eq!(map.destination_for("a.b"), Some("A.B!"));
    }
}
