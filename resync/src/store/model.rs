//! Schema and row types shared by every workspace implementation.

use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field holding the synchronisation stamp on every migrated table.
pub const SYNC_TIME_FIELD: &str = "SYS_TRANSFER_DATE";

/// Editor tracking field holding a record's creation time.
pub const CREATION_DATE_FIELD: &str = "CreationDate";

/// Editor tracking field holding a record's last edit time.
pub const EDIT_DATE_FIELD: &str = "EditDate";

/// Locally unique row identifier used to re-key attachments.
pub const ROW_ID_FIELD: &str = "rowid";

/// Global identifier field.
pub const GLOBAL_ID_FIELD: &str = "GlobalID";

/// Parent reference column of an attachment table.
pub const PARENT_REFERENCE_FIELD: &str = "REL_GLOBALID";

/// Name suffix of attachment tables.
pub const ATTACHMENT_SUFFIX: &str = "__ATTACH";

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Store assigned object id.
    ObjectId,
    /// Store assigned global id.
    GlobalId,
    /// User managed GUID.
    Guid,
    /// Text.
    Text,
    /// Integer.
    Integer,
    /// Double precision number.
    Double,
    /// Date and time.
    Date,
    /// Geometry (shape) field.
    Geometry,
}

impl FieldType {
    /// Returns true for fields whose values the store assigns on insert.
    #[must_use]
    pub fn is_store_assigned(self) -> bool {
        matches!(self, Self::ObjectId | Self::GlobalId)
    }
}

/// A field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Storage type.
    pub field_type: FieldType,
    /// Attribute domain assigned to the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Whether a value is required.
    #[serde(default)]
    pub required: bool,
    /// Whether the field accepts edits.
    #[serde(default = "default_editable")]
    pub editable: bool,
}

fn default_editable() -> bool {
    true
}

impl FieldDef {
    /// Creates an editable, optional field.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            domain: None,
            required: false,
            editable: !field_type.is_store_assigned(),
        }
    }

    /// Assigns a domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Case-insensitive name comparison.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Geometry type of a feature class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryType {
    /// Points.
    Point,
    /// Polylines.
    Polyline,
    /// Polygons.
    Polygon,
}

/// Whether a dataset is a plain table or a spatial feature class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableKind {
    /// Non-spatial table.
    Table,
    /// Spatial feature class.
    FeatureClass {
        /// Geometry type.
        geometry: GeometryType,
        /// Coordinate reference system code.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spatial_reference: Option<String>,
        /// Geographic transformation applied when the data was projected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transformation: Option<String>,
    },
}

impl TableKind {
    /// Returns true for feature classes.
    #[must_use]
    pub fn is_spatial(&self) -> bool {
        matches!(self, Self::FeatureClass { .. })
    }
}

/// Description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Table or feature class.
    pub kind: TableKind,
    /// Ordered fields.
    pub fields: Vec<FieldDef>,
    /// Whether editor tracking maintains `EditDate` on updates.
    #[serde(default)]
    pub editor_tracking: bool,
}

impl TableSchema {
    /// Creates a plain table schema.
    #[must_use]
    pub fn table(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::Table,
            fields,
            editor_tracking: false,
        }
    }

    /// Creates a feature class schema.
    #[must_use]
    pub fn feature_class(
        name: impl Into<String>,
        geometry: GeometryType,
        spatial_reference: Option<String>,
        fields: Vec<FieldDef>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::FeatureClass {
                geometry,
                spatial_reference,
                transformation: None,
            },
            fields,
            editor_tracking: false,
        }
    }

    /// Schema of the attachment table that belongs to `origin`.
    #[must_use]
    pub fn attachments_for(origin: &str) -> Self {
        Self::table(
            attachment_table_name(origin),
            vec![
                FieldDef::new("ATTACHMENTID", FieldType::ObjectId),
                FieldDef::new(GLOBAL_ID_FIELD, FieldType::GlobalId),
                FieldDef::new(PARENT_REFERENCE_FIELD, FieldType::Guid),
                FieldDef::new("CONTENT_TYPE", FieldType::Text),
                FieldDef::new("ATT_NAME", FieldType::Text),
                FieldDef::new("DATA_SIZE", FieldType::Integer),
                FieldDef::new("DATA", FieldType::Text),
            ],
        )
    }

    /// Enables editor tracking.
    #[must_use]
    pub fn with_editor_tracking(mut self) -> Self {
        self.editor_tracking = true;
        self
    }

    /// Finds a field by case-insensitive name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.is_named(name))
    }

    /// Returns true if the table has the named field.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Returns the field names in order.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Returns the first field of the given type.
    #[must_use]
    pub fn field_of_type(&self, field_type: FieldType) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.field_type == field_type)
    }
}

/// A coded value domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Domain name.
    pub name: String,
    /// Code and description pairs.
    pub coded_values: Vec<(String, String)>,
}

impl Domain {
    /// Creates a coded value domain.
    #[must_use]
    pub fn coded(name: impl Into<String>, values: &[(&str, &str)]) -> Self {
        Self {
            name: name.into(),
            coded_values: values
                .iter()
                .map(|(code, desc)| ((*code).to_string(), (*desc).to_string()))
                .collect(),
        }
    }
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// One to one.
    OneToOne,
    /// One to many.
    OneToMany,
    /// Many to many.
    ManyToMany,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneToOne => write!(f, "ONE_TO_ONE"),
            Self::OneToMany => write!(f, "ONE_TO_MANY"),
            Self::ManyToMany => write!(f, "MANY_TO_MANY"),
        }
    }
}

/// A relationship class between an origin and a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Relationship name.
    pub name: String,
    /// Origin (parent) table.
    pub origin: String,
    /// Destination (child) table.
    pub destination: String,
    /// Cardinality.
    pub cardinality: Cardinality,
    /// Composite (children deleted with parent) or simple.
    #[serde(default)]
    pub composite: bool,
    /// Whether the relationship carries attributes.
    #[serde(default)]
    pub attributed: bool,
    /// Whether this is an attachment relationship.
    #[serde(default)]
    pub is_attachment: bool,
    /// Forward path label.
    #[serde(default)]
    pub forward_label: String,
    /// Backward path label.
    #[serde(default)]
    pub backward_label: String,
    /// Message notification direction.
    #[serde(default = "default_notification")]
    pub notification: String,
    /// Origin primary key field.
    pub origin_primary_key: String,
    /// Origin foreign key field (on the destination table).
    pub origin_foreign_key: String,
}

fn default_notification() -> String {
    "NONE".to_string()
}

impl Relationship {
    /// Creates a simple one-to-many relationship keyed on global ids.
    #[must_use]
    pub fn one_to_many(
        name: impl Into<String>,
        origin: impl Into<String>,
        destination: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            origin: origin.into(),
            destination: destination.into(),
            cardinality: Cardinality::OneToMany,
            composite: false,
            attributed: false,
            is_attachment: false,
            forward_label: String::new(),
            backward_label: String::new(),
            notification: default_notification(),
            origin_primary_key: GLOBAL_ID_FIELD.to_string(),
            origin_foreign_key: foreign_key.into(),
        }
    }

    /// Creates the attachment relationship for a table.
    #[must_use]
    pub fn attachment(origin: &str) -> Self {
        Self {
            name: format!("{origin}{ATTACHMENT_SUFFIX}REL"),
            origin: origin.to_string(),
            destination: attachment_table_name(origin),
            cardinality: Cardinality::OneToMany,
            composite: true,
            attributed: false,
            is_attachment: true,
            forward_label: "attachments".to_string(),
            backward_label: origin.to_string(),
            notification: "FORWARD".to_string(),
            origin_primary_key: GLOBAL_ID_FIELD.to_string(),
            origin_foreign_key: PARENT_REFERENCE_FIELD.to_string(),
        }
    }

    /// Relationship type keyword.
    #[must_use]
    pub fn relationship_type(&self) -> &'static str {
        if self.composite {
            "COMPOSITE"
        } else {
            "SIMPLE"
        }
    }
}

/// Returns the attachment table name for a table.
#[must_use]
pub fn attachment_table_name(table: &str) -> String {
    format!("{table}{ATTACHMENT_SUFFIX}")
}

/// Opaque reprojection settings handed to the store when creating spatial tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reprojection {
    /// Output coordinate reference system code, e.g. `7856`.
    pub crs: String,
    /// Geographic transformation identifier, e.g. `WGS_1984_To_GDA2020_3`.
    pub transformation: String,
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// No value.
    Null,
    /// Integer.
    Integer(i64),
    /// Double.
    Double(f64),
    /// Text.
    Text(String),
    /// Date and time.
    Date(Timestamp),
    /// GUID.
    Guid(String),
    /// Geometry payload, opaque to the pipeline.
    Geometry(serde_json::Value),
}

impl Value {
    /// Returns true for null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the date, if this is one.
    #[must_use]
    pub fn as_date(&self) -> Option<Timestamp> {
        match self {
            Self::Date(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Returns the textual content of GUID and text values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Guid(s) | Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(v) | Self::Guid(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{}", crate::utils::timestamp_text(v)),
            Self::Geometry(v) => write!(f, "{v}"),
        }
    }
}

/// A row keyed by field name.
pub type Row = BTreeMap<String, Value>;

/// Looks up a row value by case-insensitive field name.
#[must_use]
pub fn row_value<'a>(row: &'a Row, field: &str) -> Option<&'a Value> {
    row.get(field).or_else(|| {
        row.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
            .map(|(_, value)| value)
    })
}

/// One source field routed to one destination field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name in the source table.
    pub source: String,
    /// Field name in the destination table.
    pub destination: String,
}

/// Correspondence between source and destination fields used when appending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    /// Routed fields.
    pub mappings: Vec<FieldMapping>,
    /// Source fields with no destination counterpart.
    pub unmapped: Vec<String>,
}

impl FieldMap {
    /// Adds a mapping.
    pub fn map(&mut self, source: impl Into<String>, destination: impl Into<String>) {
        self.mappings.push(FieldMapping {
            source: source.into(),
            destination: destination.into(),
        });
    }

    /// Returns the destination for a source field.
    #[must_use]
    pub fn destination_for(&self, source: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|m| m.source.eq_ignore_ascii_case(source))
            .map(|m| m.destination.as_str())
    }

    /// Number of routed fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true if nothing is routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup_is_case_insensitive() {
        let schema = TableSchema::table(
            "survey",
            vec![
                FieldDef::new("GlobalID", FieldType::GlobalId),
                FieldDef::new("CreationDate", FieldType::Date),
            ],
        );

        assert!(schema.has_field("globalid"));
        assert_eq!(schema.field("creationdate").unwrap().name, "CreationDate");
        assert!(!schema.has_field("rowid"));
    }

    #[test]
    fn test_store_assigned_fields_are_not_editable() {
        assert!(!FieldDef::new("OBJECTID", FieldType::ObjectId).editable);
        assert!(FieldDef::new("name", FieldType::Text).editable);
    }

    #[test]
    fn test_attachment_relationship() {
        let rel = Relationship::attachment("survey");

        assert!(rel.is_attachment);
        assert_eq!(rel.destination, "survey__ATTACH");
        assert_eq!(rel.relationship_type(), "COMPOSITE");
        assert_eq!(rel.origin_foreign_key, PARENT_REFERENCE_FIELD);
    }

    #[test]
    fn test_row_value_case_insensitive() {
        let mut row = Row::new();
        row.insert("GlobalID".to_string(), Value::Guid("{a}".to_string()));

        assert_eq!(row_value(&row, "globalid").and_then(Value::as_str), Some("{a}"));
        assert!(row_value(&row, "rowid").is_none());
    }

    #[test]
    fn test_value_serialization_is_tagged() {
        let json = serde_json::to_value(Value::Integer(4)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "integer", "value": 4}));

        let null: Value = serde_json::from_value(serde_json::json!({"type": "null"})).unwrap();
        assert!(null.is_null());
    }

    #[test]
    fn test_field_map_lookup() {
        let mut map = FieldMap::default();
        map.map("Name", "NAME_");

        assert_eq!(map.destination_for("name"), Some("NAME_"));
        assert_eq!(map.len(), 1);
        assert!(map.destination_for("other").is_none());
    }
}
