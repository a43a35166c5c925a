//! Survey fixtures: staged replicas, prior destinations and parameters.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use crate::config::{Parameters, RawParameters};
use crate::stages::StorePorts;
use crate::store::model::{
    CREATION_DATE_FIELD, EDIT_DATE_FIELD, GLOBAL_ID_FIELD, PARENT_REFERENCE_FIELD, ROW_ID_FIELD,
    SYNC_TIME_FIELD,
};
use crate::store::{
    Domain, FieldDef, FieldType, GeometryType, MemoryWorkspace, MemoryWorkspaceFactory,
    Relationship, Row, TableSchema, Value, Workspace, WorkspaceFactory,
};
use crate::utils::{generate_guid, Timestamp};

/// Connection of the staged replica in fixture ports.
pub const STAGING_LOCATION: &str = "staging://replica";

/// Connection of the destination in fixture ports.
pub const DESTINATION: &str = "memory://destination";

/// Prefix used by [`sample_parameters`].
pub const SAMPLE_PREFIX: &str = "bird";

/// A fixed reference instant, `2024-03-27 04:00:00 UTC`.
#[must_use]
pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 3, 27, 4, 0, 0)
        .single()
        .unwrap_or_default()
}

/// [`t0`] shifted by whole minutes.
#[must_use]
pub fn t0_plus(minutes: i64) -> Timestamp {
    t0() + Duration::minutes(minutes)
}

/// Validated parameters pointing the portal and service at `remote_root`.
#[must_use]
pub fn sample_parameters(remote_root: &str) -> Parameters {
    let raw = RawParameters {
        destination: Some(DESTINATION.to_string()),
        prefix: Some(SAMPLE_PREFIX.to_string()),
        timezone: Some("Australia/Sydney".to_string()),
        portal: Some(format!("{remote_root}/portal")),
        username: Some("surveyor".to_string()),
        password: Some("secret".to_string()),
        reprojection: Some("7856".to_string()),
        service_url: Some(format!("{remote_root}/FeatureServer")),
        ..RawParameters::default()
    };
    match raw.validate() {
        Ok(parameters) => parameters,
        Err(e) => panic!("sample parameters are invalid: {e}"),
    }
}

/// Schema of a survey form as the feature service replicates it.
#[must_use]
pub fn form_schema(name: &str) -> TableSchema {
    TableSchema::feature_class(
        name,
        GeometryType::Point,
        Some("4326".to_string()),
        vec![
            FieldDef::new("OBJECTID", FieldType::ObjectId),
            FieldDef::new(GLOBAL_ID_FIELD, FieldType::GlobalId),
            FieldDef::new("site", FieldType::Text),
            FieldDef::new("count", FieldType::Integer),
            FieldDef::new(CREATION_DATE_FIELD, FieldType::Date),
            FieldDef::new(EDIT_DATE_FIELD, FieldType::Date),
            FieldDef::new("SHAPE", FieldType::Geometry),
        ],
    )
    .with_editor_tracking()
}

/// Schema of a repeat table whose rows point at a form row.
#[must_use]
pub fn repeat_schema(name: &str) -> TableSchema {
    TableSchema::table(
        name,
        vec![
            FieldDef::new("OBJECTID", FieldType::ObjectId),
            FieldDef::new(GLOBAL_ID_FIELD, FieldType::GlobalId),
            FieldDef::new("parentglobalid", FieldType::Guid),
            FieldDef::new("species", FieldType::Text),
            FieldDef::new(CREATION_DATE_FIELD, FieldType::Date),
            FieldDef::new(EDIT_DATE_FIELD, FieldType::Date),
        ],
    )
    .with_editor_tracking()
}

fn date_or_null(at: Option<Timestamp>) -> Value {
    at.map_or(Value::Null, Value::Date)
}

/// Builder for an in-memory staged replica.
#[derive(Debug, Default)]
pub struct SurveyFixture {
    workspace: MemoryWorkspace,
}

impl SurveyFixture {
    /// Creates an empty replica.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a spatial form with one row per creation time.
    #[must_use]
    pub fn with_form(self, name: &str, created: &[Option<Timestamp>]) -> Self {
        let rows = created
            .iter()
            .enumerate()
            .map(|(i, at)| {
                Row::from([
                    ("OBJECTID".to_string(), Value::Integer(i as i64 + 1)),
                    (GLOBAL_ID_FIELD.to_string(), Value::Guid(generate_guid())),
                    ("site".to_string(), Value::Text(format!("site-{}", i + 1))),
                    ("count".to_string(), Value::Integer(i as i64 * 10)),
                    (CREATION_DATE_FIELD.to_string(), date_or_null(*at)),
                    (EDIT_DATE_FIELD.to_string(), date_or_null(*at)),
                    (
                        "SHAPE".to_string(),
                        Value::Geometry(json!({"x": 151.2 + i as f64, "y": -33.8})),
                    ),
                ])
            })
            .collect();
        self.workspace.insert_table(form_schema(name), rows);
        self
    }

    /// Adds a repeat table whose rows all belong to the first row of `parent`.
    #[must_use]
    pub fn with_repeat(self, name: &str, parent: &str, created: &[Option<Timestamp>]) -> Self {
        let parent_id = self
            .workspace
            .select(parent, &[GLOBAL_ID_FIELD])
            .ok()
            .and_then(|rows| rows.into_iter().next())
            .and_then(|mut row| row.pop())
            .unwrap_or(Value::Null);
        let rows = created
            .iter()
            .enumerate()
            .map(|(i, at)| {
                Row::from([
                    ("OBJECTID".to_string(), Value::Integer(i as i64 + 1)),
                    (GLOBAL_ID_FIELD.to_string(), Value::Guid(generate_guid())),
                    ("parentglobalid".to_string(), parent_id.clone()),
                    ("species".to_string(), Value::Text(format!("species-{}", i + 1))),
                    (CREATION_DATE_FIELD.to_string(), date_or_null(*at)),
                    (EDIT_DATE_FIELD.to_string(), date_or_null(*at)),
                ])
            })
            .collect();
        self.workspace.insert_table(repeat_schema(name), rows);
        self.workspace.insert_relationship(Relationship::one_to_many(
            format!("{parent}_{name}"),
            parent,
            name,
            "parentglobalid",
        ));
        self
    }

    /// Defines a coded domain and assigns it to a field.
    #[must_use]
    pub fn with_domain(self, domain: Domain, table: &str, field: &str) -> Self {
        let name = domain.name.clone();
        if let Err(e) = self
            .workspace
            .create_domain(&domain)
            .and_then(|()| self.workspace.assign_domain(table, field, &name))
        {
            panic!("fixture domain [{name}] on [{table}.{field}]: {e}");
        }
        self
    }

    /// Enables attachments on `table` and adds `per_row` attachments to each of its rows.
    #[must_use]
    pub fn with_attachments(self, table: &str, per_row: usize) -> Self {
        if let Err(e) = self.workspace.enable_attachments(table) {
            panic!("fixture attachments on [{table}]: {e}");
        }
        let parents = self
            .workspace
            .select(table, &[GLOBAL_ID_FIELD])
            .unwrap_or_default();
        let mut rows = Vec::new();
        for parent in parents.into_iter().flatten() {
            for _ in 0..per_row {
                let n = rows.len() + 1;
                rows.push(attachment_row(n, parent.clone()));
            }
        }
        self.workspace
            .insert_table(TableSchema::attachments_for(table), rows);
        self
    }

    /// Adds an attachment whose parent reference matches no row.
    #[must_use]
    pub fn with_orphan_attachment(self, table: &str) -> Self {
        let schema = TableSchema::attachments_for(table);
        let mut rows = self.workspace.rows(&schema.name).unwrap_or_default();
        rows.push(attachment_row(rows.len() + 1, Value::Guid(generate_guid())));
        self.workspace.insert_table(schema, rows);
        self
    }

    /// Finishes the replica.
    #[must_use]
    pub fn build(self) -> Arc<MemoryWorkspace> {
        Arc::new(self.workspace)
    }
}

fn attachment_row(n: usize, parent: Value) -> Row {
    Row::from([
        ("ATTACHMENTID".to_string(), Value::Integer(n as i64)),
        (GLOBAL_ID_FIELD.to_string(), Value::Guid(generate_guid())),
        (PARENT_REFERENCE_FIELD.to_string(), parent),
        ("CONTENT_TYPE".to_string(), Value::Text("image/jpeg".to_string())),
        ("ATT_NAME".to_string(), Value::Text(format!("photo-{n}.jpg"))),
        ("DATA_SIZE".to_string(), Value::Integer(4)),
        ("DATA".to_string(), Value::Text("/9j/".to_string())),
    ])
}

/// A destination holding a complete prior migration of the given staged
/// tables, one row each stamped `synced_at`, or empty tables without a stamp.
#[must_use]
pub fn prior_destination(prefix: &str, forms: &[&str], synced_at: Option<Timestamp>) -> Arc<MemoryWorkspace> {
    let workspace = MemoryWorkspace::new();
    for form in forms {
        let mut schema = form_schema(&format!("{prefix}_{form}"));
        schema.editor_tracking = false;
        schema.fields.push(FieldDef::new(SYNC_TIME_FIELD, FieldType::Date));
        schema.fields.push(FieldDef::new(ROW_ID_FIELD, FieldType::Guid));
        let rows = synced_at
            .map(|at| {
                vec![Row::from([
                    ("OBJECTID".to_string(), Value::Integer(1)),
                    (GLOBAL_ID_FIELD.to_string(), Value::Guid(generate_guid())),
                    ("site".to_string(), Value::Text("prior".to_string())),
                    (CREATION_DATE_FIELD.to_string(), Value::Date(at)),
                    (SYNC_TIME_FIELD.to_string(), Value::Date(at)),
                    (ROW_ID_FIELD.to_string(), Value::Guid(generate_guid())),
                ])]
            })
            .unwrap_or_default();
        workspace.insert_table(schema, rows);
    }
    Arc::new(workspace)
}

/// Ports over a single in-memory registry holding the staged replica and,
/// when given, an existing destination.
#[must_use]
pub fn memory_ports(
    staged: Arc<dyn Workspace>,
    destination: Option<Arc<dyn Workspace>>,
) -> (StorePorts, Arc<MemoryWorkspaceFactory>) {
    let factory = Arc::new(MemoryWorkspaceFactory::new());
    factory.register(STAGING_LOCATION, staged);
    if let Some(destination) = destination {
        factory.register(DESTINATION, destination);
    }
    let ports = StorePorts::shared(Arc::clone(&factory) as Arc<dyn WorkspaceFactory>);
    (ports, factory)
}
