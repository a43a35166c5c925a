//! In-memory workspace.
//!
//! Holds the complete table model behind a `parking_lot::RwLock`. Used
//! directly by tests and as the backing model of [`super::DirectoryWorkspace`].

use super::filter::RowFilter;
use super::model::{
    attachment_table_name, row_value, Domain, FieldDef, FieldMap, FieldType, Relationship,
    Reprojection, Row, TableKind, TableSchema, Value, EDIT_DATE_FIELD,
};
use super::{Workspace, WorkspaceFactory};
use crate::errors::StoreError;
use crate::utils::{generate_guid, normalize_guid, truncate_to_seconds, Timestamp};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// A table together with its rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    /// Table schema.
    pub schema: TableSchema,
    /// Stored rows.
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// Serializable snapshot of a whole workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceModel {
    /// Tables keyed by name.
    #[serde(default)]
    pub tables: BTreeMap<String, TableData>,
    /// Domains keyed by name.
    #[serde(default)]
    pub domains: BTreeMap<String, Domain>,
    /// Relationship classes.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl WorkspaceModel {
    fn table(&self, name: &str) -> Result<&TableData, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::table_not_found(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableData, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::table_not_found(name))
    }
}

impl TableData {
    fn require_field(&self, field: &str) -> Result<&FieldDef, StoreError> {
        self.schema
            .field(field)
            .ok_or_else(|| StoreError::field_not_found(&self.schema.name, field))
    }

    fn next_object_id(&self) -> i64 {
        let Some(oid) = self.schema.field_of_type(FieldType::ObjectId) else {
            return 1;
        };
        self.rows
            .iter()
            .filter_map(|row| match row_value(row, &oid.name) {
                Some(Value::Integer(id)) => Some(*id),
                _ => None,
            })
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// A workspace held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    model: RwLock<WorkspaceModel>,
}

impl MemoryWorkspace {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a workspace from a snapshot.
    #[must_use]
    pub fn from_model(model: WorkspaceModel) -> Self {
        Self {
            model: RwLock::new(model),
        }
    }

    /// Returns a copy of the current model.
    #[must_use]
    pub fn snapshot(&self) -> WorkspaceModel {
        self.model.read().clone()
    }

    /// Inserts a table with rows exactly as given, store-assigned values included.
    pub fn insert_table(&self, schema: TableSchema, rows: Vec<Row>) {
        let name = schema.name.clone();
        self.model
            .write()
            .tables
            .insert(name, TableData { schema, rows });
    }

    /// Adds a relationship class without validating its tables.
    pub fn insert_relationship(&self, relationship: Relationship) {
        self.model.write().relationships.push(relationship);
    }
}

fn incoming_value(source: &Row, field: &FieldDef, field_map: Option<&FieldMap>) -> Value {
    let found = match field_map {
        Some(map) => map
            .mappings
            .iter()
            .find(|m| field.is_named(&m.destination))
            .and_then(|m| row_value(source, &m.source)),
        None => row_value(source, &field.name),
    };
    found.cloned().unwrap_or(Value::Null)
}

fn implicit_geometry(source: &Row) -> Value {
    source
        .values()
        .find(|value| matches!(value, Value::Geometry(_)))
        .cloned()
        .unwrap_or(Value::Null)
}

fn guid_key(row: &Row, field: &str) -> Option<String> {
    row_value(row, field)
        .and_then(Value::as_str)
        .map(normalize_guid)
}

impl Workspace for MemoryWorkspace {
    fn list_tables(&self, pattern: Option<&str>) -> Result<Vec<String>, StoreError> {
        let pattern = pattern.map(str::to_lowercase);
        Ok(self
            .model
            .read()
            .tables
            .keys()
            .filter(|name| {
                pattern
                    .as_deref()
                    .map_or(true, |p| name.to_lowercase().contains(p))
            })
            .cloned()
            .collect())
    }

    fn describe_table(&self, table: &str) -> Result<TableSchema, StoreError> {
        Ok(self.model.read().table(table)?.schema.clone())
    }

    fn domains(&self) -> Result<Vec<Domain>, StoreError> {
        Ok(self.model.read().domains.values().cloned().collect())
    }

    fn relationships(&self) -> Result<Vec<Relationship>, StoreError> {
        Ok(self.model.read().relationships.clone())
    }

    fn create_domain(&self, domain: &Domain) -> Result<(), StoreError> {
        self.model
            .write()
            .domains
            .insert(domain.name.clone(), domain.clone());
        Ok(())
    }

    fn create_table(
        &self,
        name: &str,
        template: &TableSchema,
        reprojection: Option<&Reprojection>,
    ) -> Result<TableSchema, StoreError> {
        let mut model = self.model.write();
        if model.tables.contains_key(name) {
            return Err(StoreError::already_exists(name));
        }

        let mut schema = template.clone();
        schema.name = name.to_string();
        schema.editor_tracking = false;
        // Templates never carry domain assignments across workspaces.
        for field in &mut schema.fields {
            field.domain = None;
        }
        if let (
            TableKind::FeatureClass {
                spatial_reference,
                transformation,
                ..
            },
            Some(reprojection),
        ) = (&mut schema.kind, reprojection)
        {
            *spatial_reference = Some(reprojection.crs.clone());
            *transformation = Some(reprojection.transformation.clone());
        }

        model.tables.insert(
            name.to_string(),
            TableData {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(schema)
    }

    fn create_relationship(&self, relationship: &Relationship) -> Result<(), StoreError> {
        let mut model = self.model.write();
        model.table(&relationship.origin)?;
        model.table(&relationship.destination)?;
        if model
            .relationships
            .iter()
            .any(|r| r.name == relationship.name)
        {
            return Err(StoreError::already_exists(&relationship.name));
        }
        model.relationships.push(relationship.clone());
        Ok(())
    }

    fn enable_attachments(&self, table: &str) -> Result<(), StoreError> {
        let mut model = self.model.write();
        let origin = model.table(table)?;
        if origin.schema.field_of_type(FieldType::GlobalId).is_none() {
            return Err(
                StoreError::new(format!("Table [{table}] has no GlobalID field"))
                    .with_error("ERROR 000276: Dataset must have a GlobalID field"),
            );
        }

        let attachments = attachment_table_name(table);
        if model.tables.contains_key(&attachments) {
            return Ok(());
        }
        model.tables.insert(
            attachments,
            TableData {
                schema: TableSchema::attachments_for(table),
                rows: Vec::new(),
            },
        );
        model.relationships.push(Relationship::attachment(table));
        Ok(())
    }

    fn add_field(&self, table: &str, field: FieldDef) -> Result<(), StoreError> {
        let mut model = self.model.write();
        let data = model.table_mut(table)?;
        if data.schema.has_field(&field.name) {
            return Ok(());
        }
        for row in &mut data.rows {
            row.insert(field.name.clone(), Value::Null);
        }
        data.schema.fields.push(field);
        Ok(())
    }

    fn assign_domain(&self, table: &str, field: &str, domain: &str) -> Result<(), StoreError> {
        let mut model = self.model.write();
        if !model.domains.contains_key(domain) {
            return Err(StoreError::new(format!("Domain [{domain}] does not exist"))
                .with_error(format!("ERROR 000800: {domain} is not a member of the domain list")));
        }
        let data = model.table_mut(table)?;
        data.require_field(field)?;
        if let Some(def) = data.schema.fields.iter_mut().find(|f| f.is_named(field)) {
            def.domain = Some(domain.to_string());
        }
        Ok(())
    }

    fn disable_editor_tracking(&self, table: &str) -> Result<(), StoreError> {
        self.model.write().table_mut(table)?.schema.editor_tracking = false;
        Ok(())
    }

    fn row_count(&self, table: &str) -> Result<usize, StoreError> {
        Ok(self.model.read().table(table)?.rows.len())
    }

    fn max_date(&self, table: &str, column: &str) -> Result<Option<Timestamp>, StoreError> {
        let model = self.model.read();
        let data = model.table(table)?;
        data.require_field(column)?;
        Ok(data
            .rows
            .iter()
            .filter_map(|row| row_value(row, column).and_then(Value::as_date))
            .max())
    }

    fn select(&self, table: &str, columns: &[&str]) -> Result<Vec<Vec<Value>>, StoreError> {
        let model = self.model.read();
        let data = model.table(table)?;
        for column in columns {
            data.require_field(column)?;
        }
        Ok(data
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row_value(row, c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect())
    }

    fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        Ok(self.model.read().table(table)?.rows.clone())
    }

    fn update_column(
        &self,
        table: &str,
        column: &str,
        update: &mut dyn FnMut(&Value) -> Value,
    ) -> Result<usize, StoreError> {
        let mut model = self.model.write();
        let data = model.table_mut(table)?;
        let column = data.require_field(column)?.name.clone();
        let tracked = data.schema.editor_tracking && data.schema.has_field(EDIT_DATE_FIELD);
        let edited_at = truncate_to_seconds(Utc::now());

        for row in &mut data.rows {
            let current = row_value(row, &column).cloned().unwrap_or(Value::Null);
            row.insert(column.clone(), update(&current));
            if tracked {
                row.insert(EDIT_DATE_FIELD.to_string(), Value::Date(edited_at));
            }
        }
        Ok(data.rows.len())
    }

    fn append_rows(
        &self,
        table: &str,
        rows: &[Row],
        field_map: Option<&FieldMap>,
    ) -> Result<usize, StoreError> {
        let mut model = self.model.write();
        let data = model.table_mut(table)?;
        if let Some(map) = field_map {
            for mapping in &map.mappings {
                data.require_field(&mapping.destination)?;
            }
        }

        let mut object_id = data.next_object_id();
        let mut appended = Vec::with_capacity(rows.len());
        for source in rows {
            let mut row = Row::new();
            for field in &data.schema.fields {
                let value = match field.field_type {
                    FieldType::ObjectId => {
                        object_id += 1;
                        Value::Integer(object_id - 1)
                    }
                    FieldType::GlobalId => Value::Guid(generate_guid()),
                    FieldType::Geometry => implicit_geometry(source),
                    _ => incoming_value(source, field, field_map),
                };
                row.insert(field.name.clone(), value);
            }
            appended.push(row);
        }

        let count = appended.len();
        data.rows.extend(appended);
        Ok(count)
    }

    fn delete_rows(&self, table: &str, filter: &RowFilter) -> Result<usize, StoreError> {
        let mut model = self.model.write();
        let data = model.table_mut(table)?;
        for column in filter.columns() {
            data.require_field(column)?;
        }

        let (deleted, kept): (Vec<Row>, Vec<Row>) =
            std::mem::take(&mut data.rows)
                .into_iter()
                .partition(|row| filter.matches(row));
        data.rows = kept;

        // Composite relationships take their children with them.
        let composite: Vec<Relationship> = model
            .relationships
            .iter()
            .filter(|r| r.composite && r.origin == table)
            .cloned()
            .collect();
        for relationship in composite {
            let keys: HashSet<String> = deleted
                .iter()
                .filter_map(|row| guid_key(row, &relationship.origin_primary_key))
                .collect();
            if let Some(children) = model.tables.get_mut(&relationship.destination) {
                children.rows.retain(|row| {
                    guid_key(row, &relationship.origin_foreign_key)
                        .map_or(true, |key| !keys.contains(&key))
                });
            }
        }

        Ok(deleted.len())
    }

    fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        let mut model = self.model.write();
        model
            .tables
            .remove(table)
            .ok_or_else(|| StoreError::table_not_found(table))?;

        let attachments = attachment_table_name(table);
        model.tables.remove(&attachments);
        model.relationships.retain(|r| {
            r.origin != table
                && r.destination != table
                && r.origin != attachments
                && r.destination != attachments
        });
        Ok(())
    }
}

/// Registry of in-memory workspaces keyed by connection.
#[derive(Debug, Default)]
pub struct MemoryWorkspaceFactory {
    workspaces: RwLock<HashMap<String, Arc<dyn Workspace>>>,
}

impl MemoryWorkspaceFactory {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workspace under a connection, replacing any previous one.
    pub fn register(&self, connection: impl Into<String>, workspace: Arc<dyn Workspace>) {
        self.workspaces.write().insert(connection.into(), workspace);
    }
}

impl WorkspaceFactory for MemoryWorkspaceFactory {
    fn exists(&self, connection: &str) -> bool {
        self.workspaces.read().contains_key(connection)
    }

    fn create(&self, connection: &str) -> Result<(), StoreError> {
        self.workspaces
            .write()
            .entry(connection.to_string())
            .or_insert_with(|| Arc::new(MemoryWorkspace::new()));
        Ok(())
    }

    fn open(&self, connection: &str) -> Result<Arc<dyn Workspace>, StoreError> {
        self.workspaces
            .read()
            .get(connection)
            .cloned()
            .ok_or_else(|| {
                StoreError::new(format!("Workspace [{connection}] does not exist"))
                    .with_error(format!("ERROR 000732: Workspace {connection} does not exist"))
            })
    }
}
