//! Workspace capabilities used by the Transform and Load stages.
//!
//! A workspace is anything that holds tables: the staged replica downloaded
//! from the feature service, or the destination store. Concrete drivers live
//! behind [`Workspace`] and are opened through a [`WorkspaceFactory`].

mod directory;
mod filter;
mod memory;
pub mod model;

pub use directory::{DirectoryWorkspace, DirectoryWorkspaceFactory, MODEL_FILE};
pub use filter::RowFilter;
pub use memory::{MemoryWorkspace, MemoryWorkspaceFactory, TableData, WorkspaceModel};
pub use model::{
    attachment_table_name, row_value, Cardinality, Domain, FieldDef, FieldMap, FieldMapping,
    FieldType, GeometryType, Relationship, Reprojection, Row, TableKind, TableSchema, Value,
};

use crate::errors::StoreError;
use crate::utils::Timestamp;
use std::fmt::Debug;
use std::sync::Arc;

/// Table store capability set.
///
/// Table and field names are matched exactly for tables and
/// case-insensitively for fields, as geodatabases do.
pub trait Workspace: Send + Sync + Debug {
    /// Lists table and feature class names. `pattern` is a case-insensitive
    /// substring; attachment tables are included.
    fn list_tables(&self, pattern: Option<&str>) -> Result<Vec<String>, StoreError>;

    /// Describes a table.
    fn describe_table(&self, table: &str) -> Result<TableSchema, StoreError>;

    /// Attribute domains defined in the workspace.
    fn domains(&self) -> Result<Vec<Domain>, StoreError>;

    /// Relationship classes defined in the workspace.
    fn relationships(&self) -> Result<Vec<Relationship>, StoreError>;

    /// Creates or replaces a domain.
    fn create_domain(&self, domain: &Domain) -> Result<(), StoreError>;

    /// Creates a table shaped like `template`. Feature classes take the
    /// reprojection's coordinate system when one is supplied.
    fn create_table(
        &self,
        name: &str,
        template: &TableSchema,
        reprojection: Option<&Reprojection>,
    ) -> Result<TableSchema, StoreError>;

    /// Creates a relationship class.
    fn create_relationship(&self, relationship: &Relationship) -> Result<(), StoreError>;

    /// Creates the attachment table and relationship for a table.
    fn enable_attachments(&self, table: &str) -> Result<(), StoreError>;

    /// Adds a field; adding an existing field is a no-op.
    fn add_field(&self, table: &str, field: FieldDef) -> Result<(), StoreError>;

    /// Assigns a domain to a field.
    fn assign_domain(&self, table: &str, field: &str, domain: &str) -> Result<(), StoreError>;

    /// Stops editor tracking from rewriting fields on update.
    fn disable_editor_tracking(&self, table: &str) -> Result<(), StoreError>;

    /// Number of rows in a table.
    fn row_count(&self, table: &str) -> Result<usize, StoreError>;

    /// Maximum non-null value of a date column.
    fn max_date(&self, table: &str, column: &str) -> Result<Option<Timestamp>, StoreError>;

    /// Reads the given columns of every row, in column order.
    fn select(&self, table: &str, columns: &[&str]) -> Result<Vec<Vec<Value>>, StoreError>;

    /// Reads every row with all fields.
    fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError>;

    /// Rewrites one column of every row. Returns the number of rows updated.
    fn update_column(
        &self,
        table: &str,
        column: &str,
        update: &mut dyn FnMut(&Value) -> Value,
    ) -> Result<usize, StoreError>;

    /// Appends rows. Without a field map, fields are matched by name.
    /// Object ids and global ids are always assigned by the store.
    fn append_rows(
        &self,
        table: &str,
        rows: &[Row],
        field_map: Option<&FieldMap>,
    ) -> Result<usize, StoreError>;

    /// Deletes matching rows. Returns the number deleted.
    fn delete_rows(&self, table: &str, filter: &RowFilter) -> Result<usize, StoreError>;

    /// Deletes a table together with its attachment table and relationships.
    fn delete_table(&self, table: &str) -> Result<(), StoreError>;
}

/// Opens workspaces by connection identifier.
#[cfg_attr(test, mockall::automock)]
pub trait WorkspaceFactory: Send + Sync + Debug {
    /// Returns true if a workspace exists at the connection.
    fn exists(&self, connection: &str) -> bool;

    /// Creates an empty workspace at the connection.
    fn create(&self, connection: &str) -> Result<(), StoreError>;

    /// Opens the workspace at the connection.
    fn open(&self, connection: &str) -> Result<Arc<dyn Workspace>, StoreError>;
}
