//! Directory-backed workspace.
//!
//! A workspace is a directory holding `workspace.json`, a snapshot of the
//! in-memory model rewritten after every mutation.

use super::filter::RowFilter;
use super::memory::{MemoryWorkspace, WorkspaceModel};
use super::model::{Domain, FieldDef, FieldMap, Relationship, Reprojection, Row, TableSchema, Value};
use super::{Workspace, WorkspaceFactory};
use crate::errors::StoreError;
use crate::utils::Timestamp;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File holding the workspace snapshot inside the workspace directory.
pub const MODEL_FILE: &str = "workspace.json";

/// A workspace persisted to a directory.
#[derive(Debug)]
pub struct DirectoryWorkspace {
    root: PathBuf,
    inner: MemoryWorkspace,
}

impl DirectoryWorkspace {
    /// Creates an empty workspace directory.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, &e))?;
        let workspace = Self {
            root,
            inner: MemoryWorkspace::new(),
        };
        workspace.persist()?;
        Ok(workspace)
    }

    /// Opens an existing workspace directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let path = root.join(MODEL_FILE);
        let bytes = fs::read(&path).map_err(|e| io_error(&path, &e))?;
        let model: WorkspaceModel = serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::new(format!("Workspace [{}] is unreadable", root.display()))
                .with_error(e.to_string())
        })?;
        Ok(Self {
            root,
            inner: MemoryWorkspace::from_model(model),
        })
    }

    /// Returns true if the directory holds a workspace.
    #[must_use]
    pub fn exists(root: &Path) -> bool {
        root.join(MODEL_FILE).is_file()
    }

    /// The workspace directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn persist(&self) -> Result<(), StoreError> {
        let path = self.root.join(MODEL_FILE);
        let bytes = serde_json::to_vec_pretty(&self.inner.snapshot())
            .map_err(|e| StoreError::new(format!("Cannot serialize workspace: {e}")))?;
        fs::write(&path, bytes).map_err(|e| io_error(&path, &e))?;
        debug!(path = %path.display(), "Workspace persisted");
        Ok(())
    }

    fn persisted<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        let value = result?;
        self.persist()?;
        Ok(value)
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::new(format!("Cannot access [{}]: {err}", path.display()))
}

impl Workspace for DirectoryWorkspace {
    fn list_tables(&self, pattern: Option<&str>) -> Result<Vec<String>, StoreError> {
        self.inner.list_tables(pattern)
    }

    fn describe_table(&self, table: &str) -> Result<TableSchema, StoreError> {
        self.inner.describe_table(table)
    }

    fn domains(&self) -> Result<Vec<Domain>, StoreError> {
        self.inner.domains()
    }

    fn relationships(&self) -> Result<Vec<Relationship>, StoreError> {
        self.inner.relationships()
    }

    fn create_domain(&self, domain: &Domain) -> Result<(), StoreError> {
        self.persisted(self.inner.create_domain(domain))
    }

    fn create_table(
        &self,
        name: &str,
        template: &TableSchema,
        reprojection: Option<&Reprojection>,
    ) -> Result<TableSchema, StoreError> {
        self.persisted(self.inner.create_table(name, template, reprojection))
    }

    fn create_relationship(&self, relationship: &Relationship) -> Result<(), StoreError> {
        self.persisted(self.inner.create_relationship(relationship))
    }

    fn enable_attachments(&self, table: &str) -> Result<(), StoreError> {
        self.persisted(self.inner.enable_attachments(table))
    }

    fn add_field(&self, table: &str, field: FieldDef) -> Result<(), StoreError> {
        self.persisted(self.inner.add_field(table, field))
    }

    fn assign_domain(&self, table: &str, field: &str, domain: &str) -> Result<(), StoreError> {
        self.persisted(self.inner.assign_domain(table, field, domain))
    }

    fn disable_editor_tracking(&self, table: &str) -> Result<(), StoreError> {
        self.persisted(self.inner.disable_editor_tracking(table))
    }

    fn row_count(&self, table: &str) -> Result<usize, StoreError> {
        self.inner.row_count(table)
    }

    fn max_date(&self, table: &str, column: &str) -> Result<Option<Timestamp>, StoreError> {
        self.inner.max_date(table, column)
    }

    fn select(&self, table: &str, columns: &[&str]) -> Result<Vec<Vec<Value>>, StoreError> {
        self.inner.select(table, columns)
    }

    fn rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        self.inner.rows(table)
    }

    fn update_column(
        &self,
        table: &str,
        column: &str,
        update: &mut dyn FnMut(&Value) -> Value,
    ) -> Result<usize, StoreError> {
        self.persisted(self.inner.update_column(table, column, update))
    }

    fn append_rows(
        &self,
        table: &str,
        rows: &[Row],
        field_map: Option<&FieldMap>,
    ) -> Result<usize, StoreError> {
        self.persisted(self.inner.append_rows(table, rows, field_map))
    }

    fn delete_rows(&self, table: &str, filter: &RowFilter) -> Result<usize, StoreError> {
        self.persisted(self.inner.delete_rows(table, filter))
    }

    fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        self.persisted(self.inner.delete_table(table))
    }
}

/// Opens directory workspaces; connections are filesystem paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryWorkspaceFactory;

impl WorkspaceFactory for DirectoryWorkspaceFactory {
    fn exists(&self, connection: &str) -> bool {
        DirectoryWorkspace::exists(Path::new(connection))
    }

    fn create(&self, connection: &str) -> Result<(), StoreError> {
        if self.exists(connection) {
            return Ok(());
        }
        DirectoryWorkspace::create(connection).map(|_| ())
    }

    fn open(&self, connection: &str) -> Result<Arc<dyn Workspace>, StoreError> {
        Ok(Arc::new(DirectoryWorkspace::open(connection)?))
    }
}
