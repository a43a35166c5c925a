//! Fault injection and stage doubles.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::ProcessContext;
use crate::errors::{MigrationError, Result, StoreError};
use crate::stages::{Extractor, Loader, StagedDataset, Transformer};
use crate::store::{
    Domain, FieldDef, FieldMap, Relationship, Reprojection, Row, RowFilter, TableSchema, Value,
    Workspace,
};
use crate::utils::Timestamp;

/// A mutating workspace operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceOp {
    /// `create_domain`.
    CreateDomain,
    /// `create_table`.
    CreateTable,
    /// `create_relationship`.
    CreateRelationship,
    /// `enable_attachments`.
    EnableAttachments,
    /// `update_column`.
    UpdateColumn,
    /// `append_rows`.
    AppendRows,
    /// `delete_rows`.
    DeleteRows,
    /// `delete_table`.
    DeleteTable,
}

impl fmt::Display for WorkspaceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Wraps a workspace and fails chosen operations.
///
/// A fault with no table fails the operation on every table.
#[derive(Debug)]
pub struct FaultyWorkspace {
    inner: Arc<dyn Workspace>,
    faults: Vec<(WorkspaceOp, Option<String>)>,
    calls: Mutex<Vec<(WorkspaceOp, String)>>,
}

impl FaultyWorkspace {
    /// Wraps `inner` without any faults.
    #[must_use]
    pub fn wrap(inner: Arc<dyn Workspace>) -> Self {
        Self {
            inner,
            faults: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Makes `op` fail, on `table` only if given.
    #[must_use]
    pub fn failing(mut self, op: WorkspaceOp, table: Option<&str>) -> Self {
        self.faults.push((op, table.map(str::to_string)));
        self
    }

    /// Mutating calls seen so far, failed ones included.
    #[must_use]
    pub fn calls(&self) -> Vec<(WorkspaceOp, String)> {
        self.calls.lock().clone()
    }

    fn check(&self, op: WorkspaceOp, table: &str) -> Result<(), StoreError> {
        self.calls.lock().push((op, table.to_string()));
        let faulted = self
            .faults
            .iter()
            .any(|(o, t)| *o == op && t.as_deref().map_or(true, |t| t == table));
        if faulted {
            return Err(StoreError::new(format!("Injected {op} failure on [{table}]"))
                .with_warning("WARNING 000117: injected")
                .with_error("ERROR 999999: Something unexpected caused the tool to fail"));
        }
        Ok(())
    }
}

impl Workspace for FaultyWorkspace {
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
        self.check(WorkspaceOp::CreateDomain, &domain.name)?;
        self.inner.create_domain(domain)
    }

    fn create_table(
        &self,
        name: &str,
        template: &TableSchema,
        reprojection: Option<&Reprojection>,
    ) -> Result<TableSchema, StoreError> {
        self.check(WorkspaceOp::CreateTable, name)?;
        self.inner.create_table(name, template, reprojection)
    }

    fn create_relationship(&self, relationship: &Relationship) -> Result<(), StoreError> {
        self.check(WorkspaceOp::CreateRelationship, &relationship.name)?;
        self.inner.create_relationship(relationship)
    }

    fn enable_attachments(&self, table: &str) -> Result<(), StoreError> {
        self.check(WorkspaceOp::EnableAttachments, table)?;
        self.inner.enable_attachments(table)
    }

    fn add_field(&self, table: &str, field: FieldDef) -> Result<(), StoreError> {
        self.inner.add_field(table, field)
    }

    fn assign_domain(&self, table: &str, field: &str, domain: &str) -> Result<(), StoreError> {
        self.inner.assign_domain(table, field, domain)
    }

    fn disable_editor_tracking(&self, table: &str) -> Result<(), StoreError> {
        self.inner.disable_editor_tracking(table)
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
        self.check(WorkspaceOp::UpdateColumn, table)?;
        self.inner.update_column(table, column, update)
    }

    fn append_rows(
        &self,
        table: &str,
        rows: &[Row],
        field_map: Option<&FieldMap>,
    ) -> Result<usize, StoreError> {
        self.check(WorkspaceOp::AppendRows, table)?;
        self.inner.append_rows(table, rows, field_map)
    }

    fn delete_rows(&self, table: &str, filter: &RowFilter) -> Result<usize, StoreError> {
        self.check(WorkspaceOp::DeleteRows, table)?;
        self.inner.delete_rows(table, filter)
    }

    fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        self.check(WorkspaceOp::DeleteTable, table)?;
        self.inner.delete_table(table)
    }
}

/// Extractor handing back a dataset that is already staged.
#[derive(Debug)]
pub struct StaticExtractor {
    dataset: StagedDataset,
    calls: AtomicUsize,
}

impl StaticExtractor {
    /// Creates an extractor returning `dataset`.
    #[must_use]
    pub fn new(dataset: StagedDataset) -> Self {
        Self {
            dataset,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of times the stage ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    async fn extract(&self, _ctx: &ProcessContext) -> Result<StagedDataset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.dataset.clone())
    }
}

/// Extractor that always fails.
#[derive(Debug)]
pub struct FailingExtractor {
    error: fn() -> MigrationError,
}

impl FailingExtractor {
    /// Creates an extractor failing with the error `error` builds.
    #[must_use]
    pub fn new(error: fn() -> MigrationError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl Extractor for FailingExtractor {
    async fn extract(&self, _ctx: &ProcessContext) -> Result<StagedDataset> {
        Err((self.error)())
    }
}

/// Transform and Load stand-in that only counts its invocations.
#[derive(Debug, Default)]
pub struct RecordingStage {
    transforms: AtomicUsize,
    loads: AtomicUsize,
}

impl RecordingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of Transform invocations.
    #[must_use]
    pub fn transform_count(&self) -> usize {
        self.transforms.load(Ordering::SeqCst)
    }

    /// Number of Load invocations.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transformer for RecordingStage {
    async fn transform(&self, _ctx: &mut ProcessContext, _staged: &StagedDataset) -> Result<()> {
        self.transforms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Loader for RecordingStage {
    async fn load_from(&self, _ctx: &mut ProcessContext, _staged: &StagedDataset) -> Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
