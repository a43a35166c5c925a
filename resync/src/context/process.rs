//! Per-run state threaded through the three stages.

use crate::utils::{timestamp_text, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The stage a run is currently in. Used for failure attribution only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStage {
    /// No stage has started.
    Unstarted,
    /// Downloading the replica.
    Extraction,
    /// Filtering and stamping the staged copy.
    Transformation,
    /// Writing to the destination.
    Loading,
}

impl Default for ProcessStage {
    fn default() -> Self {
        Self::Unstarted
    }
}

impl fmt::Display for ProcessStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => write!(f, "Unstarted"),
            Self::Extraction => write!(f, "Extraction"),
            Self::Transformation => write!(f, "Transformation"),
            Self::Loading => write!(f, "Loading"),
        }
    }
}

/// Progress of the Load stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// Load has not begun.
    NotStarted,
    /// The destination store exists.
    StoreProvisioned,
    /// Destination tables were created in this run.
    SchemaProvisioned,
    /// Destination tables already existed.
    SchemaSkipped,
    /// Every staged table was appended.
    RowsAppended,
    /// Attachments were re-keyed and appended.
    AttachmentsReplicated,
    /// Load finished.
    Done,
}

impl Default for LoadState {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl LoadState {
    /// Returns true if `next` directly follows this state.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::StoreProvisioned)
                | (Self::StoreProvisioned, Self::SchemaProvisioned | Self::SchemaSkipped)
                | (Self::SchemaProvisioned | Self::SchemaSkipped, Self::RowsAppended)
                | (Self::RowsAppended, Self::AttachmentsReplicated)
                | (Self::AttachmentsReplicated, Self::Done)
        )
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "NotStarted",
            Self::StoreProvisioned => "StoreProvisioned",
            Self::SchemaProvisioned => "SchemaProvisioned",
            Self::SchemaSkipped => "SchemaSkipped",
            Self::RowsAppended => "RowsAppended",
            Self::AttachmentsReplicated => "AttachmentsReplicated",
            Self::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Compensating actions owed if the run fails.
///
/// Entries are recorded before the side effect they describe, so the set is
/// always a superset of what actually happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOperations {
    /// Destination tables were (or were about to be) created in this run.
    pub create_tables: bool,
    /// Destination tables that received (or were about to receive) rows.
    pub append: Option<Vec<String>>,
}

impl CleanupOperations {
    /// Records that table creation is starting.
    pub fn record_create_tables(&mut self) {
        self.create_tables = true;
    }

    /// Opens the append entry.
    pub fn begin_append(&mut self) {
        self.append.get_or_insert_with(Vec::new);
    }

    /// Records a destination table about to receive rows.
    pub fn record_append(&mut self, table: &str) {
        let tables = self.append.get_or_insert_with(Vec::new);
        if !tables.iter().any(|t| t == table) {
            tables.push(table.to_string());
        }
    }

    /// Tables recorded for append cleanup.
    #[must_use]
    pub fn appended_tables(&self) -> &[String] {
        self.append.as_deref().unwrap_or_default()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.create_tables = false;
        self.append = None;
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.create_tables && self.append.is_none()
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// The run's synchronisation stamp.
    pub process_time: Option<Timestamp>,
    /// Watermark used to filter the staged copy.
    pub last_sync_time: Option<Timestamp>,
    /// Destination tables created in this run.
    pub tables_created: Vec<String>,
    /// Rows appended per destination table.
    pub rows_appended: BTreeMap<String, usize>,
    /// Attachment rows appended.
    pub attachments_appended: usize,
    /// Attachment rows whose parent was not part of this run.
    pub attachments_skipped: usize,
}

impl RunReport {
    /// Total rows appended across all tables.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.rows_appended.values().sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row(s) across {} table(s), {} attachment(s)",
            self.total_rows(),
            self.rows_appended.len(),
            self.attachments_appended
        )?;
        if !self.tables_created.is_empty() {
            write!(f, ", {} table(s) created", self.tables_created.len())?;
        }
        if let Some(watermark) = &self.last_sync_time {
            write!(f, ", since [{}]", timestamp_text(watermark))?;
        }
        Ok(())
    }
}

/// Mutable state of one pipeline run, owned by the orchestrator and lent to each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    /// The run's single "now" anchor, in UTC.
    pub process_time: Timestamp,
    /// Stage currently executing.
    pub current_stage: ProcessStage,
    /// Latest synchronisation stamp already at the destination.
    pub last_sync_time: Option<Timestamp>,
    /// Prefixed destination tables found before loading; empty on a first run.
    pub existing_destination_tables: Vec<String>,
    /// Compensating actions owed on failure.
    pub cleanup_operations: CleanupOperations,
    /// Load stage progress.
    pub load_state: LoadState,
    /// Accumulated run summary.
    pub report: RunReport,
}

impl ProcessContext {
    /// Creates the context for a run anchored at `process_time`.
    #[must_use]
    pub fn new(process_time: Timestamp) -> Self {
        Self {
            process_time,
            current_stage: ProcessStage::Unstarted,
            last_sync_time: None,
            existing_destination_tables: Vec::new(),
            cleanup_operations: CleanupOperations::default(),
            load_state: LoadState::NotStarted,
            report: RunReport {
                process_time: Some(process_time),
                ..RunReport::default()
            },
        }
    }

    /// Returns true if no prior migration was found at the destination.
    #[must_use]
    pub fn is_first_run(&self) -> bool {
        self.existing_destination_tables.is_empty()
    }

    /// Moves the Load stage to its next state.
    pub fn advance_load(&mut self, next: LoadState) {
        debug_assert!(
            self.load_state.can_advance_to(next),
            "illegal load transition {} -> {}",
            self.load_state,
            next
        );
        self.load_state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_new_context_defaults() {
        let at = Utc.with_ymd_and_hms(2024, 3, 27, 4, 0, 0).unwrap();
        let context = ProcessContext::new(at);

        assert_eq!(context.current_stage, ProcessStage::Unstarted);
        assert!(context.is_first_run());
        assert!(context.cleanup_operations.is_empty());
        assert_eq!(context.report.process_time, Some(at));
    }

    #[test]
    fn test_cleanup_operations_recording() {
        let mut ops = CleanupOperations::default();
        ops.begin_append();
        assert!(!ops.is_empty());
        assert!(ops.appended_tables().is_empty());

        ops.record_append("p_form");
        ops.record_append("p_form");
        ops.record_create_tables();
        assert_eq!(ops.appended_tables(), ["p_form".to_string()]);
        assert!(ops.create_tables);

        ops.clear();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_load_state_transitions() {
        assert!(LoadState::NotStarted.can_advance_to(LoadState::StoreProvisioned));
        assert!(LoadState::StoreProvisioned.can_advance_to(LoadState::SchemaSkipped));
        assert!(LoadState::SchemaSkipped.can_advance_to(LoadState::RowsAppended));
        assert!(!LoadState::NotStarted.can_advance_to(LoadState::RowsAppended));
        assert!(!LoadState::Done.can_advance_to(LoadState::NotStarted));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(ProcessStage::Transformation.to_string(), "Transformation");
        assert_eq!(LoadState::AttachmentsReplicated.to_string(), "AttachmentsReplicated");
    }

    #[test]
    fn test_report_summary() {
        let mut report = RunReport::default();
        report.rows_appended.insert("p_form".to_string(), 2);
        report.rows_appended.insert("p_repeat".to_string(), 3);
        report.tables_created.push("p_form".to_string());

        assert_eq!(report.total_rows(), 5);
        assert_eq!(
            report.to_string(),
            "5 row(s) across 2 table(s), 0 attachment(s), 1 table(s) created"
        );
    }
}
