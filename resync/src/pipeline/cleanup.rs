//! Compensating cleanup for failed runs.

use crate::context::ProcessContext;
use crate::errors::StoreError;
use crate::observability::Messenger;
use crate::stages::survey_tables;
use crate::store::model::SYNC_TIME_FIELD;
use crate::store::{RowFilter, WorkspaceFactory};
use crate::utils::timestamp_text;
use std::sync::Arc;

/// Undoes what a failed run recorded in its cleanup operations.
///
/// Rows stamped with the run's process time are deleted from every table
/// recorded for append. If table creation was recorded, every table under the
/// prefix is dropped as well. Failures are collected and logged, never raised.
#[derive(Debug)]
pub struct CompensatingCleanup {
    prefix: String,
    destination: String,
    factory: Arc<dyn WorkspaceFactory>,
    messenger: Arc<Messenger>,
}

impl CompensatingCleanup {
    /// Creates the cleanup for a destination.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        destination: impl Into<String>,
        factory: Arc<dyn WorkspaceFactory>,
        messenger: Arc<Messenger>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            destination: destination.into(),
            factory,
            messenger,
        }
    }

    /// Runs every recorded compensating action.
    ///
    /// Returns `(target, message)` for each action that failed.
    pub fn compensate(&self, ctx: &ProcessContext) -> Vec<(String, String)> {
        let operations = &ctx.cleanup_operations;
        if operations.is_empty() {
            self.messenger.debug("Nothing to clean up");
            return Vec::new();
        }
        if !self.factory.exists(&self.destination) {
            self.messenger
                .debug(format!("Destination [{}] was never created", self.destination));
            return Vec::new();
        }

        let section = self.messenger.section("Cleaning up");
        let mut failures = Vec::new();
        let destination = match self.factory.open(&self.destination) {
            Ok(workspace) => workspace,
            Err(e) => {
                self.fail(&mut failures, &self.destination, &e);
                section.finish();
                return failures;
            }
        };

        let stamped = RowFilter::DateEquals {
            column: SYNC_TIME_FIELD.to_string(),
            at: ctx.process_time,
        };
        for table in operations.appended_tables() {
            match destination.delete_rows(table, &stamped) {
                Ok(deleted) => self.messenger.info(format!(
                    "Removed {deleted} row(s) stamped [{}] from [{table}]",
                    timestamp_text(&ctx.process_time)
                )),
                Err(e) => self.fail(&mut failures, table, &e),
            }
        }

        if operations.create_tables {
            match survey_tables(destination.as_ref(), &self.prefix) {
                Ok(tables) => {
                    for table in tables {
                        match destination.delete_table(&table) {
                            Ok(()) => self.messenger.info(format!("Deleted [{table}]")),
                            Err(e) => self.fail(&mut failures, &table, &e),
                        }
                    }
                }
                Err(e) => self.fail(&mut failures, &self.destination, &e),
            }
        }

        section.finish();
        failures
    }

    fn fail(&self, failures: &mut Vec<(String, String)>, target: &str, err: &StoreError) {
        self.messenger
            .warn(format!("Cleanup of [{target}] failed: {err}"));
        for message in &err.diagnostics.errors {
            self.messenger.warn(message);
        }
        failures.push((target.to_string(), err.to_string()));
    }
}
