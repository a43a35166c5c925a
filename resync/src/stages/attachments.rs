//! Attachment re-keying.
//!
//! Attachment rows point at their parent through `REL_GLOBALID`. The
//! destination assigns new global ids on append, so the reference is
//! translated through the `rowid` each parent carries on both sides.

use crate::errors::{MigrationError, Result};
use crate::store::model::{GLOBAL_ID_FIELD, PARENT_REFERENCE_FIELD, ROW_ID_FIELD};
use crate::store::{attachment_table_name, row_value, MemoryWorkspace, Value, Workspace};
use crate::utils::normalize_guid;
use std::collections::HashMap;

/// Counts from one attachment replication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentOutcome {
    /// Rows appended to the destination attachment table.
    pub appended: usize,
    /// Staged rows whose parent was not part of this run.
    pub skipped: usize,
}

fn key(value: &Value) -> Option<String> {
    value.as_str().map(normalize_guid)
}

fn pairs(workspace: &dyn Workspace, table: &str) -> Result<Vec<(Value, Value)>> {
    Ok(workspace
        .select(table, &[ROW_ID_FIELD, GLOBAL_ID_FIELD])?
        .into_iter()
        .filter_map(|row| {
            let mut row = row.into_iter();
            Some((row.next()?, row.next()?))
        })
        .collect())
}

/// Builds the staged global id to destination global id translation.
///
/// Every staged parent must have a destination row with the same `rowid`.
fn translation(
    staging: &dyn Workspace,
    destination: &dyn Workspace,
    staged_table: &str,
    destination_table: &str,
) -> Result<HashMap<String, Value>> {
    let by_row_id: HashMap<String, Value> = pairs(destination, destination_table)?
        .into_iter()
        .filter_map(|(row_id, global_id)| Some((key(&row_id)?, global_id)))
        .collect();

    let mut translation = HashMap::new();
    for (row_id, global_id) in pairs(staging, staged_table)? {
        let target = key(&row_id)
            .and_then(|k| by_row_id.get(&k))
            .ok_or_else(|| MigrationError::MissingTranslationKey {
                table: destination_table.to_string(),
                key: row_id.to_string(),
            })?;
        if let Some(source) = key(&global_id) {
            translation.insert(source, target.clone());
        }
    }
    Ok(translation)
}

/// Copies the attachments of `staged_table` into the attachment table of
/// `destination_table`, pointing each at the destination parent.
///
/// Every translation key is resolved before anything is written, so a
/// missing parent leaves the destination attachment table untouched.
pub fn replicate_attachments(
    staging: &dyn Workspace,
    destination: &dyn Workspace,
    staged_table: &str,
    destination_table: &str,
) -> Result<AttachmentOutcome> {
    let translation = translation(staging, destination, staged_table, destination_table)?;

    let staged_attachments = attachment_table_name(staged_table);
    let (rows, orphans): (Vec<_>, Vec<_>) = staging
        .rows(&staged_attachments)?
        .into_iter()
        .partition(|row| {
            row_value(row, PARENT_REFERENCE_FIELD)
                .and_then(key)
                .is_some_and(|k| translation.contains_key(&k))
        });

    let scratch = MemoryWorkspace::new();
    scratch.insert_table(staging.describe_table(&staged_attachments)?, rows);
    scratch.update_column(&staged_attachments, PARENT_REFERENCE_FIELD, &mut |parent| {
        key(parent)
            .and_then(|k| translation.get(&k).cloned())
            .unwrap_or(Value::Null)
    })?;
    let rekeyed = scratch.rows(&staged_attachments)?;
    scratch.delete_table(&staged_attachments)?;

    let appended =
        destination.append_rows(&attachment_table_name(destination_table), &rekeyed, None)?;
    Ok(AttachmentOutcome {
        appended,
        skipped: orphans.len(),
    })
}
