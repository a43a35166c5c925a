//! Survey table discovery.
//!
//! Tables are named `{prefix}_{table}` at the destination and carry no
//! prefix in a staged replica. Store drivers may return fully qualified
//! names (`GDB.SCHEMA.NAME`), so prefixes are matched on the last part.

use crate::store::model::ATTACHMENT_SUFFIX;
use crate::store::Workspace;
use crate::errors::StoreError;

/// Last dotted part of a qualified table name.
#[must_use]
pub fn last_name_part(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

/// Destination name of a staged table.
#[must_use]
pub fn prefixed_name(prefix: &str, table: &str) -> String {
    format!("{prefix}_{}", last_name_part(table))
}

/// Returns true if a qualified table name belongs to the prefix.
///
/// Attachment tables never match. An empty prefix matches every other table.
#[must_use]
pub fn matches_prefix(table: &str, prefix: &str) -> bool {
    if table.contains(ATTACHMENT_SUFFIX) {
        return false;
    }
    prefix.is_empty() || last_name_part(table).starts_with(&format!("{prefix}_"))
}

/// Lists the survey tables of a workspace, attachment tables excluded.
pub fn survey_tables(workspace: &dyn Workspace, prefix: &str) -> Result<Vec<String>, StoreError> {
    let pattern = (!prefix.is_empty()).then_some(prefix);
    Ok(workspace
        .list_tables(pattern)?
        .into_iter()
        .filter(|t| matches_prefix(t, prefix))
        .collect())
}

/// Lists the tables of a workspace that own an attachment relationship.
///
/// With a prefix, only relationships named under that prefix count.
pub fn attachment_origins(workspace: &dyn Workspace, prefix: &str) -> Result<Vec<String>, StoreError> {
    Ok(workspace
        .relationships()?
        .into_iter()
        .filter(|r| r.is_attachment)
        .filter(|r| prefix.is_empty() || last_name_part(&r.name).starts_with(&format!("{prefix}_")))
        .map(|r| last_name_part(&r.origin).to_string())
        .collect())
}
