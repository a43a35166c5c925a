//! Transform stage: narrow the staged replica to this run's increment.
//!
//! The staged copy is the unit of truth for Load, so records outside the
//! window `(watermark, process_time]` are deleted from it rather than skipped
//! when reading. Survivors are stamped with the process time, which is what
//! cleanup later matches on.

use super::survey_tables::{attachment_origins, last_name_part, prefixed_name, survey_tables};
use super::{StagedDataset, StorePorts, Transformer};
use crate::config::Parameters;
use crate::context::ProcessContext;
use crate::errors::{MigrationError, Result};
use crate::observability::Messenger;
use crate::store::model::{CREATION_DATE_FIELD, ROW_ID_FIELD, SYNC_TIME_FIELD};
use crate::store::{FieldDef, FieldType, RowFilter, Value, Workspace};
use crate::utils::{generate_guid, timestamp_text, Timestamp};
use async_trait::async_trait;
use std::sync::Arc;

/// Returns true if a record created at `created` belongs to this run.
///
/// A record qualifies when it was created on or before `process_time` and
/// after the watermark, if there is one. Records without a creation time are
/// kept, matching SQL null semantics of the exclusion filter.
#[must_use]
pub fn qualifies(created: Option<Timestamp>, process_time: Timestamp, watermark: Option<Timestamp>) -> bool {
    match created {
        None => true,
        Some(t) => t <= process_time && watermark.map_or(true, |w| t > w),
    }
}

/// Filter selecting the staged rows that do not qualify.
#[must_use]
pub fn incremental_exclusion(process_time: Timestamp, watermark: Option<Timestamp>) -> RowFilter {
    let too_new = RowFilter::DateAfter {
        column: CREATION_DATE_FIELD.to_string(),
        at: process_time,
    };
    match watermark {
        None => too_new,
        Some(at) => RowFilter::Any(vec![
            too_new,
            RowFilter::DateAtOrBefore {
                column: CREATION_DATE_FIELD.to_string(),
                at,
            },
        ]),
    }
}

/// Production Transform stage.
#[derive(Debug)]
pub struct ReprojectionTransformer {
    prefix: String,
    destination: String,
    ports: StorePorts,
    messenger: Arc<Messenger>,
}

impl ReprojectionTransformer {
    /// Creates the stage.
    #[must_use]
    pub fn new(parameters: &Parameters, ports: StorePorts, messenger: Arc<Messenger>) -> Self {
        Self {
            prefix: parameters.prefix.clone(),
            destination: parameters.destination.clone(),
            ports,
            messenger,
        }
    }

    fn destination_tables(&self) -> Result<(Option<Arc<dyn Workspace>>, Vec<String>)> {
        if !self.ports.destination.exists(&self.destination) {
            self.messenger
                .debug(format!("Destination [{}] does not exist yet", self.destination));
            return Ok((None, Vec::new()));
        }
        let workspace = self.ports.destination.open(&self.destination)?;
        let tables = survey_tables(workspace.as_ref(), &self.prefix)?;
        Ok((Some(workspace), tables))
    }

    fn check_completeness(&self, staged: &[String], existing: &[String]) -> Result<()> {
        let missing: Vec<String> = staged
            .iter()
            .map(|t| prefixed_name(&self.prefix, t))
            .filter(|wanted| {
                !existing
                    .iter()
                    .any(|e| last_name_part(e).eq_ignore_ascii_case(wanted))
            })
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        for table in &missing {
            self.messenger
                .warn(format!("No destination table found for [{table}]"));
        }
        Err(MigrationError::SchemaMismatch {
            prefix: self.prefix.clone(),
            expected: staged.len(),
            found: existing.len(),
            missing,
        })
    }

    fn watermark(&self, destination: &dyn Workspace, tables: &[String]) -> Result<Option<Timestamp>> {
        let mut watermark = None;
        for table in tables {
            if destination.row_count(table)? == 0 {
                continue;
            }
            if !destination.describe_table(table)?.has_field(SYNC_TIME_FIELD) {
                self.messenger
                    .warn(format!("[{table}] has no {SYNC_TIME_FIELD} field"));
                continue;
            }
            let latest = destination.max_date(table, SYNC_TIME_FIELD)?;
            watermark = watermark.max(latest);
        }
        Ok(watermark)
    }

    fn narrow(&self, staging: &dyn Workspace, table: &str, exclusion: &RowFilter) -> Result<()> {
        if !staging.describe_table(table)?.has_field(CREATION_DATE_FIELD) {
            self.messenger.warn(format!(
                "[{table}] has no {CREATION_DATE_FIELD} field, keeping every row"
            ));
            return Ok(());
        }
        let removed = staging.delete_rows(table, exclusion)?;
        let kept = staging.row_count(table)?;
        self.messenger
            .info(format!("[{table}] {kept} row(s) to migrate, {removed} excluded"));
        Ok(())
    }

    fn stamp(&self, staging: &dyn Workspace, table: &str, process_time: Timestamp) -> Result<()> {
        staging.disable_editor_tracking(table)?;
        staging.add_field(table, FieldDef::new(SYNC_TIME_FIELD, FieldType::Date))?;
        staging.update_column(table, SYNC_TIME_FIELD, &mut |_| Value::Date(process_time))?;
        Ok(())
    }

    fn backfill_row_ids(&self, staging: &dyn Workspace) -> Result<()> {
        for origin in attachment_origins(staging, "")? {
            staging.add_field(&origin, FieldDef::new(ROW_ID_FIELD, FieldType::Guid))?;
            let updated = staging.update_column(&origin, ROW_ID_FIELD, &mut |current| {
                if current.is_null() {
                    Value::Guid(generate_guid())
                } else {
                    current.clone()
                }
            })?;
            self.messenger
                .debug(format!("[{origin}] {ROW_ID_FIELD} populated on {updated} row(s)"));
        }
        Ok(())
    }
}

#[async_trait]
impl Transformer for ReprojectionTransformer {
    async fn transform(&self, ctx: &mut ProcessContext, staged: &StagedDataset) -> Result<()> {
        let section = self.messenger.section("Transforming staged survey");
        let staging = self.ports.staging.open(&staged.location)?;
        let staged_tables = survey_tables(staging.as_ref(), "")?;

        let (destination, existing) = self.destination_tables()?;
        ctx.existing_destination_tables = existing;
        if let Some(destination) = destination.filter(|_| !ctx.is_first_run()) {
            self.messenger.info(format!(
                "Found {} existing table(s) with prefix [{}]",
                ctx.existing_destination_tables.len(),
                self.prefix
            ));
            self.check_completeness(&staged_tables, &ctx.existing_destination_tables)?;
            ctx.last_sync_time = self.watermark(destination.as_ref(), &ctx.existing_destination_tables)?;
            match &ctx.last_sync_time {
                Some(at) => self
                    .messenger
                    .info(format!("Migrating records created after [{}]", timestamp_text(at))),
                None => self
                    .messenger
                    .warn("Destination tables exist but hold no synchronised records"),
            }
        } else {
            self.messenger.info("No destination tables found, migrating everything");
        }
        ctx.report.last_sync_time = ctx.last_sync_time;

        let exclusion = incremental_exclusion(ctx.process_time, ctx.last_sync_time);
        self.messenger
            .debug(format!("Excluding rows where {}", exclusion.where_clause()));
        for table in &staged_tables {
            self.narrow(staging.as_ref(), table, &exclusion)?;
            self.stamp(staging.as_ref(), table, ctx.process_time)?;
        }
        self.backfill_row_ids(staging.as_ref())?;

        section.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        memory_ports, prior_destination, sample_parameters, t0, t0_plus, SurveyFixture,
        STAGING_LOCATION,
    };
    use pretty_assertions::assert_eq;

    fn transformer(ports: StorePorts) -> ReprojectionTransformer {
        ReprojectionTransformer::new(
            &sample_parameters("http://127.0.0.1:9"),
            ports,
            Arc::new(Messenger::recording()),
        )
    }

    #[test]
    fn test_qualifies_matches_exclusion_filter() {
        let process_time = t0_plus(90);
        for watermark in [None, Some(t0())] {
            let exclusion = incremental_exclusion(process_time, watermark);
            for minutes in [-60, 0, 1, 60, 90, 91, 600] {
                let created = t0_plus(minutes);
                let row = crate::store::Row::from([(
                    CREATION_DATE_FIELD.to_string(),
                    Value::Date(created),
                )]);
                assert_eq!(
                    qualifies(Some(created), process_time, watermark),
                    !exclusion.matches(&row),
                    "created {minutes} min after t0, watermark {watermark:?}"
                );
            }
        }
        assert!(qualifies(None, process_time, Some(t0())));
    }

    #[test]
    fn test_qualifies_boundaries() {
        let process_time = t0_plus(90);
        assert!(qualifies(Some(process_time), process_time, None));
        assert!(!qualifies(Some(t0_plus(91)), process_time, None));
        assert!(!qualifies(Some(t0()), process_time, Some(t0())));
        assert!(qualifies(Some(t0_plus(1)), process_time, Some(t0())));
    }

    #[tokio::test]
    async fn test_first_run_keeps_everything_up_to_process_time() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0()), Some(t0_plus(10)), Some(t0_plus(500)), None])
            .with_attachments("form", 1)
            .build();
        let (ports, _) = memory_ports(staged.clone(), None);
        let mut ctx = ProcessContext::new(t0_plus(60));

        transformer(ports)
            .transform(&mut ctx, &StagedDataset::at(STAGING_LOCATION))
            .await
            .unwrap();

        assert!(ctx.is_first_run());
        assert_eq!(ctx.last_sync_time, None);
        assert_eq!(staged.row_count("form").unwrap(), 3);
        // The attachment of the excluded row went with it.
        assert_eq!(staged.row_count("form__ATTACH").unwrap(), 3);

        let schema = staged.describe_table("form").unwrap();
        assert!(!schema.editor_tracking);
        assert!(schema.has_field(ROW_ID_FIELD));
        let stamped = staged.select("form", &[SYNC_TIME_FIELD, ROW_ID_FIELD]).unwrap();
        assert!(stamped
            .iter()
            .all(|row| row[0] == Value::Date(t0_plus(60)) && !row[1].is_null()));
    }

    #[tokio::test]
    async fn test_incremental_run_uses_destination_watermark() {
        // Scenario B: watermark T0, records at T0-1, T0+1, T0+2, process time T0+1.5.
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0_plus(-60)), Some(t0_plus(60)), Some(t0_plus(120))])
            .build();
        let destination = prior_destination("bird", &["form"], Some(t0()));
        let (ports, _) = memory_ports(staged.clone(), Some(destination));
        let mut ctx = ProcessContext::new(t0_plus(90));

        transformer(ports)
            .transform(&mut ctx, &StagedDataset::at(STAGING_LOCATION))
            .await
            .unwrap();

        assert_eq!(ctx.existing_destination_tables, vec!["bird_form".to_string()]);
        assert_eq!(ctx.last_sync_time, Some(t0()));
        assert_eq!(ctx.report.last_sync_time, Some(t0()));
        let kept = staged.select("form", &[CREATION_DATE_FIELD]).unwrap();
        assert_eq!(kept, vec![vec![Value::Date(t0_plus(60))]]);
    }

    #[tokio::test]
    async fn test_empty_prior_tables_yield_no_watermark() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0_plus(-60))])
            .build();
        let destination = prior_destination("bird", &["form"], None);
        let (ports, _) = memory_ports(staged.clone(), Some(destination));
        let mut ctx = ProcessContext::new(t0());

        transformer(ports)
            .transform(&mut ctx, &StagedDataset::at(STAGING_LOCATION))
            .await
            .unwrap();

        assert!(!ctx.is_first_run());
        assert_eq!(ctx.last_sync_time, None);
        assert_eq!(staged.row_count("form").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incomplete_destination_is_a_schema_mismatch() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0())])
            .with_repeat("repeat", "form", &[Some(t0())])
            .build();
        let destination = prior_destination("bird", &["form"], Some(t0()));
        let (ports, _) = memory_ports(staged.clone(), Some(destination));
        let mut ctx = ProcessContext::new(t0_plus(60));

        let err = transformer(ports)
            .transform(&mut ctx, &StagedDataset::at(STAGING_LOCATION))
            .await
            .unwrap_err();

        match err {
            MigrationError::SchemaMismatch {
                expected,
                found,
                missing,
                ..
            } => {
                assert_eq!((expected, found), (2, 1));
                assert_eq!(missing, vec!["bird_repeat".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Nothing was stamped before the guard tripped.
        assert!(!staged.describe_table("form").unwrap().has_field(SYNC_TIME_FIELD));
    }
}
