//! Load stage: provision the destination and append the staged increment.

use super::attachments::replicate_attachments;
use super::field_map::build_field_map;
use super::survey_tables::{attachment_origins, last_name_part, prefixed_name, survey_tables};
use super::{Loader, StagedDataset, StorePorts};
use crate::config::Parameters;
use crate::context::{LoadState, ProcessContext};
use crate::errors::{MigrationError, Result, StoreError};
use crate::observability::Messenger;
use crate::store::{attachment_table_name, Relationship, Reprojection, Workspace};
use async_trait::async_trait;
use std::sync::Arc;

const DEFAULT_FORWARD_LABEL: &str = "Repeat";
const DEFAULT_BACKWARD_LABEL: &str = "MainForm";

/// Production Load stage.
///
/// Creates `{prefix}_{table}` tables on the first run, spatial ones in the
/// destination coordinate system, then appends every staged table and
/// re-keys attachments onto the new parents.
#[derive(Debug)]
pub struct ReprojectingAppender {
    prefix: String,
    destination: String,
    reprojection: Reprojection,
    ports: StorePorts,
    messenger: Arc<Messenger>,
}

impl ReprojectingAppender {
    /// Creates the stage.
    #[must_use]
    pub fn new(parameters: &Parameters, ports: StorePorts, messenger: Arc<Messenger>) -> Self {
        Self {
            prefix: parameters.prefix.clone(),
            destination: parameters.destination.clone(),
            reprojection: parameters.reprojection(),
            ports,
            messenger,
        }
    }

    fn provisioning(&self, err: StoreError) -> MigrationError {
        MigrationError::DestinationProvisioning {
            destination: self.destination.clone(),
            reason: err.message,
            diagnostics: err.diagnostics,
        }
    }

    fn provision_store(&self) -> Result<Arc<dyn Workspace>> {
        if self.ports.destination.exists(&self.destination) {
            self.messenger
                .debug(format!("Destination [{}] exists", self.destination));
        } else {
            self.messenger
                .info(format!("Creating destination [{}]", self.destination));
            self.ports
                .destination
                .create(&self.destination)
                .map_err(|e| self.provisioning(e))?;
        }
        self.ports
            .destination
            .open(&self.destination)
            .map_err(|e| self.provisioning(e))
    }

    /// Destination name of a staged table, preferring a name found by Transform.
    fn target(&self, ctx: &ProcessContext, table: &str) -> String {
        let wanted = prefixed_name(&self.prefix, table);
        ctx.existing_destination_tables
            .iter()
            .find(|e| last_name_part(e).eq_ignore_ascii_case(&wanted))
            .cloned()
            .unwrap_or(wanted)
    }

    fn provision_schema(
        &self,
        ctx: &mut ProcessContext,
        staging: &dyn Workspace,
        destination: &dyn Workspace,
        tables: &[String],
    ) -> Result<()> {
        let section = self.messenger.section("Creating destination schema");

        for domain in staging.domains()? {
            self.messenger.debug(format!("Domain [{}]", domain.name));
            destination
                .create_domain(&domain)
                .map_err(|e| self.provisioning(e))?;
        }

        for table in tables {
            let template = staging.describe_table(table)?;
            let name = prefixed_name(&self.prefix, table);
            let reprojection = template.kind.is_spatial().then_some(&self.reprojection);
            destination
                .create_table(&name, &template, reprojection)
                .map_err(|e| self.provisioning(e))?;
            for field in &template.fields {
                if let Some(domain) = &field.domain {
                    destination
                        .assign_domain(&name, &field.name, domain)
                        .map_err(|e| self.provisioning(e))?;
                }
            }
            self.messenger.info(match reprojection {
                Some(r) => format!("Created [{name}] in [{}] via [{}]", r.crs, r.transformation),
                None => format!("Created [{name}]"),
            });
            ctx.report.tables_created.push(name);
        }

        for relationship in staging.relationships()? {
            if relationship.is_attachment {
                let origin = prefixed_name(&self.prefix, &relationship.origin);
                self.messenger
                    .debug(format!("Enabling attachments on [{origin}]"));
                destination
                    .enable_attachments(&origin)
                    .map_err(|e| self.provisioning(e))?;
                continue;
            }
            let recreated = self.prefixed_relationship(relationship);
            self.messenger.debug(format!(
                "Relationship [{}] {} {} [{}] -> [{}]",
                recreated.name,
                recreated.relationship_type(),
                recreated.cardinality,
                recreated.origin,
                recreated.destination
            ));
            destination
                .create_relationship(&recreated)
                .map_err(|e| self.provisioning(e))?;
        }

        section.finish();
        Ok(())
    }

    fn prefixed_relationship(&self, relationship: Relationship) -> Relationship {
        let or_default = |label: String, default: &str| {
            if label.is_empty() {
                default.to_string()
            } else {
                label
            }
        };
        Relationship {
            name: prefixed_name(&self.prefix, &relationship.name),
            origin: prefixed_name(&self.prefix, &relationship.origin),
            destination: prefixed_name(&self.prefix, &relationship.destination),
            forward_label: or_default(relationship.forward_label, DEFAULT_FORWARD_LABEL),
            backward_label: or_default(relationship.backward_label, DEFAULT_BACKWARD_LABEL),
            ..relationship
        }
    }

    fn append_tables(
        &self,
        ctx: &mut ProcessContext,
        staging: &dyn Workspace,
        destination: &dyn Workspace,
        tables: &[String],
    ) -> Result<()> {
        let section = self.messenger.section("Appending staged rows");
        ctx.cleanup_operations.begin_append();
        for table in tables {
            let target = self.target(ctx, table);
            let field_map = build_field_map(
                &staging.describe_table(table)?,
                &destination.describe_table(&target)?,
            );
            if !field_map.unmapped.is_empty() {
                self.messenger.warn(format!(
                    "[{table}] fields with no counterpart in [{target}]: {}",
                    field_map.unmapped.join(", ")
                ));
            }

            let rows = staging.rows(table)?;
            ctx.cleanup_operations.record_append(&target);
            let appended = destination.append_rows(&target, &rows, Some(&field_map))?;
            self.messenger
                .info(format!("Appended {appended} row(s) to [{target}]"));
            ctx.report.rows_appended.insert(target, appended);
        }
        section.finish();
        Ok(())
    }

    fn replicate(
        &self,
        ctx: &mut ProcessContext,
        staging: &dyn Workspace,
        destination: &dyn Workspace,
    ) -> Result<()> {
        for origin in attachment_origins(staging, "")? {
            let target = self.target(ctx, &origin);
            let attachments = attachment_table_name(&target);
            let present = destination
                .list_tables(Some(&attachments))?
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&attachments));
            if !present {
                self.messenger
                    .warn(format!("[{target}] has no attachment table, skipping attachments"));
                continue;
            }

            let outcome = replicate_attachments(staging, destination, &origin, &target)?;
            self.messenger.info(format!(
                "Appended {} attachment(s) to [{attachments}]",
                outcome.appended
            ));
            if outcome.skipped > 0 {
                self.messenger.warn(format!(
                    "Skipped {} attachment(s) of [{origin}] whose parent was migrated earlier",
                    outcome.skipped
                ));
            }
            ctx.report.attachments_appended += outcome.appended;
            ctx.report.attachments_skipped += outcome.skipped;
        }
        Ok(())
    }
}

#[async_trait]
impl Loader for ReprojectingAppender {
    async fn load_from(&self, ctx: &mut ProcessContext, staged: &StagedDataset) -> Result<()> {
        let section = self
            .messenger
            .section(format!("Loading into [{}]", self.destination));

        let destination = self.provision_store()?;
        ctx.advance_load(LoadState::StoreProvisioned);

        let staging = self.ports.staging.open(&staged.location)?;
        let tables = survey_tables(staging.as_ref(), "")?;

        if ctx.is_first_run() {
            ctx.cleanup_operations.record_create_tables();
            self.provision_schema(ctx, staging.as_ref(), destination.as_ref(), &tables)?;
            ctx.advance_load(LoadState::SchemaProvisioned);
        } else {
            self.messenger
                .info("Destination schema already exists, skipping creation");
            ctx.advance_load(LoadState::SchemaSkipped);
        }

        self.append_tables(ctx, staging.as_ref(), destination.as_ref(), &tables)?;
        ctx.advance_load(LoadState::RowsAppended);

        self.replicate(ctx, staging.as_ref(), destination.as_ref())?;
        ctx.advance_load(LoadState::AttachmentsReplicated);

        ctx.advance_load(LoadState::Done);
        section.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{ReprojectionTransformer, Transformer};
    use crate::store::model::SYNC_TIME_FIELD;
    use crate::store::{Domain, MockWorkspaceFactory, TableKind, Value, WorkspaceFactory};
    use crate::testing::{
        memory_ports, prior_destination, sample_parameters, t0, t0_plus, FaultyWorkspace,
        SurveyFixture, WorkspaceOp, DESTINATION, STAGING_LOCATION,
    };
    use pretty_assertions::assert_eq;

    fn stages(ports: StorePorts) -> (ReprojectionTransformer, ReprojectingAppender) {
        let parameters = sample_parameters("http://127.0.0.1:9");
        let messenger = Arc::new(Messenger::recording());
        (
            ReprojectionTransformer::new(&parameters, ports.clone(), Arc::clone(&messenger)),
            ReprojectingAppender::new(&parameters, ports, messenger),
        )
    }

    async fn run(ports: StorePorts, ctx: &mut ProcessContext) -> Result<()> {
        let staged = StagedDataset::at(STAGING_LOCATION);
        let (transformer, loader) = stages(ports);
        transformer.transform(ctx, &staged).await?;
        loader.load_from(ctx, &staged).await
    }

    #[tokio::test]
    async fn test_first_run_creates_schema_and_appends() {
        // Scenario A at the stage level.
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0()), Some(t0())])
            .with_repeat("repeat", "form", &[Some(t0()), Some(t0())])
            .with_domain(Domain::coded("site_type", &[("a", "A")]), "form", "site")
            .build();
        let (ports, factory) = memory_ports(staged, None);
        let mut ctx = ProcessContext::new(t0_plus(60));

        run(ports, &mut ctx).await.unwrap();

        let destination = factory.open(DESTINATION).unwrap();
        assert_eq!(destination.row_count("bird_form").unwrap(), 2);
        assert_eq!(destination.row_count("bird_repeat").unwrap(), 2);
        assert_eq!(ctx.load_state, LoadState::Done);
        assert!(ctx.cleanup_operations.create_tables);
        assert_eq!(ctx.cleanup_operations.appended_tables(), ["bird_form", "bird_repeat"]);
        assert_eq!(ctx.report.tables_created, vec!["bird_form", "bird_repeat"]);
        assert_eq!(ctx.report.total_rows(), 4);

        let form = destination.describe_table("bird_form").unwrap();
        match &form.kind {
            TableKind::FeatureClass {
                spatial_reference, ..
            } => assert_eq!(spatial_reference.as_deref(), Some("7856")),
            TableKind::Table => panic!("form lost its geometry"),
        }
        assert_eq!(form.field("site").unwrap().domain.as_deref(), Some("site_type"));

        let relationship = destination
            .relationships()
            .unwrap()
            .into_iter()
            .find(|r| r.name == "bird_form_repeat")
            .unwrap();
        assert_eq!(relationship.origin, "bird_form");
        assert_eq!(relationship.destination, "bird_repeat");
        assert_eq!(relationship.forward_label, "Repeat");
        assert_eq!(relationship.backward_label, "MainForm");

        let stamps = destination.select("bird_repeat", &[SYNC_TIME_FIELD]).unwrap();
        assert!(stamps.iter().all(|row| row[0] == Value::Date(t0_plus(60))));
    }

    #[tokio::test]
    async fn test_attachments_follow_their_parents() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0()), Some(t0())])
            .with_attachments("form", 2)
            .build();
        let (ports, factory) = memory_ports(staged, None);
        let mut ctx = ProcessContext::new(t0_plus(60));

        run(ports, &mut ctx).await.unwrap();

        let destination = factory.open(DESTINATION).unwrap();
        assert_eq!(destination.row_count("bird_form__ATTACH").unwrap(), 4);
        assert_eq!(ctx.report.attachments_appended, 4);
        // Attachment rows are removed with their parents, so they are not a cleanup target.
        assert_eq!(ctx.cleanup_operations.appended_tables(), ["bird_form"]);
    }

    #[tokio::test]
    async fn test_subsequent_run_skips_schema() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0_plus(-60)), Some(t0_plus(30))])
            .build();
        let destination = prior_destination("bird", &["form"], Some(t0()));
        let (ports, _) = memory_ports(staged, Some(destination.clone()));
        let mut ctx = ProcessContext::new(t0_plus(60));

        run(ports, &mut ctx).await.unwrap();

        assert!(!ctx.cleanup_operations.create_tables);
        assert!(ctx.report.tables_created.is_empty());
        assert_eq!(destination.row_count("bird_form").unwrap(), 2);
        assert_eq!(
            destination.max_date("bird_form", SYNC_TIME_FIELD).unwrap(),
            Some(t0_plus(60))
        );
    }

    #[tokio::test]
    async fn test_append_target_recorded_before_append() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0())])
            .build();
        let destination = prior_destination("bird", &["form"], Some(t0_plus(-60)));
        let faulty = FaultyWorkspace::wrap(destination)
            .failing(WorkspaceOp::AppendRows, Some("bird_form"));
        let (ports, _) = memory_ports(staged, Some(Arc::new(faulty)));
        let mut ctx = ProcessContext::new(t0_plus(60));

        let err = run(ports, &mut ctx).await.unwrap_err();

        assert_eq!(err.kind(), "StoreError");
        assert_eq!(ctx.cleanup_operations.appended_tables(), ["bird_form"]);
        assert_eq!(ctx.load_state, LoadState::SchemaSkipped);
    }

    #[tokio::test]
    async fn test_store_creation_failure_is_provisioning_error() {
        let staged = SurveyFixture::new().with_form("form", &[Some(t0())]).build();
        let (staging_ports, _) = memory_ports(staged, None);

        let mut destination = MockWorkspaceFactory::new();
        destination.expect_exists().return_const(false);
        destination.expect_create().returning(|_| {
            Err(StoreError::new("cannot create").with_error("ERROR 000210: Cannot create output"))
        });
        let ports = StorePorts::new(staging_ports.staging, Arc::new(destination));
        let (_, loader) = stages(ports);
        let mut ctx = ProcessContext::new(t0());

        let err = loader
            .load_from(&mut ctx, &StagedDataset::at(STAGING_LOCATION))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "DestinationProvisioningError");
        assert_eq!(
            err.diagnostics().unwrap().errors,
            vec!["ERROR 000210: Cannot create output"]
        );
        assert!(ctx.cleanup_operations.is_empty());
    }

    #[tokio::test]
    async fn test_table_creation_failure_keeps_create_marker() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0())])
            .with_repeat("repeat", "form", &[Some(t0())])
            .build();
        let destination = Arc::new(
            FaultyWorkspace::wrap(Arc::new(crate::store::MemoryWorkspace::new()))
                .failing(WorkspaceOp::CreateTable, Some("bird_repeat")),
        );
        let (ports, _) = memory_ports(staged, Some(destination.clone()));
        let mut ctx = ProcessContext::new(t0_plus(60));

        let err = run(ports, &mut ctx).await.unwrap_err();

        assert_eq!(err.kind(), "DestinationProvisioningError");
        assert!(ctx.cleanup_operations.create_tables);
        assert_eq!(ctx.cleanup_operations.append, None);
        assert_eq!(destination.list_tables(None).unwrap(), vec!["bird_form"]);
    }
}
