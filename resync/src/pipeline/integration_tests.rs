//! End-to-end runs of the pipeline against in-memory and directory stores.

#[cfg(test)]
mod tests {
    use crate::context::{LoadState, ProcessContext};
    use crate::errors::{MigrationError, TerminalError};
    use crate::observability::Messenger;
    use crate::pipeline::SurveyReprojector;
    use crate::stages::{
        Loader, ReprojectingAppender, ReprojectionTransformer, StagedDataset, StorePorts,
        Transformer,
    };
    use crate::store::model::SYNC_TIME_FIELD;
    use crate::store::{
        DirectoryWorkspace, DirectoryWorkspaceFactory, MemoryWorkspace, Workspace,
        WorkspaceFactory,
    };
    use crate::testing::{
        memory_ports, prior_destination, sample_parameters, t0, t0_plus, FailingExtractor,
        FaultyWorkspace, RecordingStage, StaticExtractor, SurveyFixture, WorkspaceOp,
        DESTINATION, STAGING_LOCATION,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn pipeline(ports: StorePorts, staged: StagedDataset) -> SurveyReprojector {
        let parameters = sample_parameters("http://127.0.0.1:9");
        let messenger = Arc::new(Messenger::recording());
        SurveyReprojector::new(
            parameters.clone(),
            ports.clone(),
            Arc::new(StaticExtractor::new(staged)),
            Arc::new(ReprojectionTransformer::new(&parameters, ports.clone(), Arc::clone(&messenger))),
            Arc::new(ReprojectingAppender::new(&parameters, ports, Arc::clone(&messenger))),
            messenger,
        )
    }

    #[tokio::test]
    async fn test_scenario_a_first_run_creates_and_fills_tables() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0()), Some(t0_plus(5))])
            .with_repeat("repeat", "form", &[Some(t0()), Some(t0_plus(5))])
            .build();
        let (ports, factory) = memory_ports(staged, None);
        let scratch = tempfile::tempdir().unwrap();
        let scratch_root = scratch.path().join("resync-run");
        std::fs::create_dir_all(&scratch_root).unwrap();
        let dataset = StagedDataset {
            location: STAGING_LOCATION.to_string(),
            scratch_root: Some(scratch_root.clone()),
        };
        let mut ctx = ProcessContext::new(t0_plus(60));

        pipeline(ports, dataset).execute(&mut ctx).await.unwrap();

        let destination = factory.open(DESTINATION).unwrap();
        assert_eq!(destination.list_tables(Some("bird")).unwrap(), vec!["bird_form", "bird_repeat"]);
        assert_eq!(destination.row_count("bird_form").unwrap(), 2);
        assert_eq!(destination.row_count("bird_repeat").unwrap(), 2);
        assert!(ctx.cleanup_operations.is_empty());
        assert_eq!(ctx.load_state, LoadState::Done);
        assert_eq!(ctx.report.total_rows(), 4);
        assert!(!scratch_root.exists());
    }

    #[tokio::test]
    async fn test_scenario_b_only_new_records_are_appended() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0_plus(-60)), Some(t0_plus(60)), Some(t0_plus(120))])
            .build();
        let destination = prior_destination("bird", &["form"], Some(t0()));
        let (ports, _) = memory_ports(staged, Some(destination.clone()));

        let report = pipeline(ports, StagedDataset::at(STAGING_LOCATION))
            .with_process_time(t0_plus(90))
            .run()
            .await
            .unwrap();

        assert_eq!(report.last_sync_time, Some(t0()));
        assert_eq!(report.rows_appended.get("bird_form"), Some(&1));
        let created = destination
            .select("bird_form", &["CreationDate", SYNC_TIME_FIELD])
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[1][0], crate::store::Value::Date(t0_plus(60)));
        assert_eq!(created[1][1], crate::store::Value::Date(t0_plus(90)));
    }

    #[tokio::test]
    async fn test_scenario_c_failed_job_stops_the_run() {
        let stage = Arc::new(RecordingStage::new());
        let destination = FaultyWorkspace::wrap(Arc::new(MemoryWorkspace::new()));
        let destination = Arc::new(destination);
        let (ports, _) = memory_ports(SurveyFixture::new().build(), Some(destination.clone()));

        let err = SurveyReprojector::new(
            sample_parameters("http://127.0.0.1:9"),
            ports,
            Arc::new(FailingExtractor::new(|| MigrationError::JobFailed {
                job_url: "http://127.0.0.1:9/jobs/1".to_string(),
                status: "Failed".to_string(),
                diagnostics: crate::errors::Diagnostics::default(),
            })),
            Arc::clone(&stage) as Arc<dyn Transformer>,
            Arc::clone(&stage) as Arc<dyn Loader>,
            Arc::new(Messenger::recording()),
        )
        .with_process_time(t0())
        .run()
        .await
        .unwrap_err();

        assert_eq!((stage.transform_count(), stage.load_count()), (0, 0));
        assert!(destination.calls().is_empty());
        match err {
            TerminalError::Exit { code, message, .. } => {
                assert_ne!(code, 0);
                assert!(message.contains("[Failed]"));
            }
            other => panic!("unexpected terminal error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_scenario_d_created_tables_are_removed_after_append_failure() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0())])
            .with_repeat("repeat", "form", &[Some(t0())])
            .with_attachments("form", 1)
            .build();
        let inner = Arc::new(MemoryWorkspace::new());
        let destination = Arc::new(
            FaultyWorkspace::wrap(inner.clone()).failing(WorkspaceOp::AppendRows, None),
        );
        let (ports, _) = memory_ports(staged, Some(destination));
        let mut ctx = ProcessContext::new(t0_plus(60));

        let err = pipeline(ports, StagedDataset::at(STAGING_LOCATION))
            .execute(&mut ctx)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), crate::context::ProcessStage::Loading);
        assert!(ctx.cleanup_operations.create_tables);
        assert_eq!(ctx.cleanup_operations.appended_tables(), ["bird_form"]);
        assert!(inner.list_tables(None).unwrap().is_empty());
        assert!(inner.relationships().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_incremental_run_removes_only_its_own_rows() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0_plus(30))])
            .with_repeat("repeat", "form", &[Some(t0_plus(30))])
            .build();
        let inner = prior_destination("bird", &["form", "repeat"], Some(t0()));
        let destination = Arc::new(
            FaultyWorkspace::wrap(inner.clone())
                .failing(WorkspaceOp::AppendRows, Some("bird_repeat")),
        );
        let (ports, _) = memory_ports(staged, Some(destination));
        let mut ctx = ProcessContext::new(t0_plus(60));

        pipeline(ports, StagedDataset::at(STAGING_LOCATION))
            .execute(&mut ctx)
            .await
            .unwrap_err();

        // bird_form received a row and lost it again; prior rows survive.
        assert_eq!(ctx.cleanup_operations.appended_tables(), ["bird_form", "bird_repeat"]);
        assert_eq!(inner.row_count("bird_form").unwrap(), 1);
        assert_eq!(inner.row_count("bird_repeat").unwrap(), 1);
        assert_eq!(inner.max_date("bird_form", SYNC_TIME_FIELD).unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_original_error() {
        let staged = SurveyFixture::new().with_form("form", &[Some(t0())]).build();
        let destination = Arc::new(
            FaultyWorkspace::wrap(Arc::new(MemoryWorkspace::new()))
                .failing(WorkspaceOp::AppendRows, None)
                .failing(WorkspaceOp::DeleteTable, None),
        );
        let (ports, _) = memory_ports(staged, Some(destination));

        let err = pipeline(ports, StagedDataset::at(STAGING_LOCATION))
            .with_process_time(t0_plus(60))
            .run()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Injected AppendRows failure"));
    }

    #[tokio::test]
    async fn test_second_run_skips_provisioning_and_extends_tables() {
        let staged = SurveyFixture::new()
            .with_form("form", &[Some(t0()), Some(t0_plus(30))])
            .with_attachments("form", 1)
            .build();
        let (ports, factory) = memory_ports(staged, None);
        let first = pipeline(ports.clone(), StagedDataset::at(STAGING_LOCATION))
            .with_process_time(t0_plus(10))
            .run()
            .await
            .unwrap();
        assert_eq!(first.tables_created.len(), 1);
        assert_eq!(first.attachments_appended, 1);

        // The next run sees a fresh replica holding both records.
        let replica = SurveyFixture::new()
            .with_form("form", &[Some(t0()), Some(t0_plus(30))])
            .with_attachments("form", 1)
            .build();
        factory.register(STAGING_LOCATION, replica);
        let second = pipeline(ports, StagedDataset::at(STAGING_LOCATION))
            .with_process_time(t0_plus(60))
            .run()
            .await
            .unwrap();

        assert!(second.tables_created.is_empty());
        assert_eq!(second.last_sync_time, Some(t0_plus(10)));
        assert_eq!(second.rows_appended.get("bird_form"), Some(&1));
        assert_eq!(second.attachments_appended, 1);
        let destination = factory.open(DESTINATION).unwrap();
        assert_eq!(destination.row_count("bird_form").unwrap(), 2);
        assert_eq!(destination.row_count("bird_form__ATTACH").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_directory_stores_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let staged_root = dir.path().join("replica").join("survey.gdb");
        let replica = SurveyFixture::new()
            .with_form("form", &[Some(t0()), Some(t0())])
            .build()
            .snapshot();
        std::fs::create_dir_all(&staged_root).unwrap();
        std::fs::write(
            staged_root.join(crate::store::MODEL_FILE),
            serde_json::to_vec(&replica).unwrap(),
        )
        .unwrap();
        let destination_root = dir.path().join("destination.gdb");

        let mut parameters = sample_parameters("http://127.0.0.1:9");
        parameters.destination = destination_root.display().to_string();
        let ports = StorePorts::default();
        let messenger = Arc::new(Messenger::new());
        let reprojector = SurveyReprojector::new(
            parameters.clone(),
            ports.clone(),
            Arc::new(StaticExtractor::new(StagedDataset::at(staged_root.display().to_string()))),
            Arc::new(ReprojectionTransformer::new(&parameters, ports.clone(), Arc::clone(&messenger))),
            Arc::new(ReprojectingAppender::new(&parameters, ports, Arc::clone(&messenger))),
            messenger,
        )
        .with_process_time(t0_plus(60));

        let report = reprojector.run().await.unwrap();

        assert_eq!(report.total_rows(), 2);
        let reopened = DirectoryWorkspace::open(&destination_root).unwrap();
        assert_eq!(reopened.row_count("bird_form").unwrap(), 2);
        assert!(DirectoryWorkspaceFactory.exists(&destination_root.display().to_string()));
    }
}
