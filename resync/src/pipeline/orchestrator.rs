//! Runs Extract, Transform and Load in sequence and owns failure handling.

use super::cleanup::CompensatingCleanup;
use crate::config::Parameters;
use crate::context::{ProcessContext, ProcessStage, RunReport};
use crate::errors::{MigrationError, Result, TerminalError};
use crate::host::{HostSession, StandaloneHost};
use crate::observability::Messenger;
use crate::stages::{
    Extractor, Loader, NoopStage, PortalReplicator, ReprojectingAppender,
    ReprojectionTransformer, StagedDataset, StorePorts, Transformer,
};
use crate::utils::{process_time, timestamp_text, Timestamp};
use std::sync::Arc;
use tracing::{error, info};

/// Exit status used for standalone failures.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// The survey re-synchronisation pipeline.
#[derive(Debug)]
pub struct SurveyReprojector {
    parameters: Parameters,
    extractor: Arc<dyn Extractor>,
    transformer: Arc<dyn Transformer>,
    loader: Arc<dyn Loader>,
    cleanup: CompensatingCleanup,
    host: Arc<dyn HostSession>,
    messenger: Arc<Messenger>,
    process_time: Option<Timestamp>,
}

impl SurveyReprojector {
    /// Wires the production stages.
    pub fn standard(
        parameters: Parameters,
        ports: StorePorts,
        host: Arc<dyn HostSession>,
        messenger: Arc<Messenger>,
    ) -> Result<Self> {
        let extractor =
            PortalReplicator::new(parameters.clone(), Arc::clone(&host), Arc::clone(&messenger))?;
        let transformer =
            ReprojectionTransformer::new(&parameters, ports.clone(), Arc::clone(&messenger));
        let loader = ReprojectingAppender::new(&parameters, ports.clone(), Arc::clone(&messenger));
        Ok(Self::new(
            parameters,
            ports,
            Arc::new(extractor),
            Arc::new(transformer),
            Arc::new(loader),
            messenger,
        )
        .with_host(host))
    }

    /// Creates a pipeline whose stages do nothing until replaced with the
    /// `using_*` methods.
    #[must_use]
    pub fn unconfigured(parameters: Parameters, ports: StorePorts, messenger: Arc<Messenger>) -> Self {
        let noop = Arc::new(NoopStage);
        Self::new(
            parameters,
            ports,
            Arc::clone(&noop) as Arc<dyn Extractor>,
            Arc::clone(&noop) as Arc<dyn Transformer>,
            noop,
            messenger,
        )
    }

    /// Creates a pipeline from explicit stages, running standalone.
    #[must_use]
    pub fn new(
        parameters: Parameters,
        ports: StorePorts,
        extractor: Arc<dyn Extractor>,
        transformer: Arc<dyn Transformer>,
        loader: Arc<dyn Loader>,
        messenger: Arc<Messenger>,
    ) -> Self {
        let cleanup = CompensatingCleanup::new(
            parameters.prefix.clone(),
            parameters.destination.clone(),
            ports.destination,
            Arc::clone(&messenger),
        );
        Self {
            parameters,
            extractor,
            transformer,
            loader,
            cleanup,
            host: Arc::new(StandaloneHost),
            messenger,
            process_time: None,
        }
    }

    /// Replaces the Extract stage.
    #[must_use]
    pub fn using_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replaces the Transform stage.
    #[must_use]
    pub fn using_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = transformer;
        self
    }

    /// Replaces the Load stage.
    #[must_use]
    pub fn using_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = loader;
        self
    }

    /// Sets the hosting environment.
    #[must_use]
    pub fn with_host(mut self, host: Arc<dyn HostSession>) -> Self {
        self.host = host;
        self
    }

    /// Pins the process time instead of reading the clock.
    #[must_use]
    pub fn with_process_time(mut self, at: Timestamp) -> Self {
        self.process_time = Some(at);
        self
    }

    /// Runs the pipeline once.
    pub async fn run(&self) -> Result<RunReport, TerminalError> {
        let at = match self.process_time {
            Some(at) => at,
            None => process_time(&self.parameters.timezone)
                .map_err(|e| self.terminate(ProcessStage::Unstarted, e.into()))?,
        };
        let mut ctx = ProcessContext::new(at);
        self.execute(&mut ctx).await?;
        Ok(ctx.report)
    }

    /// Runs the pipeline against a caller-owned context.
    pub async fn execute(&self, ctx: &mut ProcessContext) -> Result<(), TerminalError> {
        self.messenger.info(format!(
            "Migrating [{}] into [{}] at [{}]",
            self.parameters.service_url,
            self.parameters.destination,
            timestamp_text(&ctx.process_time)
        ));

        let mut staged = None;
        let outcome = self.run_stages(ctx, &mut staged).await;
        match &outcome {
            Ok(()) => ctx.cleanup_operations.clear(),
            Err(e) => self.report_failure(ctx.current_stage, e),
        }

        let failures = self.cleanup.compensate(ctx);
        if !failures.is_empty() {
            self.messenger
                .warn(format!("{} cleanup action(s) failed", failures.len()));
        }

        match outcome {
            Ok(()) => {
                if let Some(staged) = staged {
                    if let Err(e) = staged.discard().await {
                        self.messenger
                            .warn(format!("Staged dataset not removed: {e}"));
                    }
                }
                self.messenger
                    .info(format!("Migration complete: {}", ctx.report));
                info!(report = ?ctx.report, "Run finished");
                Ok(())
            }
            Err(e) => Err(self.terminate(ctx.current_stage, e)),
        }
    }

    async fn run_stages(
        &self,
        ctx: &mut ProcessContext,
        staged: &mut Option<StagedDataset>,
    ) -> Result<()> {
        ctx.current_stage = ProcessStage::Extraction;
        let dataset = staged.insert(self.extractor.extract(ctx).await?);

        ctx.current_stage = ProcessStage::Transformation;
        self.transformer.transform(ctx, dataset).await?;

        ctx.current_stage = ProcessStage::Loading;
        self.loader.load_from(ctx, dataset).await
    }

    fn report_failure(&self, stage: ProcessStage, err: &MigrationError) {
        self.messenger
            .error(format!("{stage} failed with {}: {err}", err.kind()));
        if let Some(diagnostics) = err.diagnostics() {
            for warning in &diagnostics.warnings {
                self.messenger.warn(warning);
            }
            for message in &diagnostics.errors {
                self.messenger.error(message);
            }
        }
        error!(%stage, kind = err.kind(), error = %err, "Run failed");
    }

    fn terminate(&self, stage: ProcessStage, err: MigrationError) -> TerminalError {
        if self.host.is_interactive() {
            TerminalError::Execution { stage, source: err }
        } else {
            TerminalError::Exit {
                stage,
                code: FAILURE_EXIT_CODE,
                message: err.to_string(),
            }
        }
    }
}
