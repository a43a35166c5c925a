//! The three pipeline stages.
//!
//! A run is always Extract, then Transform, then Load. Each stage is a trait
//! so the orchestrator can be exercised against fixtures; the production
//! implementations are [`PortalReplicator`], [`ReprojectionTransformer`] and
//! [`ReprojectingAppender`].

mod attachments;
mod extract;
mod field_map;
mod load;
mod ports;
mod survey_tables;
mod transform;

pub use attachments::{replicate_attachments, AttachmentOutcome};
pub use extract::{await_job, PortalReplicator};
pub use field_map::build_field_map;
pub use load::ReprojectingAppender;
pub use ports::StorePorts;
pub use survey_tables::{
    attachment_origins, last_name_part, matches_prefix, prefixed_name, survey_tables,
};
pub use transform::{incremental_exclusion, qualifies, ReprojectionTransformer};

use crate::context::ProcessContext;
use crate::errors::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::PathBuf;
use tracing::debug;

/// Handle to the downloaded replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDataset {
    /// Connection the staging factory opens.
    pub location: String,
    /// Scratch directory owning the dataset, removed by [`StagedDataset::discard`].
    pub scratch_root: Option<PathBuf>,
}

impl StagedDataset {
    /// A dataset that owns no scratch directory.
    #[must_use]
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            scratch_root: None,
        }
    }

    /// Deletes the scratch directory, if any.
    pub async fn discard(&self) -> std::io::Result<()> {
        let Some(root) = &self.scratch_root else {
            return Ok(());
        };
        debug!(root = %root.display(), "Removing staged dataset");
        match tokio::fs::remove_dir_all(root).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Downloads the survey into a local staged dataset.
#[async_trait]
pub trait Extractor: Send + Sync + Debug {
    /// Runs the Extract stage.
    async fn extract(&self, ctx: &ProcessContext) -> Result<StagedDataset>;
}

/// Narrows the staged dataset to this run's increment and stamps it.
#[async_trait]
pub trait Transformer: Send + Sync + Debug {
    /// Runs the Transform stage.
    async fn transform(&self, ctx: &mut ProcessContext, staged: &StagedDataset) -> Result<()>;
}

/// Writes the staged dataset into the destination.
#[async_trait]
pub trait Loader: Send + Sync + Debug {
    /// Runs the Load stage.
    async fn load_from(&self, ctx: &mut ProcessContext, staged: &StagedDataset) -> Result<()>;
}

/// Stage that does nothing, standing in until a real stage is substituted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStage;

#[async_trait]
impl Extractor for NoopStage {
    async fn extract(&self, _ctx: &ProcessContext) -> Result<StagedDataset> {
        debug!("Nothing replicated");
        Ok(StagedDataset::at(""))
    }
}

#[async_trait]
impl Transformer for NoopStage {
    async fn transform(&self, _ctx: &mut ProcessContext, staged: &StagedDataset) -> Result<()> {
        debug!(location = %staged.location, "Nothing transformed");
        Ok(())
    }
}

#[async_trait]
impl Loader for NoopStage {
    async fn load_from(&self, _ctx: &mut ProcessContext, staged: &StagedDataset) -> Result<()> {
        debug!(location = %staged.location, "Nothing loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discard_removes_scratch_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("resync-run");
        std::fs::create_dir_all(root.join("survey.gdb")).unwrap();

        let staged = StagedDataset {
            location: root.join("survey.gdb").display().to_string(),
            scratch_root: Some(root.clone()),
        };
        staged.discard().await.unwrap();
        assert!(!root.exists());

        // Second discard is a no-op.
        staged.discard().await.unwrap();
        StagedDataset::at("elsewhere").discard().await.unwrap();
    }
}
