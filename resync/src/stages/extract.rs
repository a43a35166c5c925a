//! Extract stage: export the survey through an async replica job.

use super::{Extractor, StagedDataset};
use crate::config::Parameters;
use crate::context::ProcessContext;
use crate::errors::{Diagnostics, MigrationError, Result};
use crate::host::HostSession;
use crate::observability::Messenger;
use crate::portal::{JobState, PortalClient, ReplicaRequest};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Capability a feature service must advertise to be replicated.
const SYNC_CAPABILITY: &str = "Sync";

/// Polls a replica job until it finishes, returning its result URL.
///
/// Polls at a fixed interval and gives up after `max_attempts` polls that
/// did not reach a terminal status.
pub async fn await_job(
    client: &PortalClient,
    status_url: &str,
    token: &str,
    interval: Duration,
    max_attempts: u32,
    messenger: &Messenger,
) -> Result<String> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let status = client.job_status(status_url, token).await?;
        match status.state() {
            JobState::Completed => {
                return status
                    .result_url
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| {
                        MigrationError::protocol(format!(
                            "Replica job [{status_url}] completed without a resultUrl"
                        ))
                    });
            }
            JobState::Failed(reported) => {
                return Err(MigrationError::JobFailed {
                    job_url: status_url.to_string(),
                    status: reported,
                    diagnostics: Diagnostics {
                        warnings: Vec::new(),
                        errors: status.messages,
                    },
                });
            }
            JobState::Pending(reported) => {
                messenger.debug(format!(
                    "Replica job [{reported}], poll {attempts} of {max_attempts}"
                ));
                if attempts >= max_attempts {
                    return Err(MigrationError::Timeout {
                        job_url: status_url.to_string(),
                        attempts,
                    });
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Unpacks `archive` into `into` and returns the top-level directory name.
fn unpack(archive: &Path, into: &Path) -> Result<String> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    if zip.len() == 0 {
        return Err(MigrationError::protocol("Replica archive is empty"));
    }
    let first = zip.by_index(0)?.name().to_string();
    let top = first
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MigrationError::protocol(format!("Unexpected archive entry [{first}]")))?;
    zip.extract(into)?;
    Ok(top)
}

/// Production Extract stage.
#[derive(Debug)]
pub struct PortalReplicator {
    parameters: Parameters,
    client: PortalClient,
    host: Arc<dyn HostSession>,
    messenger: Arc<Messenger>,
}

impl PortalReplicator {
    /// Creates the stage with a client using the configured request timeout.
    pub fn new(
        parameters: Parameters,
        host: Arc<dyn HostSession>,
        messenger: Arc<Messenger>,
    ) -> Result<Self> {
        let client = PortalClient::new(parameters.extract.request_timeout())?;
        Ok(Self {
            parameters,
            client,
            host,
            messenger,
        })
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.host.signin_token() {
            self.messenger.debug("Using the host's sign-in token");
            return Ok(token);
        }
        let p = &self.parameters;
        let (Some(username), Some(password)) = (&p.username, &p.password) else {
            return Err(MigrationError::Authentication {
                portal: p.portal.clone(),
                reason: "no username and password supplied".to_string(),
            });
        };
        self.messenger
            .info(format!("Signing in to [{}] as [{username}]", p.portal));
        self.client
            .generate_token(&p.portal, username, password, p.extract.token_expiry_minutes)
            .await
    }

    fn scratch_dir(&self) -> PathBuf {
        self.parameters
            .extract
            .staging_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("resync-{}", Uuid::new_v4()))
    }

    async fn stage_archive(&self, result_url: &str, token: &str, scratch: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(scratch).await?;
        let archive = scratch.join(format!("{}.zip", Uuid::new_v4()));
        let size = self.client.download(result_url, token, &archive).await?;
        self.messenger
            .info(format!("Downloaded replica ({size} bytes)"));

        let (zip_path, into) = (archive.clone(), scratch.to_path_buf());
        let top = tokio::task::spawn_blocking(move || unpack(&zip_path, &into))
            .await
            .map_err(std::io::Error::other)??;
        tokio::fs::remove_file(&archive).await?;
        debug!(archive = %archive.display(), %top, "Replica unpacked");
        Ok(scratch.join(top))
    }
}

#[async_trait]
impl Extractor for PortalReplicator {
    async fn extract(&self, _ctx: &ProcessContext) -> Result<StagedDataset> {
        let section = self.messenger.section("Extracting survey replica");
        let service_url = &self.parameters.service_url;

        let token = self.token().await?;
        let definition = self.client.service_definition(service_url, &token).await?;
        if !definition.has_capability(SYNC_CAPABILITY) {
            return Err(MigrationError::CapabilityMissing {
                service_url: service_url.clone(),
                capability: SYNC_CAPABILITY.to_string(),
            });
        }

        let request = ReplicaRequest::for_service(&definition);
        self.messenger.info(format!(
            "Requesting replica of {} layer(s) and table(s)",
            request.layers.len()
        ));
        let status_url = self
            .client
            .create_replica(service_url, &token, &request)
            .await?;
        let extract = &self.parameters.extract;
        let result_url = await_job(
            &self.client,
            &status_url,
            &token,
            extract.poll_interval(),
            extract.max_poll_attempts(),
            &self.messenger,
        )
        .await?;

        let scratch = self.scratch_dir();
        let staged = match self.stage_archive(&result_url, &token, &scratch).await {
            Ok(location) => StagedDataset {
                location: location.display().to_string(),
                scratch_root: Some(scratch),
            },
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&scratch).await {
                    debug!(error = %cleanup, "Scratch directory not removed");
                }
                return Err(e);
            }
        };
        self.messenger
            .info(format!("Replica staged at [{}]", staged.location));
        section.finish();
        Ok(staged)
    }
}
