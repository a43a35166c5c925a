//! Wire types of the feature service replication protocol.

use crate::errors::Diagnostics;
use serde::{Deserialize, Serialize};

/// The `error` object the portal returns in place of a result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Remote error code.
    #[serde(default)]
    pub code: Option<i64>,
    /// Headline message.
    #[serde(default)]
    pub message: Option<String>,
    /// Detail lines.
    #[serde(default)]
    pub details: Vec<String>,
}

impl RemoteError {
    /// Headline message, or a placeholder.
    #[must_use]
    pub fn summary(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{message} (code {code})"),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => format!("remote error code {code}"),
            (None, None) => "unspecified remote error".to_string(),
        }
    }

    /// Converts the detail lines to diagnostics.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            warnings: Vec::new(),
            errors: self
                .message
                .iter()
                .chain(self.details.iter())
                .cloned()
                .collect(),
        }
    }
}

/// Response of `generateToken`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    /// The session token.
    #[serde(default)]
    pub token: Option<String>,
    /// Expiry in epoch milliseconds.
    #[serde(default)]
    pub expires: Option<i64>,
}

/// Sync sub-capabilities advertised by a feature service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCapabilities {
    /// Whether attachment sync direction can be requested.
    #[serde(default)]
    pub supports_attachments_sync_direction: bool,
}

/// A layer or table entry of a service definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LayerRef {
    /// Layer id.
    pub id: i64,
    /// Layer name.
    #[serde(default)]
    pub name: Option<String>,
}

/// The parts of a feature service definition the replicator needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    /// Comma separated capability names, e.g. `Query,Sync`.
    #[serde(default)]
    pub capabilities: String,
    /// Sync sub-capabilities.
    #[serde(default)]
    pub sync_capabilities: Option<SyncCapabilities>,
    /// Spatial layers.
    #[serde(default)]
    pub layers: Vec<LayerRef>,
    /// Non-spatial tables.
    #[serde(default)]
    pub tables: Vec<LayerRef>,
}

impl ServiceDefinition {
    /// Returns true if the named capability is advertised.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .split(',')
            .any(|c| c.trim().eq_ignore_ascii_case(capability))
    }

    /// Returns true if bidirectional attachment sync may be requested.
    #[must_use]
    pub fn supports_attachment_sync_direction(&self) -> bool {
        self.sync_capabilities
            .as_ref()
            .is_some_and(|s| s.supports_attachments_sync_direction)
    }

    /// Ids of every layer followed by every table.
    #[must_use]
    pub fn layer_ids(&self) -> Vec<i64> {
        self.layers
            .iter()
            .chain(self.tables.iter())
            .map(|l| l.id)
            .collect()
    }
}

/// Response of `createReplica` in async mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaJob {
    /// Job status endpoint.
    #[serde(default)]
    pub status_url: Option<String>,
}

/// Terminal classification of a job status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed(String),
    /// Still queued or running.
    Pending(String),
}

/// Response of a job status poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Status text, e.g. `Pending`, `ExportingData`, `Completed`.
    #[serde(default)]
    pub status: String,
    /// Download location, present once completed.
    #[serde(default)]
    pub result_url: Option<String>,
    /// Remote messages, present on some failures.
    #[serde(default)]
    pub messages: Vec<String>,
}

impl JobStatus {
    /// Classifies the status text.
    #[must_use]
    pub fn state(&self) -> JobState {
        match self.status.as_str() {
            "Completed" => JobState::Completed,
            "Failed" | "CompletedWithErrors" => JobState::Failed(self.status.clone()),
            other => JobState::Pending(other.to_string()),
        }
    }
}

/// Parameters of an async `createReplica` submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaRequest {
    /// Layer and table ids to replicate.
    pub layers: Vec<i64>,
    /// Whether to request bidirectional attachment sync.
    pub bidirectional_attachments: bool,
}

impl ReplicaRequest {
    /// Builds a full-extent request for everything the service exposes.
    #[must_use]
    pub fn for_service(definition: &ServiceDefinition) -> Self {
        Self {
            layers: definition.layer_ids(),
            bidirectional_attachments: definition.supports_attachment_sync_direction(),
        }
    }

    /// Form fields of the submission.
    #[must_use]
    pub fn to_form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("geometry", "-180,-90,180,90".to_string()),
            ("geometryType", "esriGeometryEnvelope".to_string()),
            ("inSR", "4326".to_string()),
            ("transportType", "esriTransportTypeUrl".to_string()),
            ("returnAttachments", "true".to_string()),
            ("returnAttachmentsDatabyURL", "false".to_string()),
            ("async", "true".to_string()),
            ("syncModel", "none".to_string()),
            ("dataFormat", "filegdb".to_string()),
        ];
        if self.bidirectional_attachments {
            form.push(("attachmentsSyncDirection", "bidirectional".to_string()));
        }
        let layers = self
            .layers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        form.push(("layers", layers));
        form
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> ServiceDefinition {
        serde_json::from_value(json!({
            "capabilities": "Query, Sync,Extract",
            "syncCapabilities": {"supportsAttachmentsSyncDirection": true},
            "layers": [{"id": 0, "name": "survey"}],
            "tables": [{"id": 1, "name": "repeat_a"}, {"id": 2}]
        }))
        .unwrap()
    }

    #[test]
    fn test_capabilities() {
        let definition = definition();
        assert!(definition.has_capability("Sync"));
        assert!(!definition.has_capability("Update"));
        assert!(definition.supports_attachment_sync_direction());
        assert_eq!(definition.layer_ids(), vec![0, 1, 2]);
    }

    #[test]
    fn test_replica_request_form() {
        let form = ReplicaRequest::for_service(&definition()).to_form();
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("layers"), Some("0, 1, 2"));
        assert_eq!(get("attachmentsSyncDirection"), Some("bidirectional"));
        assert_eq!(get("dataFormat"), Some("filegdb"));

        let plain = ReplicaRequest {
            layers: vec![3],
            bidirectional_attachments: false,
        };
        assert!(!plain.to_form().iter().any(|(k, _)| *k == "attachmentsSyncDirection"));
    }

    #[test]
    fn test_job_state() {
        let status = |s: &str| JobStatus {
            status: s.to_string(),
            ..JobStatus::default()
        };

        assert_eq!(status("Completed").state(), JobState::Completed);
        assert_eq!(
            status("CompletedWithErrors").state(),
            JobState::Failed("CompletedWithErrors".to_string())
        );
        assert_eq!(status("ExportingData").state(), JobState::Pending("ExportingData".to_string()));
    }

    #[test]
    fn test_remote_error_diagnostics() {
        let err: RemoteError = serde_json::from_value(json!({
            "code": 498, "message": "Invalid token.", "details": ["Token expired"]
        }))
        .unwrap();

        assert_eq!(err.summary(), "Invalid token. (code 498)");
        assert_eq!(err.diagnostics().errors, vec!["Invalid token.", "Token expired"]);
    }
}
