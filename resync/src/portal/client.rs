//! HTTP client for the portal and feature service endpoints.

use super::models::{
    JobStatus, RemoteError, ReplicaJob, ReplicaRequest, ServiceDefinition, TokenResponse,
};
use crate::errors::{MigrationError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Thin wrapper over `reqwest` speaking the replication protocol.
#[derive(Debug, Clone)]
pub struct PortalClient {
    http: Client,
}

fn remote_error(body: &Value) -> Option<RemoteError> {
    body.get("error")
        .and_then(|e| serde_json::from_value(e.clone()).ok())
}

fn decode<T: DeserializeOwned>(body: Value, what: &str) -> Result<T> {
    if let Some(err) = remote_error(&body) {
        return Err(MigrationError::Protocol {
            message: format!("{what} failed: {}", err.summary()),
            diagnostics: err.diagnostics(),
        });
    }
    serde_json::from_value(body).map_err(|e| MigrationError::protocol(format!("{what}: {e}")))
}

impl PortalClient {
    /// Creates a client with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Requests a session token for a named user.
    pub async fn generate_token(
        &self,
        portal: &str,
        username: &str,
        password: &str,
        expiry_minutes: u32,
    ) -> Result<String> {
        let url = format!("{portal}/sharing/rest/generateToken");
        let expiration = expiry_minutes.to_string();
        debug!(%url, "Requesting login token");

        let body: Value = self
            .http
            .post(&url)
            .form(&[
                ("username", username),
                ("password", password),
                ("client", "referer"),
                ("referer", username),
                ("expiration", expiration.as_str()),
                ("f", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let reason = match remote_error(&body) {
            Some(err) => err.summary(),
            None => match serde_json::from_value::<TokenResponse>(body) {
                Ok(TokenResponse {
                    token: Some(token), ..
                }) if !token.is_empty() => return Ok(token),
                _ => "response carried no token".to_string(),
            },
        };
        Err(MigrationError::Authentication {
            portal: portal.to_string(),
            reason,
        })
    }

    /// Fetches the feature service definition.
    pub async fn service_definition(&self, service_url: &str, token: &str) -> Result<ServiceDefinition> {
        let body: Value = self
            .http
            .get(service_url)
            .query(&[("f", "json"), ("token", token)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(%service_url, "Service definition received");
        decode(body, "Service definition")
    }

    /// Submits an async replica job and returns its status URL.
    pub async fn create_replica(
        &self,
        service_url: &str,
        token: &str,
        request: &ReplicaRequest,
    ) -> Result<String> {
        let url = format!("{service_url}/createReplica/");
        let body: Value = self
            .http
            .post(&url)
            .query(&[("f", "json"), ("token", token)])
            .form(&request.to_form())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(%url, response = %body, "Replica job submitted");

        let job: ReplicaJob = decode(body.clone(), "Create replica")?;
        job.status_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| MigrationError::protocol(format!("invalid job: {body}")))
    }

    /// Polls a job status endpoint once.
    pub async fn job_status(&self, status_url: &str, token: &str) -> Result<JobStatus> {
        let body: Value = self
            .http
            .get(status_url)
            .query(&[("f", "json"), ("token", token)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        decode(body, "Job status")
    }

    /// Downloads the replica archive to `destination`, returning its size in bytes.
    pub async fn download(&self, result_url: &str, token: &str, destination: &Path) -> Result<usize> {
        let bytes = self
            .http
            .get(result_url)
            .query(&[("token", token)])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        tokio::fs::write(destination, &bytes).await?;
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> PortalClient {
        PortalClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_generate_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sharing/rest/generateToken"))
            .and(body_string_contains("client=referer"))
            .and(body_string_contains("expiration=60"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "abc", "expires": 1})))
            .mount(&server)
            .await;

        let token = client()
            .generate_token(&server.uri(), "surveyor", "pw", 60)
            .await
            .unwrap();
        assert_eq!(token, "abc");
    }

    #[tokio::test]
    async fn test_generate_token_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sharing/rest/generateToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"code": 400, "message": "Unable to generate token.", "details": ["Invalid username or password."]}
            })))
            .mount(&server)
            .await;

        let err = client()
            .generate_token(&server.uri(), "surveyor", "bad", 60)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AuthenticationError");
        assert!(err.to_string().contains("Unable to generate token."));
    }

    #[tokio::test]
    async fn test_remote_error_becomes_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/FeatureServer"))
            .and(query_param("token", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"code": 498, "message": "Invalid token.", "details": []}
            })))
            .mount(&server)
            .await;

        let err = client()
            .service_definition(&format!("{}/FeatureServer", server.uri()), "abc")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ProtocolError");
        assert_eq!(err.diagnostics().unwrap().errors, vec!["Invalid token."]);
    }

    #[tokio::test]
    async fn test_create_replica_without_status_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/FeatureServer/createReplica/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"replicaName": "x"})))
            .mount(&server)
            .await;

        let request = ReplicaRequest {
            layers: vec![0],
            bidirectional_attachments: false,
        };
        let err = client()
            .create_replica(&format!("{}/FeatureServer", server.uri()), "abc", &request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid job"));
    }
}
