//! REST client for the agent backend.
//!
//! Wraps the two request/response calls the protocol needs: starting a job
//! (`PUT /project/{id}/chat`) and pulling the authoritative record set
//! (`GET /project`). [`JobApi`] is the seam the session depends on so that
//! tests can substitute an in-memory fake.

use agentdesk_core::project::{Project, ProjectList};
use agentdesk_core::types::ConnectionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request/response calls used by the session.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Start a job. Success only means the server accepted it; the outcome
    /// arrives later over the duplex connection.
    async fn submit_job(&self, submission: &JobSubmission) -> Result<(), ApiError>;

    /// Fetch the authoritative record set for the signed-in identity.
    /// Idempotent; safe to call repeatedly.
    async fn fetch_projects(&self) -> Result<Vec<Project>, ApiError>;
}

/// Body of the job submission call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSubmission {
    /// Path parameter, not part of the body.
    #[serde(skip)]
    pub project_id: String,
    #[serde(rename = "userPrompt")]
    pub job_payload: String,
    #[serde(rename = "userEmail")]
    pub identity: Option<String>,
    /// Where the server should push progress and the result.
    #[serde(rename = "socketId")]
    pub connection_id: ConnectionId,
    #[serde(rename = "llm_model_type")]
    pub target_model_type: String,
    #[serde(rename = "llm_model_name")]
    pub target_model_name: String,
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Agent API error ({status}): {message}")]
    Status {
        status: u16,
        /// Server-provided `message`, or the raw body when absent.
        message: String,
    },
}

impl ApiError {
    /// Text suitable for showing to the user verbatim.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// HTTP client for the agent backend.
pub struct AgentApi {
    client: reqwest::Client,
    api_url: String,
    access_token: Option<String>,
}

impl AgentApi {
    /// * `api_url`      - Base HTTP URL, e.g. `http://host:3000`.
    /// * `access_token` - Bearer credential from the session provider.
    pub fn new(api_url: impl Into<String>, access_token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, access_token)
    }

    /// Reuse an existing [`reqwest::Client`] (shared connection pool).
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            access_token,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Return the response unchanged on success, or an
    /// [`ApiError::Status`] carrying the server's message on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(ApiError::Status {
            status: status.as_u16(),
            message: extract_message(&body),
        })
    }
}

/// Prefer the `message` field of a JSON error body, else the raw body.
fn extract_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl JobApi for AgentApi {
    async fn submit_job(&self, submission: &JobSubmission) -> Result<(), ApiError> {
        let url = format!("{}/project/{}/chat", self.api_url, submission.project_id);
        let response = self
            .authorize(self.client.put(url))
            .json(submission)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn fetch_projects(&self) -> Result<Vec<Project>, ApiError> {
        let response = self
            .authorize(self.client.get(format!("{}/project", self.api_url)))
            .send()
            .await?;

        let list = Self::ensure_success(response)
            .await?
            .json::<ProjectList>()
            .await?;
        Ok(list.projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_uses_server_field_names() {
        let submission = JobSubmission {
            project_id: "p1".into(),
            job_payload: "Fix the login bug".into(),
            identity: Some("dev@example.com".into()),
            connection_id: ConnectionId::new("c1"),
            target_model_type: "gpt".into(),
            target_model_name: "gpt-4o-2024-08-06".into(),
        };

        let value = serde_json::to_value(&submission).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "userPrompt": "Fix the login bug",
                "userEmail": "dev@example.com",
                "socketId": "c1",
                "llm_model_type": "gpt",
                "llm_model_name": "gpt-4o-2024-08-06",
            })
        );
    }

    #[test]
    fn error_message_prefers_json_message_field() {
        assert_eq!(
            extract_message(r#"{"message":"No requests left"}"#),
            "No requests left"
        );
        assert_eq!(extract_message("Internal Server Error\n"), "Internal Server Error");
        assert_eq!(extract_message(r#"{"error":"x"}"#), r#"{"error":"x"}"#);
    }

    #[test]
    fn user_message_surfaces_server_text_verbatim() {
        let err = ApiError::Status {
            status: 500,
            message: "Agent is overloaded".into(),
        };
        assert_eq!(err.user_message(), "Agent is overloaded");

        let empty = ApiError::Status {
            status: 502,
            message: String::new(),
        };
        assert_eq!(empty.user_message(), "Agent API error (502): ");
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let api = AgentApi::new("http://localhost:3000/", None);
        assert_eq!(api.api_url(), "http://localhost:3000");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        let api = AgentApi::new("http://127.0.0.1:9", None);
        let err = api.fetch_projects().await.unwrap_err();
        assert!(matches!(err, ApiError::Request(_)));
    }
}
