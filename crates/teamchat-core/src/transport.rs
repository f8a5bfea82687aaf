use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::session::SessionId;

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<serde_json::Value>,
    detail: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Sends one user turn to the chat backend.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        text: &str,
        session_id: Option<&SessionId>,
        cancel: &CancellationToken,
    ) -> Result<String, ChatError>;
}

/// Transport over HTTP POST with a JSON body
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Like [`HttpTransport::new`] but every request gives up after `timeout`.
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Transport(format!("Could not build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, text: &str, session_id: Option<&SessionId>) -> Result<String, ChatError> {
        let request = ChatRequest {
            message: text,
            conversation_id: session_id.map(|id| id.as_str()),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.text().await.map_err(request_error)?;

        parse_response(status, content_type.as_deref(), &body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        text: &str,
        session_id: Option<&SessionId>,
        cancel: &CancellationToken,
    ) -> Result<String, ChatError> {
        log::info!("POST {} ({} chars)", self.endpoint, text.chars().count());
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("request cancelled");
                Err(ChatError::Cancelled)
            }
            result = self.post(text, session_id) => result,
        }
    }
}

fn request_error(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Transport("Request timed out".to_string())
    } else if e.is_connect() {
        ChatError::Transport(format!("Could not reach the chat server: {}", e))
    } else {
        ChatError::Transport(format!("Request failed: {}", e))
    }
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

fn error_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map a raw HTTP outcome to the assistant text or a classified error.
pub fn parse_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: &str,
) -> Result<String, ChatError> {
    if !is_json(content_type) {
        return Err(ChatError::Transport(format!(
            "Unexpected response from server (status {}, content type {})",
            status.as_u16(),
            content_type.unwrap_or("missing")
        )));
    }

    let parsed: ChatResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) if status.is_success() => {
            return Err(ChatError::MalformedResponse(format!("invalid JSON: {}", e)));
        }
        Err(_) => {
            return Err(ChatError::Transport(format!(
                "Request failed with status {}",
                status.as_u16()
            )));
        }
    };

    if let Some(err) = parsed.error.as_ref().or(parsed.detail.as_ref()) {
        return Err(ChatError::Transport(error_text(err)));
    }

    if !status.is_success() {
        return Err(ChatError::Transport(format!(
            "Request failed with status {}",
            status.as_u16()
        )));
    }

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| {
            ChatError::MalformedResponse("missing choices[0].message.content".to_string())
        })
}
