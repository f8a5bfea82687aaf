//! `POST /api/chat`: forward one message to the completion API and hand its
//! JSON back unchanged.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use teamchat_core::ROUTES;

use crate::config::RelayConfig;

pub struct RelayState {
    pub config: RelayConfig,
    pub client: reqwest::Client,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Serialize)]
struct UpstreamMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    model: &'a str,
    messages: Vec<UpstreamMessage<'a>>,
}

struct RelayError(String);

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0 })),
        )
            .into_response()
    }
}

/// Instructions that make the model tag delegated answers with a routing marker
pub fn system_prompt() -> String {
    let mut prompt = String::from(
        "You are the orchestrator of a team of specialist agents. \
         When a specialist should answer, begin your reply with its marker:\n",
    );
    for route in ROUTES.iter() {
        prompt.push_str(&format!(
            "- {} for the {} ({})\n",
            route.marker, route.display_name, route.role
        ));
    }
    prompt.push_str(
        "Use at most one marker. Answer without a marker when no specialist fits. \
         Format answers in Markdown.",
    );
    prompt
}

/// Best error text from an upstream error body
fn upstream_error(body: &Value, status: reqwest::StatusCode) -> String {
    match body.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(error) => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        None => format!("Upstream returned {}", status),
    }
}

pub async fn chat(
    State(state): State<Arc<RelayState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    match forward(&state, &request).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            log::warn!("chat request failed: {}", e.0);
            e.into_response()
        }
    }
}

async fn forward(state: &RelayState, request: &ChatRequest) -> Result<Value, RelayError> {
    let api_key = state
        .config
        .api_key
        .as_deref()
        .ok_or_else(|| RelayError("API Key is missing".to_string()))?;

    log::info!(
        "forwarding message ({} chars) for conversation {}",
        request.message.chars().count(),
        request.conversation_id.as_deref().unwrap_or("-")
    );

    let prompt = system_prompt();
    let body = UpstreamRequest {
        model: &state.config.model,
        messages: vec![
            UpstreamMessage {
                role: "system",
                content: &prompt,
            },
            UpstreamMessage {
                role: "user",
                content: &request.message,
            },
        ],
    };

    let response = state
        .client
        .post(&state.config.upstream_url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| RelayError(e.to_string()))?;

    let status = response.status();
    let value: Value = response
        .json()
        .await
        .map_err(|e| RelayError(format!("Invalid upstream response: {}", e)))?;

    if !status.is_success() {
        return Err(RelayError(upstream_error(&value, status)));
    }
    Ok(value)
}
