//! Routing-marker detection for assistant replies.
//!
//! The backend asks the model to prefix delegated answers with a marker such as
//! `[[TECH]]`. Detection is a plain substring search in a fixed priority order:
//! when several markers appear, only the first route in [`ROUTES`] that matches
//! is honored and only its first occurrence is removed.

use serde::{Deserialize, Serialize};

/// Display identity of the agent that produced a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub display_name: String,
    pub icon_token: String,
    pub style_class: String,
    pub detected_marker: Option<String>,
}

/// One entry of the routing table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub marker: &'static str,
    pub display_name: &'static str,
    pub icon_token: &'static str,
    pub style_class: &'static str,
    /// What the agent handles, used when prompting the model.
    pub role: &'static str,
}

impl Route {
    fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            display_name: self.display_name.to_string(),
            icon_token: self.icon_token.to_string(),
            style_class: self.style_class.to_string(),
            detected_marker: Some(self.marker.to_string()),
        }
    }
}

/// Routes in scan priority order.
pub const ROUTES: [Route; 4] = [
    Route {
        marker: "[[MEMORY]]",
        display_name: "Memory Agent",
        icon_token: "🧠",
        style_class: "agent-memory",
        role: "history and past context",
    },
    Route {
        marker: "[[TECH]]",
        display_name: "Tech Agent",
        icon_token: "💻",
        style_class: "agent-tech",
        role: "code and debugging",
    },
    Route {
        marker: "[[DATA]]",
        display_name: "Data Agent",
        icon_token: "📊",
        style_class: "agent-data",
        role: "data and analysis",
    },
    Route {
        marker: "[[DOCS]]",
        display_name: "Docs Agent",
        icon_token: "📝",
        style_class: "agent-docs",
        role: "writing and documentation",
    },
];

impl AgentIdentity {
    /// Identity used when no marker is present
    pub fn orchestrator() -> Self {
        Self {
            display_name: "Orchestrator".to_string(),
            icon_token: "🤖".to_string(),
            style_class: "agent-orchestrator".to_string(),
            detected_marker: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.detected_marker.is_none()
    }
}

/// Map raw assistant text to an identity and the text without its marker.
pub fn classify(raw_text: &str) -> (AgentIdentity, String) {
    for route in ROUTES.iter() {
        if let Some(pos) = raw_text.find(route.marker) {
            let mut cleaned = String::with_capacity(raw_text.len() - route.marker.len());
            cleaned.push_str(&raw_text[..pos]);
            cleaned.push_str(&raw_text[pos + route.marker.len()..]);
            return (route.identity(), cleaned.trim().to_string());
        }
    }

    (AgentIdentity::orchestrator(), raw_text.trim().to_string())
}
