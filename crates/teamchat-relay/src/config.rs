use std::net::SocketAddr;

use anyhow::{Context, Result};

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";

/// Relay settings, read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Credential for the upstream API. Requests fail with 500 while unset.
    pub api_key: Option<String>,
    pub upstream_url: String,
    pub model: String,
    pub addr: SocketAddr,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let addr = non_empty("RELAY_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr
            .parse()
            .with_context(|| format!("invalid RELAY_ADDR {:?}", addr))?;

        Ok(Self {
            api_key: non_empty("RELAY_API_KEY").or_else(|| non_empty("GROQ_API_KEY")),
            upstream_url: non_empty("RELAY_UPSTREAM_URL")
                .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
            model: non_empty("RELAY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            addr,
        })
    }
}
