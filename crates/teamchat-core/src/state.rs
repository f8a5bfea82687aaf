//! UI-agnostic conversation state
//!
//! These types are shared by every front-end and don't depend on any specific
//! UI framework.

use serde::{Deserialize, Serialize};

use crate::classifier::AgentIdentity;
use crate::markup::Markup;

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    User,
    Assistant,
}

/// What a turn displays
#[derive(Debug, Clone, PartialEq)]
pub enum TurnContent {
    Plain(String),
    Markup(Markup),
}

/// A message in the conversation. Immutable once appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    role: ChatRole,
    content: TurnContent,
    identity: Option<AgentIdentity>,
    order: usize,
}

impl ChatTurn {
    pub fn role(&self) -> ChatRole {
        self.role
    }

    pub fn content(&self) -> &TurnContent {
        &self.content
    }

    /// Agent that produced an assistant reply; `None` for user turns and errors
    pub fn identity(&self) -> Option<&AgentIdentity> {
        self.identity.as_ref()
    }

    /// Position in the log, starting at 0
    pub fn order(&self) -> usize {
        self.order
    }

    /// Plain text form, for width calculations and copying
    pub fn text(&self) -> String {
        match &self.content {
            TurnContent::Plain(text) => text.clone(),
            TurnContent::Markup(markup) => markup.plain_text(),
        }
    }
}

/// Append-only list of turns
#[derive(Debug, Default)]
pub struct MessageLog {
    turns: Vec<ChatTurn>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> &ChatTurn {
        self.push(ChatRole::User, TurnContent::Plain(text.into()), None)
    }

    pub fn push_reply(&mut self, identity: AgentIdentity, markup: Markup) -> &ChatTurn {
        self.push(ChatRole::Assistant, TurnContent::Markup(markup), Some(identity))
    }

    pub fn push_error(&mut self, message: &str) -> &ChatTurn {
        self.push(
            ChatRole::Assistant,
            TurnContent::Plain(format!("Error: {}", message)),
            None,
        )
    }

    fn push(
        &mut self,
        role: ChatRole,
        content: TurnContent,
        identity: Option<AgentIdentity>,
    ) -> &ChatTurn {
        let order = self.turns.len();
        self.turns.push(ChatTurn {
            role,
            content,
            identity,
            order,
        });
        &self.turns[order]
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turns_keep_creation_order() {
        let mut log = MessageLog::new();
        log.push_user("hello");
        log.push_error("boom");
        log.push_user("again");

        let orders: Vec<usize> = log.turns().iter().map(|t| t.order()).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(log.turns()[1].role(), ChatRole::Assistant);
    }

    #[test]
    fn test_error_turn_is_prefixed() {
        let mut log = MessageLog::new();
        let turn = log.push_error("API Key is missing");
        assert_eq!(turn.text(), "Error: API Key is missing");
        assert!(turn.identity().is_none());
    }

    #[test]
    fn test_reply_carries_identity() {
        let mut log = MessageLog::new();
        let markup = crate::markup::parse_markdown("**done**");
        let turn = log.push_reply(AgentIdentity::orchestrator(), markup);
        assert_eq!(turn.identity().map(|i| i.display_name.as_str()), Some("Orchestrator"));
        assert_eq!(turn.text(), "done");
    }
}
