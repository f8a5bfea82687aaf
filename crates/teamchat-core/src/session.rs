use std::fmt;

use uuid::Uuid;

/// Opaque identifier attached to every request as `conversation_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Holds the session id: created on first use, dropped on "new chat".
#[derive(Debug, Default)]
pub struct SessionStore {
    current: Option<SessionId>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self) -> SessionId {
        self.current
            .get_or_insert_with(|| {
                let id = SessionId::generate();
                log::debug!("created session {}", id);
                id
            })
            .clone()
    }

    pub fn current(&self) -> Option<&SessionId> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
