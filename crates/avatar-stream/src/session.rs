//! Conversation identity passed explicitly into each request.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Backend conversation identifier, `session_<unix-millis>_<9 chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!("session_{millis}_{}", &nonce[..9]))
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

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-conversation request state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    student_id: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Start a new conversation.
    pub fn new() -> Self {
        Self {
            id: SessionId::generate(),
            student_id: None,
        }
    }

    /// Resume an existing conversation.
    pub fn with_id(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            student_id: None,
        }
    }

    /// Attach the student the conversation is about.
    pub fn with_student(mut self, student_id: impl Into<String>) -> Self {
        self.student_id = Some(student_id.into());
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn student_id(&self) -> Option<&str> {
        self.student_id.as_deref()
    }

    /// Switch to a fresh conversation id, keeping the student.
    pub fn renew(&mut self) -> &SessionId {
        self.id = SessionId::generate();
        &self.id
    }
}
