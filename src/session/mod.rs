//! Live shell sessions and the registry that owns them.

pub mod registry;
pub mod shell;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use registry::{BroadcastOutcome, SessionRegistry};
pub use shell::Session;

/// Opaque session identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
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

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// `Idle -> Connecting -> Connected -> Disconnected`, or
/// `Connecting -> Disconnected` when the connect attempt fails.
/// Nothing leaves `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}
