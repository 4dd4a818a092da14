use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on a stored log message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExecutionLog {
    pub id: i64,
    pub execution_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[repr(i32)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogKind {
    Stdout = 0,
    Stderr = 1,
    System = 2,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "STDOUT",
            Self::Stderr => "STDERR",
            Self::System => "SYSTEM",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "STDOUT" => Some(Self::Stdout),
            "STDERR" => Some(Self::Stderr),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }
}

/// Truncates `message` to [`MAX_MESSAGE_CHARS`] on a char boundary.
pub fn cap_message(message: &str) -> String {
    match message.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}
