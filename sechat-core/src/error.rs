// ABOUTME: Error taxonomy shared by every sechat component.
// ABOUTME: Polling recovers from Network/Parse locally; caller-initiated operations surface them.

use crate::site::Site;
use crate::template::TemplateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Command '{name}' timed out after {elapsed_ms}ms")]
    CommandTimeout { name: String, elapsed_ms: u64 },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("No session for site {0}")]
    UnknownSite(Site),

    #[error("Not in room {room_id} on {site}")]
    NotInRoom { site: Site, room_id: u64 },

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ChatError {
    /// Build a parse error for a pattern that was not found in a scraped page
    pub fn missing_pattern(what: &str) -> Self {
        ChatError::Parse(format!("could not find {} in response", what))
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
