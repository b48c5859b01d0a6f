// ABOUTME: Seams between the dispatcher and the outside world
// ABOUTME: ChatActions (room I/O), Evaluator (free-text fallback) and WordSource (wotd)

use crate::error::ChatResult;
use crate::events::Event;
use crate::site::Site;
use async_trait::async_trait;

// =============================================================================
// Chat actions
// =============================================================================

/// Room-visible operations available to the dispatcher and to running commands.
///
/// Implemented by the bot over its per-site sessions; tests use a recording mock.
#[async_trait]
pub trait ChatActions: Send + Sync {
    /// Post a message to a joined room
    async fn send_message(&self, site: Site, room_id: u64, text: &str) -> ChatResult<()>;

    /// Join rooms on a site. Returns true if every id is joined afterwards.
    async fn join_rooms(&self, site: Site, room_ids: &[u64]) -> ChatResult<bool>;

    /// Leave rooms on a site. Returns true if every id was removed.
    async fn leave_rooms(&self, site: Site, room_ids: &[u64]) -> ChatResult<bool>;

    /// Acknowledge a notification so the server stops re-delivering it
    async fn acknowledge(&self, site: Site, message_id: u64) -> ChatResult<()>;

    /// Reply to the message that produced `event`
    async fn reply(&self, event: &Event, text: &str) -> ChatResult<()> {
        let text = reply_text(event.message_id, text);
        self.send_message(event.site, event.room_id, &text).await
    }
}

/// Prefix `text` with the `:<message id> ` reply marker
pub fn reply_text(message_id: u64, text: &str) -> String {
    format!(":{} {}", message_id, text)
}

// =============================================================================
// Evaluator
// =============================================================================

/// Free-text evaluator used when a reply or mention names no known command
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, input: &str) -> ChatResult<String>;
}

/// Where the `wotd` builtin gets its word
#[async_trait]
pub trait WordSource: Send + Sync {
    /// Chat-ready text announcing today's word
    async fn word_of_the_day(&self) -> ChatResult<String>;
}
