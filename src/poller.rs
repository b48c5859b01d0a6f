// ABOUTME: Long-poll of one site's events endpoint with a monotonic cursor
// ABOUTME: Parses the per-room response sections into typed events; never raises

use crate::rooms::{RoomRegistry, ENCODED_CURSOR_PLACEHOLDER};
use crate::transport::Transport;
use sechat_core::events::WireEvent;
use sechat_core::{metrics, ChatError, ChatResult, Event, Site};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Parsed events response
#[derive(Debug, Default)]
pub struct PollBatch {
    /// Largest `t` across sections, if any section carried one
    pub cursor: Option<u64>,
    pub events: Vec<Event>,
}

/// Parse an events response: an object of `r<room id>` sections, each with an
/// optional cursor `t` and an optional event array `e`. Malformed events are skipped.
pub fn parse_poll_response(body: &str, site: Site) -> ChatResult<PollBatch> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ChatError::Parse(format!("events response: {}", e)))?;
    let sections = value
        .as_object()
        .ok_or_else(|| ChatError::Parse("events response is not an object".to_string()))?;

    let mut batch = PollBatch::default();
    for (key, section) in sections {
        if !key.starts_with('r') {
            continue;
        }
        if let Some(t) = section.get("t").and_then(Value::as_u64) {
            batch.cursor = Some(batch.cursor.map_or(t, |c| c.max(t)));
        }
        let Some(events) = section.get("e").and_then(Value::as_array) else {
            continue;
        };
        for raw in events {
            match WireEvent::deserialize(raw) {
                Ok(wire) => batch.events.push(wire.into_event(site)),
                Err(e) => {
                    tracing::debug!(site = %site, section = %key, error = %e, "Skipping malformed event")
                }
            }
        }
    }
    Ok(batch)
}

pub struct EventPoller {
    site: Site,
    transport: Arc<dyn Transport>,
    rooms: Arc<RoomRegistry>,
    cursor: AtomicU64,
    primed: AtomicBool,
}

impl EventPoller {
    pub fn new(site: Site, transport: Arc<dyn Transport>, rooms: Arc<RoomRegistry>) -> Self {
        Self {
            site,
            transport,
            rooms,
            cursor: AtomicU64::new(0),
            primed: AtomicBool::new(false),
        }
    }

    pub fn site(&self) -> Site {
        self.site
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Fetch new events. The first successful poll only establishes the cursor
    /// and returns nothing. Failures are logged and yield an empty batch.
    pub async fn poll(&self) -> Vec<Event> {
        let membership = self.rooms.lock().await;
        let Some(template) = membership.poll_body() else {
            return Vec::new();
        };
        let body = template.replace(ENCODED_CURSOR_PLACEHOLDER, &self.cursor().to_string());
        let url = format!("{}/events", self.site.base_url());

        let response = match self.transport.post(&url, &body).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(site = %self.site, error = %e, "Failed to poll events");
                metrics::record_poll(self.site, false);
                return Vec::new();
            }
        };
        drop(membership);

        let batch = match parse_poll_response(&response, self.site) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(site = %self.site, error = %e, "Failed to parse events");
                metrics::record_poll(self.site, false);
                return Vec::new();
            }
        };
        metrics::record_poll(self.site, true);

        if let Some(t) = batch.cursor {
            self.cursor.fetch_max(t, Ordering::SeqCst);
        }

        if !self.primed.swap(true, Ordering::SeqCst) {
            tracing::info!(
                site = %self.site,
                cursor = self.cursor(),
                discarded = batch.events.len(),
                "Connected to site"
            );
            return Vec::new();
        }

        if !batch.events.is_empty() {
            tracing::debug!(site = %self.site, count = batch.events.len(), "Received events");
            metrics::record_events_received(self.site, batch.events.len());
        }
        batch.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sechat_core::EventType;

    #[test]
    fn test_parse_sections_and_cursor() {
        let body = r#"{
            "r17": {"e": [
                {"event_type": 1, "time_stamp": 1700000000, "content": "hi &amp; bye", "id": 10,
                 "user_id": 5, "user_name": "alice", "room_id": 17, "room_name": "Sandbox", "message_id": 99},
                {"event_type": "bogus", "id": 11}
            ], "t": 500, "d": 1},
            "r42": {"t": 650},
            "sync": 123
        }"#;
        let batch = parse_poll_response(body, Site::StackOverflow).unwrap();
        assert_eq!(batch.cursor, Some(650));
        assert_eq!(batch.events.len(), 1);
        let event = &batch.events[0];
        assert_eq!(event.id, 10);
        assert_eq!(event.event_type, EventType::MessagePosted);
        assert_eq!(event.content.as_deref(), Some("hi & bye"));
        assert_eq!(event.site, Site::StackOverflow);
    }

    #[test]
    fn test_parse_preserves_response_order() {
        let body = r#"{"r2": {"e": [{"event_type": 1, "id": 3}, {"event_type": 1, "id": 1}]},
                       "r1": {"e": [{"event_type": 1, "id": 2}]}}"#;
        let batch = parse_poll_response(body, Site::StackExchange).unwrap();
        let ids: Vec<u64> = batch.events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(batch.cursor, None);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_poll_response("<html>", Site::StackOverflow),
            Err(ChatError::Parse(_))
        ));
        assert!(parse_poll_response("[]", Site::StackOverflow).is_err());
    }
}
