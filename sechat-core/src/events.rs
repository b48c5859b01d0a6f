// ABOUTME: Typed chat events decoded from poll response fragments
// ABOUTME: Maps the numeric wire event codes onto EventType and decodes HTML content

use crate::site::Site;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Kind of chat event, keyed by the numeric `event_type` code on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    MessagePosted,
    MessageEdited,
    UserEntered,
    UserLeft,
    RoomNameChanged,
    MessageStarred,
    DebugMessage,
    UserMentioned,
    MessageFlagged,
    MessageDeleted,
    FileAdded,
    ModeratorFlag,
    UserSettingsChanged,
    GlobalNotification,
    AccessLevelChanged,
    UserNotification,
    Invitation,
    MessageReply,
    MessageMovedOut,
    MessageMovedIn,
    TimeBreak,
    FeedTicker,
    UserSuspended,
    UserMerged,
    UserNameOrAvatarChanged,
    Other(u32),
}

impl EventType {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => EventType::MessagePosted,
            2 => EventType::MessageEdited,
            3 => EventType::UserEntered,
            4 => EventType::UserLeft,
            5 => EventType::RoomNameChanged,
            6 => EventType::MessageStarred,
            7 => EventType::DebugMessage,
            8 => EventType::UserMentioned,
            9 => EventType::MessageFlagged,
            10 => EventType::MessageDeleted,
            11 => EventType::FileAdded,
            12 => EventType::ModeratorFlag,
            13 => EventType::UserSettingsChanged,
            14 => EventType::GlobalNotification,
            15 => EventType::AccessLevelChanged,
            16 => EventType::UserNotification,
            17 => EventType::Invitation,
            18 => EventType::MessageReply,
            19 => EventType::MessageMovedOut,
            20 => EventType::MessageMovedIn,
            21 => EventType::TimeBreak,
            22 => EventType::FeedTicker,
            29 => EventType::UserSuspended,
            30 => EventType::UserMerged,
            34 => EventType::UserNameOrAvatarChanged,
            other => EventType::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            EventType::MessagePosted => 1,
            EventType::MessageEdited => 2,
            EventType::UserEntered => 3,
            EventType::UserLeft => 4,
            EventType::RoomNameChanged => 5,
            EventType::MessageStarred => 6,
            EventType::DebugMessage => 7,
            EventType::UserMentioned => 8,
            EventType::MessageFlagged => 9,
            EventType::MessageDeleted => 10,
            EventType::FileAdded => 11,
            EventType::ModeratorFlag => 12,
            EventType::UserSettingsChanged => 13,
            EventType::GlobalNotification => 14,
            EventType::AccessLevelChanged => 15,
            EventType::UserNotification => 16,
            EventType::Invitation => 17,
            EventType::MessageReply => 18,
            EventType::MessageMovedOut => 19,
            EventType::MessageMovedIn => 20,
            EventType::TimeBreak => 21,
            EventType::FeedTicker => 22,
            EventType::UserSuspended => 29,
            EventType::UserMerged => 30,
            EventType::UserNameOrAvatarChanged => 34,
            EventType::Other(code) => *code,
        }
    }

    /// Posted, edited, reply and mention events are candidates for command dispatch
    pub fn is_message(&self) -> bool {
        matches!(
            self,
            EventType::MessagePosted
                | EventType::MessageEdited
                | EventType::MessageReply
                | EventType::UserMentioned
        )
    }

    /// Reply and mention events address the bot directly and need no trigger
    pub fn addresses_bot(&self) -> bool {
        matches!(self, EventType::MessageReply | EventType::UserMentioned)
    }
}

/// A single chat event. Transient: built per poll fragment and consumed immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: u64,
    pub event_type: EventType,
    pub site: Site,
    pub room_id: u64,
    pub room_name: String,
    pub user_id: u64,
    pub user_name: String,
    pub message_id: u64,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    /// Decoded message content; absent for most non-message events
    pub content: Option<String>,
    pub parent_id: Option<u64>,
    pub target_user_id: Option<u64>,
}

impl Event {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single()
    }

    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Event element as it appears inside an `e` array of the poll response
#[derive(Debug, Deserialize)]
pub struct WireEvent {
    pub event_type: u32,
    #[serde(default)]
    pub time_stamp: i64,
    #[serde(default)]
    pub content: Option<String>,
    pub id: u64,
    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub room_id: u64,
    #[serde(default)]
    pub room_name: String,
    #[serde(default)]
    pub message_id: u64,
    #[serde(default)]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub target_user_id: Option<u64>,
}

impl WireEvent {
    pub fn into_event(self, site: Site) -> Event {
        Event {
            id: self.id,
            event_type: EventType::from_code(self.event_type),
            site,
            room_id: self.room_id,
            room_name: decode_html_entities(&self.room_name),
            user_id: self.user_id,
            user_name: decode_html_entities(&self.user_name),
            message_id: self.message_id,
            timestamp: self.time_stamp,
            content: self.content.as_deref().map(decode_html_entities),
            parent_id: self.parent_id,
            target_user_id: self.target_user_id,
        }
    }
}

/// Decode the handful of entities the chat server emits in message content
pub fn decode_html_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => {
                    let code = if let Some(hex) = entity
                        .strip_prefix("#x")
                        .or_else(|| entity.strip_prefix("#X"))
                    {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        entity.strip_prefix('#').and_then(|dec| dec.parse().ok())
                    };
                    code.and_then(char::from_u32)
                }
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
