// ABOUTME: Joined-room membership for one site plus the cached poll request body
// ABOUTME: The home room can only be left by logout

use crate::session::SessionManager;
use crate::transport::{encode_form, Transport};
use sechat_core::{ChatResult, Site, HOME_ROOM_ID};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Stands in for the poll cursor in the cached body
pub const CURSOR_PLACEHOLDER: &str = "\u{7f}";
/// The placeholder as it appears once form-encoded
pub const ENCODED_CURSOR_PLACEHOLDER: &str = "%7F";

/// Who is asking to leave a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveAuthority {
    /// A command or API caller; may not leave the home room
    Member,
    /// Session logout; may leave every room
    Logout,
}

/// Membership guarded together with the poll body derived from it
#[derive(Debug, Default)]
pub struct Membership {
    joined: BTreeSet<u64>,
    poll_body: Option<String>,
}

impl Membership {
    /// Form body for the events POST, with the cursor still a placeholder.
    /// None while no room is joined.
    pub fn poll_body(&self) -> Option<&str> {
        self.poll_body.as_deref()
    }

    pub fn joined(&self) -> &BTreeSet<u64> {
        &self.joined
    }

    fn rebuild_poll_body(&mut self, fkey: &str) {
        if self.joined.is_empty() {
            self.poll_body = None;
            return;
        }
        let mut pairs: Vec<(String, &str)> = self
            .joined
            .iter()
            .map(|id| (format!("r{}", id), CURSOR_PLACEHOLDER))
            .collect();
        pairs.push(("fkey".to_string(), fkey));
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        self.poll_body = Some(encode_form(pairs.iter().map(|(k, v)| (k.as_str(), *v))));
    }
}

pub struct RoomRegistry {
    site: Site,
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    membership: Mutex<Membership>,
}

impl RoomRegistry {
    pub fn new(site: Site, transport: Arc<dyn Transport>, session: Arc<SessionManager>) -> Self {
        Self {
            site,
            transport,
            session,
            membership: Mutex::new(Membership::default()),
        }
    }

    pub fn site(&self) -> Site {
        self.site
    }

    /// Hold the membership lock; polling keeps it across the events POST
    pub async fn lock(&self) -> MutexGuard<'_, Membership> {
        self.membership.lock().await
    }

    /// Join rooms not yet joined. Only server-acknowledged joins are recorded.
    ///
    /// Returns whether every requested id is joined afterwards.
    pub async fn join_rooms(&self, room_ids: &[u64]) -> ChatResult<bool> {
        let fkey = self.session.fkey()?;
        let mut membership = self.membership.lock().await;

        for &room_id in room_ids {
            if membership.joined.contains(&room_id) {
                continue;
            }
            match self.request_join(room_id, &fkey).await {
                Ok(()) => {
                    tracing::info!(site = %self.site, room_id, "Joined room");
                    membership.joined.insert(room_id);
                }
                Err(e) => {
                    tracing::warn!(site = %self.site, room_id, error = %e, "Failed to join room");
                }
            }
        }

        membership.rebuild_poll_body(&fkey);
        Ok(room_ids.iter().all(|id| membership.joined.contains(id)))
    }

    async fn request_join(&self, room_id: u64, fkey: &str) -> ChatResult<()> {
        let url = format!("{}/chats/{}/events", self.site.base_url(), room_id);
        let body = encode_form([
            ("since", "0"),
            ("mode", "Messages"),
            ("msgCount", "0"),
            ("fkey", fkey),
        ]);
        self.transport.post(&url, &body).await?;
        Ok(())
    }

    /// Leave joined rooms. The home room is refused unless leaving for logout.
    ///
    /// Returns whether every requested id was removed.
    pub async fn leave_rooms(&self, room_ids: &[u64], authority: LeaveAuthority) -> ChatResult<bool> {
        let fkey = self.session.fkey()?;
        let mut membership = self.membership.lock().await;
        let mut all_removed = true;

        for &room_id in room_ids {
            if room_id == HOME_ROOM_ID && authority != LeaveAuthority::Logout {
                tracing::warn!(site = %self.site, room_id, "Refusing to leave the home room");
                all_removed = false;
                continue;
            }
            if !membership.joined.remove(&room_id) {
                all_removed = false;
                continue;
            }
            let url = format!("{}/chats/leave/{}", self.site.base_url(), room_id);
            let body = encode_form([("fkey", fkey.as_str()), ("quiet", "true")]);
            match self.transport.post(&url, &body).await {
                Ok(_) => tracing::info!(site = %self.site, room_id, "Left room"),
                Err(e) => {
                    tracing::warn!(site = %self.site, room_id, error = %e, "Failed to leave room")
                }
            }
        }

        membership.rebuild_poll_body(&fkey);
        Ok(all_removed)
    }

    pub async fn leave_all(&self, authority: LeaveAuthority) -> ChatResult<bool> {
        let joined = self.joined().await;
        self.leave_rooms(&joined, authority).await
    }

    pub async fn joined(&self) -> Vec<u64> {
        self.membership.lock().await.joined.iter().copied().collect()
    }

    pub async fn is_joined(&self, room_id: u64) -> bool {
        self.membership.lock().await.joined.contains(&room_id)
    }
}
