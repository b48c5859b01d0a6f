// ABOUTME: ChatBot facade owning every per-site connection, the dispatcher and the poll loop
// ABOUTME: SiteConnections is the ChatActions implementation commands talk to

use crate::poller::EventPoller;
use crate::rooms::{LeaveAuthority, RoomRegistry};
use crate::router::{EventRouter, DEFAULT_POLL_INTERVAL};
use crate::session::{
    fetch_user_info, search, Credentials, Identity, SessionManager, UserInfo, FKEY_RE,
};
use crate::transport::{encode_form, Transport};
use crate::wotd::FeedWordSource;
use async_trait::async_trait;
use futures_util::future::join_all;
use sechat_core::builtins::{add_basic_commands, add_word_of_the_day, standard_builtins};
use sechat_core::{
    BotStore, ChatActions, ChatError, ChatResult, CommandDispatcher, CommandRegistry,
    DispatcherConfig, Evaluator, PositionalRenderer, Site, TemplateRenderer, HOME_ROOM_ID,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Session, membership and poller for one site
pub struct SiteConnection {
    pub session: Arc<SessionManager>,
    pub rooms: Arc<RoomRegistry>,
    pub poller: Arc<EventPoller>,
}

impl SiteConnection {
    pub fn new(site: Site, transport: Arc<dyn Transport>) -> Self {
        let session = Arc::new(SessionManager::new(site, Arc::clone(&transport)));
        let rooms = Arc::new(RoomRegistry::new(
            site,
            Arc::clone(&transport),
            Arc::clone(&session),
        ));
        let poller = Arc::new(EventPoller::new(site, transport, Arc::clone(&rooms)));
        Self {
            session,
            rooms,
            poller,
        }
    }
}

/// All site connections over one shared transport
pub struct SiteConnections {
    transport: Arc<dyn Transport>,
    store: Arc<dyn BotStore>,
    sites: BTreeMap<Site, SiteConnection>,
}

impl SiteConnections {
    pub fn new(sites: &[Site], transport: Arc<dyn Transport>, store: Arc<dyn BotStore>) -> Self {
        let sites = sites
            .iter()
            .map(|&site| (site, SiteConnection::new(site, Arc::clone(&transport))))
            .collect();
        Self {
            transport,
            store,
            sites,
        }
    }

    pub fn get(&self, site: Site) -> ChatResult<&SiteConnection> {
        self.sites.get(&site).ok_or(ChatError::UnknownSite(site))
    }

    pub fn sites(&self) -> impl Iterator<Item = Site> + '_ {
        self.sites.keys().copied()
    }

    pub fn pollers(&self) -> Vec<Arc<EventPoller>> {
        self.sites.values().map(|c| Arc::clone(&c.poller)).collect()
    }

    fn persist_rooms(&self, site: Site, joined: &[u64], left: &[u64]) {
        for &room_id in joined {
            if let Err(e) = self.store.save_room(site, room_id) {
                tracing::warn!(site = %site, room_id, error = %e, "Failed to persist room");
            }
        }
        for &room_id in left {
            if let Err(e) = self.store.delete_room(site, room_id) {
                tracing::warn!(site = %site, room_id, error = %e, "Failed to forget room");
            }
        }
    }

    /// Edit one of the bot's messages
    pub async fn edit_message(&self, site: Site, message_id: u64, text: &str) -> ChatResult<()> {
        let fkey = self.get(site)?.session.fkey()?;
        let url = format!("{}/messages/{}", site.base_url(), message_id);
        self.transport
            .post(&url, &encode_form([("fkey", fkey.as_str()), ("text", text)]))
            .await?;
        Ok(())
    }

    /// Invite a user into a joined room
    pub async fn invite_user(&self, site: Site, user_id: u64, room_id: u64) -> ChatResult<()> {
        let conn = self.get(site)?;
        if !conn.rooms.is_joined(room_id).await {
            return Err(ChatError::NotInRoom { site, room_id });
        }
        let fkey = conn.session.fkey()?;
        let user = user_id.to_string();
        let room = room_id.to_string();
        let url = format!("{}/users/invite", site.base_url());
        let body = encode_form([
            ("fkey", fkey.as_str()),
            ("UserId", user.as_str()),
            ("RoomId", room.as_str()),
        ]);
        self.transport.post(&url, &body).await?;
        Ok(())
    }

    /// Save a range of a room's messages as a named conversation
    pub async fn bookmark_conversation(
        &self,
        site: Site,
        room_id: u64,
        title: &str,
        first_message_id: u64,
        last_message_id: u64,
    ) -> ChatResult<()> {
        let fkey = self.get(site)?.session.fkey()?;
        let room = room_id.to_string();
        let first = first_message_id.to_string();
        let last = last_message_id.to_string();
        let url = format!("{}/conversation/new", site.base_url());
        let body = encode_form([
            ("fkey", fkey.as_str()),
            ("roomId", room.as_str()),
            ("firstMessageId", first.as_str()),
            ("lastMessageId", last.as_str()),
            ("title", title),
        ]);
        tracing::info!(site = %site, room_id, first_message_id, last_message_id, title = %title, "Bookmarking conversation");
        self.transport.post(&url, &body).await?;
        Ok(())
    }

    /// Replace the "about me" text on the bot's chat profile.
    ///
    /// The profile page carries its own fkey, so it is fetched first.
    pub async fn change_about_text(&self, site: Site, text: &str) -> ChatResult<()> {
        let identity = self.get(site)?.session.identity().await?;
        let profile = format!("{}/users/{}", site.base_url(), identity.user_id);
        let page = self.transport.get(&profile).await?;
        let fkey = search(&FKEY_RE, &page, "profile fkey")?;
        let url = format!("{}/users/usermessage/{}", site.base_url(), identity.user_id);
        tracing::info!(site = %site, user_id = identity.user_id, "Changing about text");
        self.transport
            .post(&url, &encode_form([("fkey", fkey.as_str()), ("message", text)]))
            .await?;
        Ok(())
    }

    /// Look up display names for users as seen from a room
    pub async fn user_info(
        &self,
        site: Site,
        room_id: u64,
        user_ids: &[u64],
    ) -> ChatResult<Vec<UserInfo>> {
        self.get(site)?;
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        fetch_user_info(self.transport.as_ref(), site, room_id, user_ids).await
    }
}

#[async_trait]
impl ChatActions for SiteConnections {
    async fn send_message(&self, site: Site, room_id: u64, text: &str) -> ChatResult<()> {
        let conn = self.get(site)?;
        if !conn.rooms.is_joined(room_id).await {
            return Err(ChatError::NotInRoom { site, room_id });
        }
        let fkey = conn.session.fkey()?;
        tracing::info!(site = %site, room_id, text = %text, "Sending message");
        let url = format!("{}/chats/{}/messages/new", site.base_url(), room_id);
        self.transport
            .post(&url, &encode_form([("fkey", fkey.as_str()), ("text", text)]))
            .await?;
        Ok(())
    }

    async fn join_rooms(&self, site: Site, room_ids: &[u64]) -> ChatResult<bool> {
        let conn = self.get(site)?;
        tracing::info!(site = %site, rooms = ?room_ids, "Joining rooms");
        let all_joined = conn.rooms.join_rooms(room_ids).await?;
        let joined = conn.rooms.joined().await;
        let now_joined: Vec<u64> = room_ids
            .iter()
            .copied()
            .filter(|id| joined.contains(id))
            .collect();
        self.persist_rooms(site, &now_joined, &[]);
        Ok(all_joined)
    }

    async fn leave_rooms(&self, site: Site, room_ids: &[u64]) -> ChatResult<bool> {
        let conn = self.get(site)?;
        tracing::info!(site = %site, rooms = ?room_ids, "Leaving rooms");
        let all_left = conn.rooms.leave_rooms(room_ids, LeaveAuthority::Member).await?;
        let joined = conn.rooms.joined().await;
        let left: Vec<u64> = room_ids
            .iter()
            .copied()
            .filter(|id| *id != HOME_ROOM_ID && !joined.contains(id))
            .collect();
        self.persist_rooms(site, &[], &left);
        Ok(all_left)
    }

    async fn acknowledge(&self, site: Site, message_id: u64) -> ChatResult<()> {
        self.get(site)?;
        let id = message_id.to_string();
        let url = format!("{}/messages/ack", site.base_url());
        self.transport
            .post(&url, &encode_form([("id", id.as_str())]))
            .await?;
        Ok(())
    }
}

/// Settings the bot is built from
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub sites: Vec<Site>,
    pub dispatcher: DispatcherConfig,
    pub poll_interval: Duration,
    /// Template builtins as `(name, template)` pairs
    pub basic_commands: Vec<(String, String)>,
    /// Feed for the `wotd` command; None leaves it out
    pub wotd_feed_url: Option<String>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            sites: vec![Site::StackOverflow],
            dispatcher: DispatcherConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            basic_commands: Vec::new(),
            wotd_feed_url: None,
        }
    }
}

/// Owns every collaborator; nothing here is global
pub struct ChatBot {
    connections: Arc<SiteConnections>,
    registry: Arc<CommandRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    store: Arc<dyn BotStore>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl ChatBot {
    /// Build the bot and load learned commands from the store
    pub fn new(
        settings: BotSettings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn BotStore>,
        evaluator: Option<Arc<dyn Evaluator>>,
    ) -> ChatResult<Self> {
        let mut builtins = standard_builtins();
        if let Some(url) = &settings.wotd_feed_url {
            let source = FeedWordSource::new(Arc::clone(&transport), url.clone());
            add_word_of_the_day(&mut builtins, Arc::new(source));
        }
        add_basic_commands(&mut builtins, &settings.basic_commands);

        let connections = Arc::new(SiteConnections::new(
            &settings.sites,
            transport,
            Arc::clone(&store),
        ));
        let registry = Arc::new(CommandRegistry::new(builtins, Arc::clone(&store)));
        registry.load_learned()?;

        let renderer: Arc<dyn TemplateRenderer> = Arc::new(PositionalRenderer);
        let mut dispatcher = CommandDispatcher::new(
            settings.dispatcher,
            Arc::clone(&registry),
            connections.clone(),
            renderer,
        );
        if let Some(evaluator) = evaluator {
            dispatcher = dispatcher.with_evaluator(evaluator);
        }

        Ok(Self {
            connections,
            registry,
            dispatcher: Arc::new(dispatcher),
            store,
            poll_interval: settings.poll_interval,
            shutdown: CancellationToken::new(),
            router: Mutex::new(None),
        })
    }

    pub fn connections(&self) -> &Arc<SiteConnections> {
        &self.connections
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Log in to every site. Credentials are dropped when this returns.
    pub async fn login(&self, credentials: Credentials) -> ChatResult<()> {
        for site in self.connections.sites() {
            self.connections.get(site)?.session.login(&credentials).await?;
        }
        Ok(())
    }

    pub async fn identity(&self, site: Site) -> ChatResult<Identity> {
        self.connections.get(site)?.session.identity().await
    }

    /// Join configured rooms plus every room persisted by earlier runs
    pub async fn join_startup_rooms(&self, configured: &BTreeMap<Site, Vec<u64>>) -> ChatResult<()> {
        for site in self.connections.sites() {
            let mut rooms = vec![HOME_ROOM_ID];
            rooms.extend(configured.get(&site).into_iter().flatten().copied());
            match self.store.load_rooms(site) {
                Ok(stored) => rooms.extend(stored),
                Err(e) => tracing::warn!(site = %site, error = %e, "Failed to load stored rooms"),
            }
            rooms.sort_unstable();
            rooms.dedup();

            if !self.connections.join_rooms(site, &rooms).await? {
                tracing::warn!(site = %site, rooms = ?rooms, "Some startup rooms could not be joined");
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, site: Site, room_id: u64, text: &str) -> ChatResult<()> {
        self.connections.send_message(site, room_id, text).await
    }

    pub async fn join_rooms(&self, site: Site, room_ids: &[u64]) -> ChatResult<bool> {
        self.connections.join_rooms(site, room_ids).await
    }

    pub async fn leave_rooms(&self, site: Site, room_ids: &[u64]) -> ChatResult<bool> {
        self.connections.leave_rooms(site, room_ids).await
    }

    pub fn add_command(&self, name: &str, template: &str) -> bool {
        self.registry.add_command(name, template)
    }

    pub fn remove_command(&self, name: &str) -> bool {
        self.registry.remove_command(name)
    }

    /// Build a router over every site without spawning it
    pub fn router(&self) -> EventRouter {
        EventRouter::new(
            self.connections.pollers(),
            Arc::clone(&self.dispatcher),
            self.poll_interval,
        )
    }

    /// Spawn the background poll loop
    pub fn start(&self) {
        let mut router = self.router.lock().unwrap_or_else(|e| e.into_inner());
        if router.is_some() {
            tracing::debug!("Event router already running");
            return;
        }
        *router = Some(self.router().spawn(self.shutdown.child_token()));
    }

    /// Stop polling and log out of every site
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .router
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Event router ended abnormally");
            }
        }

        let logouts = self.connections.sites().filter_map(|site| {
            let conn = self.connections.get(site).ok()?;
            if !conn.session.is_logged_in() {
                return None;
            }
            Some(async move { (site, conn.session.logout(&conn.rooms).await) })
        });
        for (site, result) in join_all(logouts).await {
            if let Err(e) = result {
                tracing::error!(site = %site, error = %e, "Logout failed during shutdown");
            }
        }
    }
}
