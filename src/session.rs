// ABOUTME: Per-site login state machine over scraped HTML handshakes
// ABOUTME: Holds the chat fkey and resolves the bot's own identity in the background

use crate::rooms::{LeaveAuthority, RoomRegistry};
use crate::transport::{encode_form, Transport};
use regex::Regex;
use sechat_core::events::decode_html_entities;
use sechat_core::{ChatError, ChatResult, LoginFlow, Site, HOME_ROOM_ID};
use serde::Deserialize;
use std::sync::{Arc, LazyLock, RwLock};
use tokio::sync::{watch, Mutex};

pub const FKEY_PATTERN: &str = r#"name="fkey"\s+(?:type="hidden"\s+)?value="([^"]+)""#;
pub const USER_ID_PATTERN: &str = r#"id="active-user" class="user-container user-(\d+)""#;
pub const OPENID_TARGET_PATTERN: &str = r"var target = '([^']+)";

pub const STACKOVERFLOW_LOGIN_URL: &str = "https://stackoverflow.com/users/login";
pub const OPENID_SIGNIN_URL: &str = "https://stackexchange.com/users/signin";
pub const OPENID_SIGNIN_FROM: &str = "https://stackexchange.com/users/login#log-in";
pub const OPENID_SUBMIT_URL: &str = "https://openid.stackexchange.com/affiliate/form/login/submit";
const OPENID_AFFILIATE_ID: &str = "11";

pub static FKEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FKEY_PATTERN).expect("fkey pattern is valid"));
pub static USER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(USER_ID_PATTERN).expect("user id pattern is valid"));
pub static OPENID_TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(OPENID_TARGET_PATTERN).expect("openid target pattern is valid"));

/// Account page the site's logout form lives on
pub fn logout_url(site: Site) -> &'static str {
    match site.login_flow() {
        LoginFlow::StackOverflow => "https://stackoverflow.com/users/logout",
        LoginFlow::OpenId => "https://stackexchange.com/users/logout",
    }
}

fn logout_return_url(site: Site) -> &'static str {
    match site.login_flow() {
        LoginFlow::StackOverflow => "https://stackoverflow.com/",
        LoginFlow::OpenId => "https://stackexchange.com/",
    }
}

/// First capture group of `re` in `text`
pub fn search(re: &Regex, text: &str, what: &str) -> ChatResult<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ChatError::missing_pattern(what))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
    LoggingOut,
}

/// The bot's own account on a site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: u64,
    pub user_name: String,
}

#[derive(Debug, Clone)]
enum IdentityStatus {
    Unavailable,
    Pending,
    Resolved(Identity),
    Failed(String),
}

/// Login secrets, held only for the duration of a login
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

// Custom Debug impl to redact the password
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    #[serde(default)]
    users: Vec<UserInfo>,
}

/// One entry of a `/user/info` response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub id: u64,
    pub name: String,
}

/// POST `<site>/user/info` for the given users as seen from `room_id`
pub async fn fetch_user_info(
    transport: &dyn Transport,
    site: Site,
    room_id: u64,
    user_ids: &[u64],
) -> ChatResult<Vec<UserInfo>> {
    let ids = user_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let room = room_id.to_string();
    let body = encode_form([("ids", ids.as_str()), ("roomId", room.as_str())]);
    let response = transport
        .post(&format!("{}/user/info", site.base_url()), &body)
        .await?;
    let parsed: UserInfoResponse = serde_json::from_str(&response)
        .map_err(|e| ChatError::Parse(format!("user info: {}", e)))?;
    Ok(parsed
        .users
        .into_iter()
        .map(|u| UserInfo {
            id: u.id,
            name: decode_html_entities(&u.name),
        })
        .collect())
}

async fn resolve_identity(transport: &dyn Transport, site: Site) -> ChatResult<Identity> {
    let page = transport.get(&site.room_url(HOME_ROOM_ID)).await?;
    let user_id: u64 = search(&USER_ID_RE, &page, "active user id")?
        .parse()
        .map_err(|_| ChatError::Parse("active user id is not a number".to_string()))?;

    let users = fetch_user_info(transport, site, HOME_ROOM_ID, &[user_id]).await?;
    let user_name = users
        .into_iter()
        .find(|u| u.id == user_id)
        .map(|u| u.name)
        .ok_or_else(|| ChatError::Parse(format!("no user info for user {}", user_id)))?;

    Ok(Identity { user_id, user_name })
}

/// Login state for one site
pub struct SessionManager {
    site: Site,
    transport: Arc<dyn Transport>,
    state: RwLock<SessionState>,
    fkey: RwLock<Option<String>>,
    login_lock: Mutex<()>,
    identity: Arc<watch::Sender<IdentityStatus>>,
}

impl SessionManager {
    pub fn new(site: Site, transport: Arc<dyn Transport>) -> Self {
        let (identity, _) = watch::channel(IdentityStatus::Unavailable);
        Self {
            site,
            transport,
            state: RwLock::new(SessionState::LoggedOut),
            fkey: RwLock::new(None),
            login_lock: Mutex::new(()),
            identity: Arc::new(identity),
        }
    }

    pub fn site(&self) -> Site {
        self.site
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!(site = %self.site, state = ?state, "Session state");
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn is_logged_in(&self) -> bool {
        self.state() == SessionState::LoggedIn
    }

    /// The chat fkey; available while logged in and during logout
    pub fn fkey(&self) -> ChatResult<String> {
        match self.state() {
            SessionState::LoggedIn | SessionState::LoggingOut => self
                .fkey
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .ok_or_else(|| ChatError::InvalidState("no fkey".to_string())),
            state => Err(ChatError::InvalidState(format!(
                "{} session is {:?}",
                self.site, state
            ))),
        }
    }

    /// Log in. Concurrent callers queue; a caller that finds the session
    /// already logged in returns without a second handshake.
    pub async fn login(&self, credentials: &Credentials) -> ChatResult<()> {
        let _guard = self.login_lock.lock().await;
        match self.state() {
            SessionState::LoggedIn => {
                tracing::debug!(site = %self.site, "Already logged in");
                return Ok(());
            }
            SessionState::LoggedOut => {}
            state => {
                return Err(ChatError::InvalidState(format!(
                    "cannot log in while {:?}",
                    state
                )))
            }
        }

        tracing::info!(site = %self.site, email = %credentials.email, "Logging in");
        self.set_state(SessionState::LoggingIn);
        self.identity.send_replace(IdentityStatus::Pending);

        match self.handshake(credentials).await {
            Ok(fkey) => {
                *self.fkey.write().unwrap_or_else(|e| e.into_inner()) = Some(fkey);
                self.set_state(SessionState::LoggedIn);
                self.spawn_identity_resolution();
                tracing::info!(site = %self.site, "Logged in");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::LoggedOut);
                let message = match e {
                    ChatError::Authentication(m) => m,
                    other => other.to_string(),
                };
                self.identity
                    .send_replace(IdentityStatus::Failed(message.clone()));
                tracing::error!(site = %self.site, error = %message, "Login failed");
                Err(ChatError::Authentication(message))
            }
        }
    }

    async fn handshake(&self, credentials: &Credentials) -> ChatResult<String> {
        match self.site.login_flow() {
            LoginFlow::StackOverflow => self.stackoverflow_login(credentials).await?,
            LoginFlow::OpenId => self.openid_login(credentials).await?,
        }
        let page = self.transport.get(&self.site.room_url(HOME_ROOM_ID)).await?;
        search(&FKEY_RE, &page, "chat fkey")
    }

    async fn stackoverflow_login(&self, credentials: &Credentials) -> ChatResult<()> {
        let page = self.transport.get(STACKOVERFLOW_LOGIN_URL).await?;
        let fkey = search(&FKEY_RE, &page, "login fkey")?;
        let body = encode_form([
            ("email", credentials.email.as_str()),
            ("fkey", fkey.as_str()),
            ("oauth_server", ""),
            ("oauth_version", ""),
            ("openid_identifier", ""),
            ("openid_username", ""),
            ("password", credentials.password.as_str()),
            ("ssrc", "head"),
        ]);
        self.transport.post(STACKOVERFLOW_LOGIN_URL, &body).await?;
        Ok(())
    }

    async fn openid_login(&self, credentials: &Credentials) -> ChatResult<()> {
        let signin = self
            .transport
            .post(OPENID_SIGNIN_URL, &encode_form([("from", OPENID_SIGNIN_FROM)]))
            .await?;
        let page = self.transport.get(signin.trim()).await?;
        let fkey = search(&FKEY_RE, &page, "openid fkey")?;
        let body = encode_form([
            ("email", credentials.email.as_str()),
            ("password", credentials.password.as_str()),
            ("affId", OPENID_AFFILIATE_ID),
            ("fkey", fkey.as_str()),
        ]);
        let submitted = self.transport.post(OPENID_SUBMIT_URL, &body).await?;
        let target = search(&OPENID_TARGET_RE, &submitted, "openid target")?;
        self.transport.get(&target).await?;
        Ok(())
    }

    fn spawn_identity_resolution(&self) {
        let transport = Arc::clone(&self.transport);
        let identity = Arc::clone(&self.identity);
        let site = self.site;
        tokio::spawn(async move {
            let status = match resolve_identity(transport.as_ref(), site).await {
                Ok(id) => {
                    tracing::info!(site = %site, user_id = id.user_id, user_name = %id.user_name, "Resolved identity");
                    IdentityStatus::Resolved(id)
                }
                Err(e) => {
                    tracing::warn!(site = %site, error = %e, "Failed to resolve identity");
                    IdentityStatus::Failed(e.to_string())
                }
            };
            identity.send_replace(status);
        });
    }

    /// Wait for identity resolution to finish
    pub async fn identity(&self) -> ChatResult<Identity> {
        let mut rx = self.identity.subscribe();
        let status = rx
            .wait_for(|s| !matches!(s, IdentityStatus::Pending))
            .await
            .map_err(|_| ChatError::InvalidState("identity resolution dropped".to_string()))?
            .clone();
        match status {
            IdentityStatus::Resolved(id) => Ok(id),
            IdentityStatus::Failed(message) => Err(ChatError::Authentication(message)),
            IdentityStatus::Unavailable | IdentityStatus::Pending => Err(
                ChatError::InvalidState(format!("{} session is not logged in", self.site)),
            ),
        }
    }

    /// Leave every joined room (including home) and sign out.
    ///
    /// On failure the session stays logged in.
    pub async fn logout(&self, rooms: &RoomRegistry) -> ChatResult<()> {
        let _guard = self.login_lock.lock().await;
        if self.state() != SessionState::LoggedIn {
            return Err(ChatError::InvalidState(format!(
                "{} session is not logged in",
                self.site
            )));
        }

        tracing::info!(site = %self.site, "Logging out");
        self.set_state(SessionState::LoggingOut);

        if let Err(e) = rooms.leave_all(LeaveAuthority::Logout).await {
            tracing::warn!(site = %self.site, error = %e, "Failed to leave rooms during logout");
        }

        match self.sign_out().await {
            Ok(()) => {
                *self.fkey.write().unwrap_or_else(|e| e.into_inner()) = None;
                self.identity.send_replace(IdentityStatus::Unavailable);
                self.set_state(SessionState::LoggedOut);
                tracing::info!(site = %self.site, "Logged out");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::LoggedIn);
                tracing::error!(site = %self.site, error = %e, "Logout failed");
                Err(ChatError::Authentication(format!("Failed to logout: {}", e)))
            }
        }
    }

    async fn sign_out(&self) -> ChatResult<()> {
        let url = logout_url(self.site);
        let page = self.transport.get(url).await?;
        let fkey = search(&FKEY_RE, &page, "logout fkey")?;
        let body = encode_form([
            ("fkey", fkey.as_str()),
            ("returnUrl", logout_return_url(self.site)),
        ]);
        self.transport.post(url, &body).await?;
        Ok(())
    }
}
