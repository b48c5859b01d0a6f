// ABOUTME: Scripted fake Transport shared by the integration tests
// ABOUTME: Routes requests by method and exact URL and records every request made

#![allow(dead_code)]

use async_trait::async_trait;
use sechat::transport::Transport;
use sechat_core::{ChatError, ChatResult, Site};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const LOGIN_FKEY: &str = "loginkey";
pub const CHAT_FKEY: &str = "chatkey";
pub const BOT_USER_ID: u64 = 4242;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: &'static str,
    pub url: String,
    pub body: String,
}

/// Responses are consumed in order; the last one repeats
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<(&'static str, String), VecDeque<Result<String, String>>>>,
    requests: Mutex<Vec<Request>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: &'static str, url: &str, response: Result<String, String>) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(response);
    }

    pub fn on_get(&self, url: &str, body: &str) {
        self.push("GET", url, Ok(body.to_string()));
    }

    pub fn on_post(&self, url: &str, body: &str) {
        self.push("POST", url, Ok(body.to_string()));
    }

    pub fn fail_get(&self, url: &str) {
        self.push("GET", url, Err(format!("HTTP 500 for {}", url)));
    }

    pub fn fail_post(&self, url: &str) {
        self.push("POST", url, Err(format!("HTTP 500 for {}", url)));
    }

    /// Drop every scripted response for a route
    pub fn clear(&self, method: &'static str, url: &str) {
        self.routes.lock().unwrap().remove(&(method, url.to_string()));
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    pub fn post_bodies(&self, url: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST" && r.url == url)
            .map(|r| r.body)
            .collect()
    }

    fn respond(&self, method: &'static str, url: &str, body: &str) -> ChatResult<String> {
        self.requests.lock().unwrap().push(Request {
            method,
            url: url.to_string(),
            body: body.to_string(),
        });
        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(&(method, url.to_string())) else {
            return Err(ChatError::Network(format!("no route for {} {}", method, url)));
        };
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match response {
            Some(Ok(body)) => Ok(body),
            Some(Err(e)) => Err(ChatError::Network(e)),
            None => Err(ChatError::Network(format!("no response for {} {}", method, url))),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str) -> ChatResult<String> {
        self.respond("GET", url, "")
    }

    async fn post(&self, url: &str, form_body: &str) -> ChatResult<String> {
        self.respond("POST", url, form_body)
    }
}

pub fn fkey_page(fkey: &str) -> String {
    format!(
        r#"<html><form><input name="fkey" type="hidden" value="{}" /></form></html>"#,
        fkey
    )
}

pub fn chat_home_page() -> String {
    format!(
        r#"<html><div id="active-user" class="user-container user-{}"></div>
           <input name="fkey" type="hidden" value="{}" /></html>"#,
        BOT_USER_ID, CHAT_FKEY
    )
}

pub fn url(site: Site, path: &str) -> String {
    format!("{}{}", site.base_url(), path)
}

/// Script the chat-side pages every login touches: home room, identity and room joins
pub fn script_chat_site(fake: &FakeTransport, site: Site) {
    fake.on_get(&site.room_url(1), &chat_home_page());
    fake.on_post(
        &url(site, "/user/info"),
        &format!(r#"{{"users":[{{"id":{},"name":"sechat &amp; co","is_moderator":false}}]}}"#, BOT_USER_ID),
    );
    fake.on_post(&url(site, "/messages/ack"), "{}");
}

/// Script a successful stackoverflow.com form login
pub fn script_stackoverflow_login(fake: &FakeTransport) {
    fake.on_get("https://stackoverflow.com/users/login", &fkey_page(LOGIN_FKEY));
    fake.on_post("https://stackoverflow.com/users/login", "<html>welcome</html>");
    script_chat_site(fake, Site::StackOverflow);
}

/// Script a successful OpenID login for a stackexchange.com chat site
pub fn script_openid_login(fake: &FakeTransport, site: Site) {
    fake.on_post(
        "https://stackexchange.com/users/signin",
        "https://openid.stackexchange.com/affiliate/form?affId=11",
    );
    fake.on_get(
        "https://openid.stackexchange.com/affiliate/form?affId=11",
        &fkey_page("openidkey"),
    );
    fake.on_post(
        "https://openid.stackexchange.com/affiliate/form/login/submit",
        "<script>var target = 'https://stackexchange.com/users/authenticate?x=1';</script>",
    );
    fake.on_get("https://stackexchange.com/users/authenticate?x=1", "ok");
    script_chat_site(fake, site);
}

pub fn script_joins(fake: &FakeTransport, site: Site, rooms: &[u64]) {
    for room in rooms {
        fake.on_post(&url(site, &format!("/chats/{}/events", room)), r#"{"events":[]}"#);
        fake.on_post(&url(site, &format!("/chats/leave/{}", room)), "ok");
        fake.on_post(&url(site, &format!("/chats/{}/messages/new", room)), r#"{"id":1}"#);
    }
}

pub fn script_logout(fake: &FakeTransport, logout_url: &str) {
    fake.on_get(logout_url, &fkey_page("logoutkey"));
    fake.on_post(logout_url, "bye");
}

/// Poll response with one `r<room>` section
pub fn poll_response(room: u64, cursor: u64, events: &[(u64, u32, &str)]) -> String {
    let events: Vec<serde_json::Value> = events
        .iter()
        .map(|(id, kind, content)| {
            serde_json::json!({
                "event_type": kind,
                "time_stamp": 1_700_000_000u64,
                "content": content,
                "id": id,
                "user_id": 7,
                "user_name": "alice",
                "room_id": room,
                "room_name": "Sandbox",
                "message_id": id * 10,
            })
        })
        .collect();
    let mut sections = serde_json::Map::new();
    sections.insert(
        format!("r{}", room),
        serde_json::json!({ "e": events, "t": cursor }),
    );
    serde_json::Value::Object(sections).to_string()
}

/// Wait until `url` has received at least `n` POSTs; spawned commands finish asynchronously
pub async fn wait_for_posts(fake: &FakeTransport, url: &str, n: usize) -> Vec<String> {
    for _ in 0..200 {
        let bodies = fake.post_bodies(url);
        if bodies.len() >= n {
            return bodies;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("expected {} POSTs to {}, saw {:?}", n, url, fake.post_bodies(url));
}
