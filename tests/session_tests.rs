// ABOUTME: Tests for per-site login, identity resolution and logout
// ABOUTME: Drives SessionManager over the scripted fake transport

mod common;

use common::*;
use sechat::rooms::RoomRegistry;
use sechat::session::{logout_url, Credentials, SessionManager, SessionState};
use sechat_core::{ChatError, Site};
use std::sync::Arc;

fn credentials() -> Credentials {
    Credentials::new("bot@example.com", "hunter2")
}

fn session_for(site: Site, fake: &Arc<FakeTransport>) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(site, fake.clone()))
}

#[tokio::test]
async fn test_stackoverflow_login_success() {
    let fake = Arc::new(FakeTransport::new());
    script_stackoverflow_login(&fake);
    let session = session_for(Site::StackOverflow, &fake);

    assert_eq!(session.state(), SessionState::LoggedOut);
    assert!(matches!(session.fkey(), Err(ChatError::InvalidState(_))));

    session.login(&credentials()).await.unwrap();
    assert_eq!(session.state(), SessionState::LoggedIn);
    assert_eq!(session.fkey().unwrap(), CHAT_FKEY);

    let bodies = fake.post_bodies("https://stackoverflow.com/users/login");
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].starts_with("email=bot%40example.com&fkey=loginkey&oauth_server="));
    assert!(bodies[0].contains("password=hunter2"));
    assert!(bodies[0].ends_with("ssrc=head"));
}

#[tokio::test]
async fn test_identity_is_resolved_after_login() {
    let fake = Arc::new(FakeTransport::new());
    script_stackoverflow_login(&fake);
    let session = session_for(Site::StackOverflow, &fake);

    assert!(matches!(
        session.identity().await,
        Err(ChatError::InvalidState(_))
    ));

    session.login(&credentials()).await.unwrap();
    let identity = session.identity().await.unwrap();
    assert_eq!(identity.user_id, BOT_USER_ID);
    assert_eq!(identity.user_name, "sechat & co");

    let info = fake.post_bodies(&url(Site::StackOverflow, "/user/info"));
    assert_eq!(info, vec![format!("ids={}&roomId=1", BOT_USER_ID)]);
}

#[tokio::test]
async fn test_identity_failure_is_reported() {
    let fake = Arc::new(FakeTransport::new());
    script_stackoverflow_login(&fake);
    fake.clear("POST", &url(Site::StackOverflow, "/user/info"));
    fake.on_post(&url(Site::StackOverflow, "/user/info"), "not json");
    let session = session_for(Site::StackOverflow, &fake);

    session.login(&credentials()).await.unwrap();
    assert!(matches!(
        session.identity().await,
        Err(ChatError::Authentication(_))
    ));
    // Login itself stands
    assert!(session.is_logged_in());
}

#[tokio::test]
async fn test_openid_login_success() {
    let fake = Arc::new(FakeTransport::new());
    script_openid_login(&fake, Site::StackExchange);
    let session = session_for(Site::StackExchange, &fake);

    session.login(&credentials()).await.unwrap();
    assert_eq!(session.fkey().unwrap(), CHAT_FKEY);

    assert_eq!(
        fake.post_bodies("https://stackexchange.com/users/signin"),
        vec!["from=https%3A%2F%2Fstackexchange.com%2Fusers%2Flogin%23log-in"]
    );
    let submit = fake.post_bodies("https://openid.stackexchange.com/affiliate/form/login/submit");
    assert_eq!(
        submit,
        vec!["email=bot%40example.com&password=hunter2&affId=11&fkey=openidkey"]
    );
    assert_eq!(fake.count("GET", "https://stackexchange.com/users/authenticate?x=1"), 1);
}

#[tokio::test]
async fn test_login_failure_returns_to_logged_out() {
    let fake = Arc::new(FakeTransport::new());
    fake.on_get("https://stackoverflow.com/users/login", "<html>no form here</html>");
    let session = session_for(Site::StackOverflow, &fake);

    let err = session.login(&credentials()).await.unwrap_err();
    assert!(matches!(err, ChatError::Authentication(ref m) if m.contains("login fkey")));
    assert_eq!(session.state(), SessionState::LoggedOut);
    assert!(session.fkey().is_err());
    assert!(session.identity().await.is_err());
}

#[tokio::test]
async fn test_network_failure_during_login_is_authentication_error() {
    let fake = Arc::new(FakeTransport::new());
    script_stackoverflow_login(&fake);
    fake.clear("GET", &Site::StackOverflow.room_url(1));
    fake.fail_get(&Site::StackOverflow.room_url(1));
    let session = session_for(Site::StackOverflow, &fake);

    assert!(matches!(
        session.login(&credentials()).await,
        Err(ChatError::Authentication(_))
    ));
    assert_eq!(session.state(), SessionState::LoggedOut);
}

#[tokio::test]
async fn test_concurrent_logins_handshake_once() {
    let fake = Arc::new(FakeTransport::new());
    script_stackoverflow_login(&fake);
    let session = session_for(Site::StackOverflow, &fake);
    let creds = credentials();

    let (a, b) = tokio::join!(session.login(&creds), session.login(&creds));
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(fake.count("GET", "https://stackoverflow.com/users/login"), 1);
    assert_eq!(fake.count("POST", "https://stackoverflow.com/users/login"), 1);
}

#[tokio::test]
async fn test_logout_leaves_every_room() {
    let fake = Arc::new(FakeTransport::new());
    script_stackoverflow_login(&fake);
    script_joins(&fake, Site::StackOverflow, &[1, 17]);
    script_logout(&fake, logout_url(Site::StackOverflow));
    let session = session_for(Site::StackOverflow, &fake);
    let rooms = RoomRegistry::new(Site::StackOverflow, fake.clone(), session.clone());

    session.login(&credentials()).await.unwrap();
    assert!(rooms.join_rooms(&[1, 17]).await.unwrap());

    session.logout(&rooms).await.unwrap();
    assert_eq!(session.state(), SessionState::LoggedOut);
    assert!(rooms.joined().await.is_empty());
    assert_eq!(fake.count("POST", &url(Site::StackOverflow, "/chats/leave/1")), 1);
    assert_eq!(fake.count("POST", &url(Site::StackOverflow, "/chats/leave/17")), 1);
    assert_eq!(
        fake.post_bodies("https://stackoverflow.com/users/logout"),
        vec!["fkey=logoutkey&returnUrl=https%3A%2F%2Fstackoverflow.com%2F"]
    );
    assert!(session.fkey().is_err());
}

#[tokio::test]
async fn test_logout_failure_restores_logged_in() {
    let fake = Arc::new(FakeTransport::new());
    script_stackoverflow_login(&fake);
    fake.fail_get("https://stackoverflow.com/users/logout");
    let session = session_for(Site::StackOverflow, &fake);
    let rooms = RoomRegistry::new(Site::StackOverflow, fake.clone(), session.clone());

    session.login(&credentials()).await.unwrap();
    let err = session.logout(&rooms).await.unwrap_err();
    assert!(matches!(err, ChatError::Authentication(_)));
    assert_eq!(session.state(), SessionState::LoggedIn);
    assert_eq!(session.fkey().unwrap(), CHAT_FKEY);
}

#[tokio::test]
async fn test_logout_requires_login() {
    let fake = Arc::new(FakeTransport::new());
    let session = session_for(Site::MetaStackExchange, &fake);
    let rooms = RoomRegistry::new(Site::MetaStackExchange, fake.clone(), session.clone());

    assert!(matches!(
        session.logout(&rooms).await,
        Err(ChatError::InvalidState(_))
    ));
    assert!(fake.requests().is_empty());
}
