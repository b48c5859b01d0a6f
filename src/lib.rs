// ABOUTME: Root library module exposing the network side of the sechat bot
// ABOUTME: Transport, sessions, room membership, polling, the ChatBot facade and the wotd feed

pub mod bot;
pub mod poller;
pub mod rooms;
pub mod router;
pub mod session;
pub mod transport;
pub mod wotd;

// Re-export the site-agnostic core
pub use sechat_core::config;
pub use sechat_core::metrics;
pub use sechat_core::paths;
pub use sechat_core::{commands, dispatcher, events, store};

pub use bot::{BotSettings, ChatBot, SiteConnections};
pub use session::Credentials;
pub use transport::{HttpTransport, Transport};
