// ABOUTME: Site-agnostic core of the sechat bot: events, commands and dispatch
// ABOUTME: Provides the traits the network layer implements and the logic it drives

pub mod builtins;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod metrics;
pub mod paths;
pub mod recent;
pub mod site;
pub mod store;
pub mod template;
pub mod traits;

pub use commands::{CommandContext, CommandHandler, CommandRegistry};
pub use dispatcher::{
    CommandDispatcher, DispatchOutcome, DispatcherConfig, InvocationHandle, InvocationOutcome,
};
pub use error::{ChatError, ChatResult};
pub use events::{Event, EventType};
pub use recent::RecentEventWindow;
pub use site::{LoginFlow, Site, HOME_ROOM_ID};
pub use store::{BotStore, FileStore, MemoryStore};
pub use template::{PositionalRenderer, TemplateRenderer};
pub use traits::{ChatActions, Evaluator, WordSource};
