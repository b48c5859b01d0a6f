// ABOUTME: Command parsing and the builtin + learned command registry
// ABOUTME: Names are trimmed and lower-cased; builtin and learned share one namespace

use crate::error::{ChatError, ChatResult};
use crate::events::{Event, EventType};
use crate::store::BotStore;
use crate::template::TemplateRenderer;
use crate::traits::{ChatActions, Evaluator};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Fixed reply for recognized bad input (e.g. malformed template arguments)
pub const INVALID_INPUT_REPLY: &str = "Invalid input.";

/// A command name plus its unparsed argument string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Lower-cased, trimmed command name
    pub name: String,
    /// Everything after the first space
    pub args: String,
}

impl CommandLine {
    pub fn new(name: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            name: normalize_name(&name.into()),
            args: args.into(),
        }
    }
}

/// Trim and lower-case a command name
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Strip a leading `:<digits> ` reply marker
pub fn strip_reply_marker(content: &str) -> &str {
    let Some(rest) = content.strip_prefix(':') else {
        return content;
    };
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return content;
    }
    match rest[digits..].strip_prefix(' ') {
        Some(after) => after,
        None => content,
    }
}

/// Strip a leading `@name` mention token
pub fn strip_mention(content: &str) -> &str {
    if !content.starts_with('@') {
        return content;
    }
    match content.split_once(char::is_whitespace) {
        Some((_, rest)) => rest,
        None => "",
    }
}

/// Reduce raw message content to the text that may hold a command
pub fn sterilize_content(event_type: EventType, content: &str) -> String {
    let trimmed = content.trim();
    let stripped = match event_type {
        EventType::MessageReply => strip_reply_marker(trimmed),
        EventType::UserMentioned => strip_mention(trimmed),
        _ => trimmed,
    };
    stripped.trim().to_string()
}

/// Split content into a command line.
///
/// With `require_trigger`, content must start with `trigger`; otherwise a leading
/// trigger is stripped when present. Returns None when nothing is left to run.
pub fn parse_command_line(content: &str, trigger: &str, require_trigger: bool) -> Option<CommandLine> {
    let body = if trigger.is_empty() {
        content
    } else {
        match content.strip_prefix(trigger) {
            Some(rest) => rest,
            None if require_trigger => return None,
            None => content,
        }
    };

    let (name, args) = match body.split_once(' ') {
        Some((name, args)) => (name, args),
        None => (body, ""),
    };
    let name = normalize_name(name);
    if name.is_empty() {
        return None;
    }
    Some(CommandLine {
        name,
        args: args.to_string(),
    })
}

// =============================================================================
// Command execution context
// =============================================================================

/// Everything a running command can see: its event, its args and the
/// cancellation token it must honor.
#[derive(Clone)]
pub struct CommandContext {
    pub name: String,
    pub event: Event,
    pub args: String,
    pub cancel: CancellationToken,
    pub chat: Arc<dyn ChatActions>,
    pub registry: Arc<CommandRegistry>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub evaluator: Option<Arc<dyn Evaluator>>,
}

impl CommandContext {
    /// Run a future unless the invocation is cancelled first
    pub async fn cancellable<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Render `template` over `args` with the configured renderer
    pub fn render(&self, template: &str, args: &str) -> ChatResult<String> {
        self.renderer
            .render(template, args)
            .map_err(ChatError::from)
    }

    pub async fn reply(&self, text: &str) -> ChatResult<()> {
        self.chat.reply(&self.event, text).await
    }

    pub async fn say(&self, text: &str) -> ChatResult<()> {
        self.chat
            .send_message(self.event.site, self.event.room_id, text)
            .await
    }
}

/// Native command implementation
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()>;
}

/// What a name resolves to
#[derive(Clone)]
pub enum CommandBody {
    Native(Arc<dyn CommandHandler>),
    Template(String),
}

impl std::fmt::Debug for CommandBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandBody::Native(_) => f.write_str("Native(..)"),
            CommandBody::Template(t) => f.debug_tuple("Template").field(t).finish(),
        }
    }
}

/// Runs a learned command: render its template with the args and post the result
pub struct TemplateCommand {
    template: String,
}

impl TemplateCommand {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl CommandHandler for TemplateCommand {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        match ctx.render(&self.template, &ctx.args) {
            Ok(text) => ctx.say(&text).await?,
            Err(e) => {
                tracing::debug!(command = %ctx.name, error = %e, "Template rendering failed");
                ctx.reply(INVALID_INPUT_REPLY).await?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable builtin set plus a mutable, persisted learned set
pub struct CommandRegistry {
    builtin: BTreeMap<String, Arc<dyn CommandHandler>>,
    learned: Mutex<BTreeMap<String, String>>,
    store: Arc<dyn BotStore>,
}

impl CommandRegistry {
    pub fn new(builtin: BTreeMap<String, Arc<dyn CommandHandler>>, store: Arc<dyn BotStore>) -> Self {
        let builtin = builtin
            .into_iter()
            .map(|(name, handler)| (normalize_name(&name), handler))
            .collect();
        Self {
            builtin,
            learned: Mutex::new(BTreeMap::new()),
            store,
        }
    }

    /// Load previously learned commands from the store.
    ///
    /// Names that collide with a builtin are skipped.
    pub fn load_learned(&self) -> ChatResult<usize> {
        let commands = self.store.load_commands()?;
        let mut learned = self.lock_learned();
        let mut loaded = 0;
        for (name, template) in commands {
            let name = normalize_name(&name);
            if self.builtin.contains_key(&name) {
                tracing::warn!(command = %name, "Stored command shadows a builtin, skipping");
                continue;
            }
            learned.insert(name, template);
            loaded += 1;
        }
        tracing::info!(count = loaded, "Loaded learned commands");
        Ok(loaded)
    }

    fn lock_learned(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map is still structurally valid
        self.learned.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve a name: builtins first, then learned commands
    pub fn lookup(&self, name: &str) -> Option<CommandBody> {
        let name = normalize_name(name);
        if let Some(handler) = self.builtin.get(&name) {
            return Some(CommandBody::Native(Arc::clone(handler)));
        }
        self.lock_learned()
            .get(&name)
            .map(|template| CommandBody::Template(template.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.builtin.contains_key(&name) || self.lock_learned().contains_key(&name)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.contains_key(&normalize_name(name))
    }

    /// Add a learned command. Fails without mutation if the name exists in either set.
    pub fn add_command(&self, name: &str, template: &str) -> bool {
        let name = normalize_name(name);
        if name.is_empty() || self.builtin.contains_key(&name) {
            return false;
        }
        let mut learned = self.lock_learned();
        if learned.contains_key(&name) {
            return false;
        }
        learned.insert(name.clone(), template.to_string());
        if let Err(e) = self.store.save_command(&name, template) {
            tracing::warn!(command = %name, error = %e, "Failed to persist learned command");
        }
        tracing::info!(command = %name, "Learned command");
        true
    }

    /// Remove a learned command. Fails without mutation if it is absent or builtin.
    pub fn remove_command(&self, name: &str) -> bool {
        let name = normalize_name(name);
        let mut learned = self.lock_learned();
        if learned.remove(&name).is_none() {
            return false;
        }
        if let Err(e) = self.store.delete_command(&name) {
            tracing::warn!(command = %name, error = %e, "Failed to delete stored command");
        }
        tracing::info!(command = %name, "Forgot command");
        true
    }

    pub fn builtin_names(&self) -> Vec<String> {
        self.builtin.keys().cloned().collect()
    }

    pub fn learned_names(&self) -> Vec<String> {
        self.lock_learned().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct Noop;

    #[async_trait]
    impl CommandHandler for Noop {
        async fn run(&self, _ctx: CommandContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry_with(store: Arc<MemoryStore>) -> CommandRegistry {
        let mut builtin: BTreeMap<String, Arc<dyn CommandHandler>> = BTreeMap::new();
        builtin.insert("Help".to_string(), Arc::new(Noop));
        builtin.insert("ping".to_string(), Arc::new(Noop));
        CommandRegistry::new(builtin, store)
    }

    #[test]
    fn test_parse_with_trigger() {
        let line = parse_command_line("!!ping foo bar", "!!", true).unwrap();
        assert_eq!(line, CommandLine::new("ping", "foo bar"));
        assert!(parse_command_line("hello", "!!", true).is_none());
    }

    #[test]
    fn test_parse_lowercases_name() {
        let line = parse_command_line("!!PiNg", "!!", true).unwrap();
        assert_eq!(line.name, "ping");
        assert_eq!(line.args, "");
    }

    #[test]
    fn test_parse_without_required_trigger() {
        let line = parse_command_line("learn x y", "!!", false).unwrap();
        assert_eq!(line.name, "learn");
        assert_eq!(line.args, "x y");

        let line = parse_command_line("!!learn x y", "!!", false).unwrap();
        assert_eq!(line.name, "learn");
    }

    #[test]
    fn test_parse_bare_trigger() {
        assert!(parse_command_line("!!", "!!", true).is_none());
        assert!(parse_command_line("!! ping", "!!", true).is_none());
    }

    #[test]
    fn test_strip_reply_marker() {
        assert_eq!(strip_reply_marker(":12345 ping"), "ping");
        assert_eq!(strip_reply_marker(":abc ping"), ":abc ping");
        assert_eq!(strip_reply_marker(":12345"), ":12345");
        assert_eq!(strip_reply_marker("ping"), "ping");
    }

    #[test]
    fn test_sterilize_content() {
        assert_eq!(
            sterilize_content(EventType::MessageReply, "  :99 rand 10 "),
            "rand 10"
        );
        assert_eq!(
            sterilize_content(EventType::UserMentioned, "@Bot help me"),
            "help me"
        );
        assert_eq!(
            sterilize_content(EventType::MessagePosted, " :99 rand "),
            ":99 rand"
        );
    }

    #[test]
    fn test_names_are_case_insensitive_and_trimmed() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        assert!(registry.add_command("  Greet ", "hi"));
        assert!(matches!(registry.lookup("GREET"), Some(CommandBody::Template(t)) if t == "hi"));
        assert!(matches!(registry.lookup(" help"), Some(CommandBody::Native(_))));
    }

    #[test]
    fn test_add_existing_name_fails_without_mutation() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(Arc::clone(&store));

        assert!(!registry.add_command("HELP", "shadow"));
        assert!(registry.learned_names().is_empty());
        assert!(store.command("help").is_none());

        assert!(registry.add_command("greet", "hi"));
        assert!(!registry.add_command("Greet", "hello"));
        assert_eq!(store.command("greet").as_deref(), Some("hi"));
    }

    #[test]
    fn test_remove_command() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(Arc::clone(&store));

        assert!(!registry.remove_command("missing"));
        assert!(!registry.remove_command("ping"));
        assert!(registry.is_builtin("ping"));

        registry.add_command("greet", "hi");
        assert!(registry.remove_command("GREET"));
        assert!(!registry.contains("greet"));
        assert!(store.command("greet").is_none());
    }

    #[test]
    fn test_load_learned_skips_builtin_collisions() {
        let store = Arc::new(MemoryStore::with_commands([("ping", "x"), ("wave", "o/")]));
        let registry = registry_with(store);
        assert_eq!(registry.load_learned().unwrap(), 1);
        assert_eq!(registry.learned_names(), vec!["wave".to_string()]);
        assert_eq!(registry.builtin_names(), vec!["help".to_string(), "ping".to_string()]);
    }
}
