// ABOUTME: Routes chat events to commands with a bounded, cooperative execution deadline
// ABOUTME: Handles the per-type event policy, the wave easter egg and unknown-command fallback

use crate::commands::{
    parse_command_line, sterilize_content, CommandBody, CommandContext, CommandHandler,
    CommandRegistry, TemplateCommand,
};
use crate::error::ChatError;
use crate::events::{Event, EventType};
use crate::metrics;
use crate::template::TemplateRenderer;
use crate::traits::{ChatActions, Evaluator};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TRIGGER: &str = "!!";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);
pub const DEFAULT_WAVE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

const WAVE_RIGHT: &str = "o/";
const WAVE_LEFT: &str = "\\o";
const WAVE_EMOJI: &str = "\u{1F44B}";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Prefix that marks a posted/edited message as a command
    pub trigger: String,
    /// Deadline for a single command invocation
    pub command_timeout: Duration,
    /// How long a timed-out command gets to observe cancellation before it is detached
    pub cancel_grace: Duration,
    pub wave_cooldown: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            trigger: DEFAULT_TRIGGER.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            wave_cooldown: DEFAULT_WAVE_COOLDOWN,
        }
    }
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed,
    Failed(String),
    /// Deadline passed. `stopped` is false when the task ignored cancellation and was detached.
    TimedOut { stopped: bool },
}

/// Handle to a supervised command invocation
#[derive(Debug)]
pub struct InvocationHandle {
    command: String,
    watchdog: JoinHandle<InvocationOutcome>,
}

impl InvocationHandle {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the invocation to finish, time out, or be detached
    pub async fn outcome(self) -> InvocationOutcome {
        match self.watchdog.await {
            Ok(outcome) => outcome,
            Err(e) => InvocationOutcome::Failed(format!("watchdog failed: {}", e)),
        }
    }
}

/// Result of handling one event
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Nothing to do for this event
    Ignored,
    /// Notification acknowledged
    Acknowledged,
    /// Event type is only logged
    Logged,
    /// Answered a wave
    Waved,
    /// Message did not carry the trigger
    NoTrigger,
    /// Trigger (or an addressed message) with no command name after it
    EmptyCommand,
    /// Name resolved to no command
    Unknown(String),
    /// Reply/mention fell back to the evaluator
    Evaluated(InvocationHandle),
    /// Command started
    Spawned(InvocationHandle),
}

impl DispatchOutcome {
    /// True when the event caused something to run or be said in the room
    pub fn dispatched(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Waved | DispatchOutcome::Evaluated(_) | DispatchOutcome::Spawned(_)
        )
    }

    pub fn into_handle(self) -> Option<InvocationHandle> {
        match self {
            DispatchOutcome::Evaluated(h) | DispatchOutcome::Spawned(h) => Some(h),
            _ => None,
        }
    }
}

/// Mirrored wave for a wave token, if `content` is one
pub fn wave_reply(content: &str) -> Option<&'static str> {
    match content {
        WAVE_RIGHT => Some(WAVE_LEFT),
        WAVE_LEFT => Some(WAVE_RIGHT),
        _ if is_wave_emoji(content) => Some(WAVE_EMOJI),
        _ => None,
    }
}

fn is_wave_emoji(content: &str) -> bool {
    let Some(rest) = content.strip_prefix(WAVE_EMOJI) else {
        return false;
    };
    let mut chars = rest.chars();
    match chars.next() {
        None => true,
        Some(modifier) => {
            ('\u{1F3FB}'..='\u{1F3FF}').contains(&modifier) && chars.next().is_none()
        }
    }
}

/// Evaluates reply/mention text that named no command
struct EvaluateFallback {
    evaluator: Arc<dyn Evaluator>,
    input: String,
}

#[async_trait]
impl CommandHandler for EvaluateFallback {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let Some(result) = ctx.cancellable(self.evaluator.evaluate(&self.input)).await else {
            return Ok(());
        };
        match result {
            Ok(text) if !text.trim().is_empty() => ctx.reply(&text).await?,
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Evaluation failed"),
        }
        Ok(())
    }
}

pub struct CommandDispatcher {
    config: DispatcherConfig,
    registry: Arc<CommandRegistry>,
    chat: Arc<dyn ChatActions>,
    renderer: Arc<dyn TemplateRenderer>,
    evaluator: Option<Arc<dyn Evaluator>>,
    wave_cooldown_until: Mutex<Option<Instant>>,
    timeouts: Arc<AtomicU64>,
    dispatched: AtomicU64,
}

impl CommandDispatcher {
    pub fn new(
        config: DispatcherConfig,
        registry: Arc<CommandRegistry>,
        chat: Arc<dyn ChatActions>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            config,
            registry,
            chat,
            renderer,
            evaluator: None,
            wave_cooldown_until: Mutex::new(None),
            timeouts: Arc::new(AtomicU64::new(0)),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Number of invocations that hit their deadline
    pub fn timed_out_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Number of events that ran a command, an evaluation or a wave
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn add_command(&self, name: &str, template: &str) -> bool {
        self.registry.add_command(name, template)
    }

    pub fn remove_command(&self, name: &str) -> bool {
        self.registry.remove_command(name)
    }

    /// Handle one event from the poll loop
    pub async fn handle(&self, event: Event) -> DispatchOutcome {
        let kind = event.event_type.code();
        metrics::record_event_seen(kind);
        let outcome = self.classify(event).await;
        if outcome.dispatched() {
            self.dispatched.fetch_add(1, Ordering::Relaxed);
            metrics::record_event_dispatched(kind);
        }
        outcome
    }

    async fn classify(&self, event: Event) -> DispatchOutcome {
        if !event.event_type.is_message() {
            return self.handle_non_message(&event).await;
        }

        let Some(raw) = event.content.as_deref() else {
            return DispatchOutcome::Ignored;
        };
        let content = sterilize_content(event.event_type, raw);
        if content.is_empty() {
            return DispatchOutcome::Ignored;
        }

        tracing::debug!(
            site = %event.site,
            room_id = event.room_id,
            message_id = event.message_id,
            user = %event.user_name,
            event_type = ?event.event_type,
            content = %content,
            "Message event"
        );

        if let Some(reply) = wave_reply(&content) {
            if self.claim_wave() {
                if let Err(e) = self.chat.send_message(event.site, event.room_id, reply).await {
                    tracing::warn!(site = %event.site, room_id = event.room_id, error = %e, "Failed to wave back");
                }
                return DispatchOutcome::Waved;
            }
        }

        let addresses_bot = event.event_type.addresses_bot();
        let Some(line) = parse_command_line(&content, &self.config.trigger, !addresses_bot) else {
            if !addresses_bot && !content.starts_with(self.config.trigger.as_str()) {
                return DispatchOutcome::NoTrigger;
            }
            tracing::debug!(site = %event.site, room_id = event.room_id, "Empty command");
            return DispatchOutcome::EmptyCommand;
        };

        match self.registry.lookup(&line.name) {
            Some(body) => {
                let handler: Arc<dyn CommandHandler> = match body {
                    CommandBody::Native(handler) => handler,
                    CommandBody::Template(template) => Arc::new(TemplateCommand::new(template)),
                };
                DispatchOutcome::Spawned(self.spawn_invocation(line.name, handler, event, line.args))
            }
            None => {
                let err = ChatError::UnknownCommand(line.name.clone());
                tracing::info!(site = %event.site, room_id = event.room_id, error = %err, "Invalid command");
                match (&self.evaluator, addresses_bot) {
                    (Some(evaluator), true) => {
                        let fallback = Arc::new(EvaluateFallback {
                            evaluator: Arc::clone(evaluator),
                            input: content.clone(),
                        });
                        DispatchOutcome::Evaluated(self.spawn_invocation(
                            "eval".to_string(),
                            fallback,
                            event,
                            content,
                        ))
                    }
                    _ => DispatchOutcome::Unknown(line.name),
                }
            }
        }
    }

    async fn handle_non_message(&self, event: &Event) -> DispatchOutcome {
        match event.event_type {
            EventType::GlobalNotification | EventType::UserNotification => {
                tracing::info!(site = %event.site, message_id = event.message_id, event_type = ?event.event_type, "Acknowledging notification");
                if let Err(e) = self.chat.acknowledge(event.site, event.message_id).await {
                    tracing::warn!(site = %event.site, error = %e, "Failed to acknowledge notification");
                }
                DispatchOutcome::Acknowledged
            }
            EventType::DebugMessage
            | EventType::FileAdded
            | EventType::ModeratorFlag
            | EventType::UserSettingsChanged
            | EventType::Invitation
            | EventType::TimeBreak
            | EventType::UserSuspended
            | EventType::UserMerged
            | EventType::UserNameOrAvatarChanged => {
                tracing::info!(
                    site = %event.site,
                    room_id = event.room_id,
                    event_id = event.id,
                    event_type = ?event.event_type,
                    user = %event.user_name,
                    "Handling event"
                );
                DispatchOutcome::Logged
            }
            _ => DispatchOutcome::Ignored,
        }
    }

    /// Take the wave slot if no wave was answered within the cool-down window
    fn claim_wave(&self) -> bool {
        let now = Instant::now();
        let mut until = self
            .wave_cooldown_until
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if matches!(*until, Some(t) if now < t) {
            return false;
        }
        *until = Some(now + self.config.wave_cooldown);
        true
    }

    fn spawn_invocation(
        &self,
        name: String,
        handler: Arc<dyn CommandHandler>,
        event: Event,
        args: String,
    ) -> InvocationHandle {
        let cancel = CancellationToken::new();
        let ctx = CommandContext {
            name: name.clone(),
            event,
            args,
            cancel: cancel.clone(),
            chat: Arc::clone(&self.chat),
            registry: Arc::clone(&self.registry),
            renderer: Arc::clone(&self.renderer),
            evaluator: self.evaluator.clone(),
        };

        metrics::record_command(&name);
        tracing::info!(command = %name, args = %ctx.args, "Running command");

        let task = tokio::spawn(async move { handler.run(ctx).await });
        let watchdog = tokio::spawn(supervise(
            name.clone(),
            task,
            cancel,
            self.config.command_timeout,
            self.config.cancel_grace,
            Arc::clone(&self.timeouts),
        ));

        InvocationHandle {
            command: name,
            watchdog,
        }
    }
}

/// Watch one command task: wait for it, and on deadline cancel it cooperatively.
///
/// A task that ignores cancellation past the grace period is detached, never aborted.
async fn supervise(
    name: String,
    mut task: JoinHandle<anyhow::Result<()>>,
    cancel: CancellationToken,
    timeout: Duration,
    grace: Duration,
    timeouts: Arc<AtomicU64>,
) -> InvocationOutcome {
    let started = Instant::now();

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => {
            tracing::debug!(command = %name, "Command completed");
            InvocationOutcome::Completed
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(command = %name, error = %e, "Command failed");
            InvocationOutcome::Failed(e.to_string())
        }
        Ok(Err(e)) => {
            tracing::error!(command = %name, error = %e, "Command task panicked");
            metrics::record_error("command_panic");
            InvocationOutcome::Failed(e.to_string())
        }
        Err(_) => {
            timeouts.fetch_add(1, Ordering::Relaxed);
            metrics::record_command_timeout(&name);
            let err = ChatError::CommandTimeout {
                name: name.clone(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            tracing::warn!(command = %name, error = %err, "Command timed out");
            cancel.cancel();

            match tokio::time::timeout(grace, &mut task).await {
                Ok(_) => {
                    tracing::debug!(command = %name, "Command stopped after cancellation");
                    InvocationOutcome::TimedOut { stopped: true }
                }
                Err(_) => {
                    tracing::warn!(command = %name, "Command ignored cancellation, detaching");
                    drop(task);
                    InvocationOutcome::TimedOut { stopped: false }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_tokens() {
        assert_eq!(wave_reply("o/"), Some("\\o"));
        assert_eq!(wave_reply("\\o"), Some("o/"));
        assert_eq!(wave_reply("\u{1F44B}"), Some("\u{1F44B}"));
        assert_eq!(wave_reply("\u{1F44B}\u{1F3FD}"), Some("\u{1F44B}"));
        assert_eq!(wave_reply("\u{1F44B}\u{1F3FD}\u{1F3FD}"), None);
        assert_eq!(wave_reply("\u{1F44B}x"), None);
        assert_eq!(wave_reply("o/ hi"), None);
    }

    #[test]
    fn test_outcome_dispatched() {
        assert!(DispatchOutcome::Waved.dispatched());
        assert!(!DispatchOutcome::Unknown("x".into()).dispatched());
        assert!(!DispatchOutcome::NoTrigger.dispatched());
        assert!(DispatchOutcome::Ignored.into_handle().is_none());
    }

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.trigger, "!!");
        assert_eq!(config.command_timeout, Duration::from_millis(30_000));
        assert_eq!(config.wave_cooldown, Duration::from_secs(300));
    }
}
