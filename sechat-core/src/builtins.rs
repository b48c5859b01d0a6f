// ABOUTME: Builtin command handlers shipped with every bot
// ABOUTME: Fixed handlers plus template builtins loaded from a properties file and word of the day

use crate::commands::{
    normalize_name, CommandContext, CommandHandler, TemplateCommand, INVALID_INPUT_REPLY,
};
use crate::error::ChatResult;
use crate::traits::WordSource;
use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const MAX_DICE: u32 = 100;
pub const MAX_SIDES: u32 = 1000;
/// Largest n whose fibonacci number fits in a u128
pub const MAX_FIBONACCI: u32 = 186;

const EVAL_UNAVAILABLE_REPLY: &str = "Evaluation is unavailable.";
const WOTD_UNAVAILABLE_REPLY: &str = "Could not fetch the word of the day.";

/// File of template builtins, looked up in the data dir
pub const BASIC_COMMANDS_FILE: &str = "basic_commands.properties";

/// The builtin command set keyed by name
pub fn standard_builtins() -> BTreeMap<String, Arc<dyn CommandHandler>> {
    let mut builtins: BTreeMap<String, Arc<dyn CommandHandler>> = BTreeMap::new();
    let help: Arc<dyn CommandHandler> = Arc::new(Help);
    builtins.insert("help".into(), Arc::clone(&help));
    builtins.insert("list".into(), Arc::clone(&help));
    builtins.insert("listcommands".into(), help);
    builtins.insert("learn".into(), Arc::new(Learn));
    builtins.insert("unlearn".into(), Arc::new(Unlearn));
    builtins.insert("joinroom".into(), Arc::new(JoinRoom));
    builtins.insert("leaveroom".into(), Arc::new(LeaveRoom));
    builtins.insert("room".into(), Arc::new(RoomLink));
    builtins.insert("render".into(), Arc::new(Render));
    builtins.insert("rolldice".into(), Arc::new(RollDice));
    builtins.insert("rand".into(), Arc::new(RandomNumber));
    builtins.insert("fibonacci".into(), Arc::new(Fibonacci));
    builtins.insert("eval".into(), Arc::new(Eval));
    builtins
}

/// Register `wotd` over a word source
pub fn add_word_of_the_day(
    builtins: &mut BTreeMap<String, Arc<dyn CommandHandler>>,
    source: Arc<dyn WordSource>,
) {
    builtins.insert("wotd".into(), Arc::new(WordOfTheDay { source }));
}

/// Register template builtins. Names already taken by a builtin are skipped.
pub fn add_basic_commands(
    builtins: &mut BTreeMap<String, Arc<dyn CommandHandler>>,
    entries: &[(String, String)],
) -> usize {
    let mut added = 0;
    for (name, template) in entries {
        let name = normalize_name(name);
        if name.is_empty() {
            continue;
        }
        if builtins.contains_key(&name) {
            tracing::warn!(command = %name, "Basic command shadows a builtin, skipping");
            continue;
        }
        builtins.insert(name, Arc::new(TemplateCommand::new(template.clone())));
        added += 1;
    }
    added
}

// =============================================================================
// Basic commands file
// =============================================================================

/// Parse properties-style `name[,alias ...] = template` lines.
///
/// `#` and `!` start comments, `=` or `:` ends the key, and a trailing backslash
/// continues the value on the next line. Each key may list several names
/// separated by commas or spaces; all of them share the template.
pub fn parse_basic_commands(text: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let mut logical = line.trim_start().to_string();
        if logical.is_empty() || logical.starts_with('#') || logical.starts_with('!') {
            continue;
        }
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let Some(split) = logical.find(|c: char| c == '=' || c == ':') else {
            tracing::warn!(line = %logical, "Basic command line has no template");
            continue;
        };
        let (keys, template) = logical.split_at(split);
        let template = template[1..].trim_start();
        if template.is_empty() {
            continue;
        }
        for name in keys.split(|c: char| c == ',' || c.is_whitespace()) {
            let name = normalize_name(name);
            if !name.is_empty() {
                entries.push((name, template.to_string()));
            }
        }
    }
    entries
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Read a basic commands file. A missing file yields no commands.
pub fn load_basic_commands(path: &Path) -> ChatResult<Vec<(String, String)>> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let entries = parse_basic_commands(&text);
            tracing::info!(path = %path.display(), count = entries.len(), "Loaded basic commands");
            Ok(entries)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "No basic commands file, continuing");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Argument parsing
// =============================================================================

/// Room ids separated by whitespace and/or commas
pub fn parse_room_ids(args: &str) -> Option<Vec<u64>> {
    let ids: Option<Vec<u64>> = args
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect();
    ids.filter(|ids| !ids.is_empty())
}

/// `""` (1d6), `"NdM"`, `"N"` (N six-sided dice) or `"N M"`
pub fn parse_dice(args: &str) -> Option<(u32, u32)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (count, sides) = match parts.as_slice() {
        [] => (1, 6),
        [dice] => match dice.to_ascii_lowercase().split_once('d') {
            Some((n, m)) => {
                let count = if n.is_empty() { 1 } else { n.parse().ok()? };
                (count, m.parse().ok()?)
            }
            None => (dice.parse().ok()?, 6),
        },
        [count, sides] => (count.parse().ok()?, sides.parse().ok()?),
        _ => return None,
    };
    if count == 0 || count > MAX_DICE || sides < 2 || sides > MAX_SIDES {
        return None;
    }
    Some((count, sides))
}

/// `""` (0..=100), `"max"` (0..=max) or `"min max"`
pub fn parse_rand_bounds(args: &str) -> Option<(i64, i64)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (low, high) = match parts.as_slice() {
        [] => (0, 100),
        [max] => (0, max.parse().ok()?),
        [min, max] => (min.parse().ok()?, max.parse().ok()?),
        _ => return None,
    };
    Some((low.min(high), low.max(high)))
}

/// Iterative fibonacci with F(0) = 0; None on overflow
pub fn fibonacci(n: u32) -> Option<u128> {
    fibonacci_until(n, || false)
}

/// Fibonacci that checks `stop` every step; None on overflow or when stopped
pub fn fibonacci_until(n: u32, stop: impl Fn() -> bool) -> Option<u128> {
    if n == 0 {
        return Some(0);
    }
    let (mut a, mut b) = (0u128, 1u128);
    for _ in 1..n {
        if stop() {
            return None;
        }
        let next = a.checked_add(b)?;
        a = b;
        b = next;
    }
    Some(b)
}

fn roll(count: u32, sides: u32) -> Vec<u32> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(1..=sides)).collect()
}

fn format_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Handlers
// =============================================================================

struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let builtin = ctx.registry.builtin_names().join(", ");
        let learned = ctx.registry.learned_names();
        let text = if learned.is_empty() {
            format!("Commands: {}", builtin)
        } else {
            format!("Commands: {}. Learned: {}", builtin, learned.join(", "))
        };
        ctx.reply(&text).await?;
        Ok(())
    }
}

struct Learn;

#[async_trait]
impl CommandHandler for Learn {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let Some((name, template)) = ctx.args.trim_start().split_once(' ') else {
            ctx.reply("Usage: learn <name> <template>").await?;
            return Ok(());
        };
        let name = normalize_name(name);
        if name.is_empty() || template.trim().is_empty() {
            ctx.reply("Usage: learn <name> <template>").await?;
            return Ok(());
        }

        let text = if ctx.registry.add_command(&name, template) {
            format!("Learned {}.", name)
        } else {
            format!("Command {} already exists.", name)
        };
        ctx.reply(&text).await?;
        Ok(())
    }
}

struct Unlearn;

#[async_trait]
impl CommandHandler for Unlearn {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let name = normalize_name(&ctx.args);
        let text = if ctx.registry.is_builtin(&name) {
            format!("{} is a builtin command.", name)
        } else if ctx.registry.remove_command(&name) {
            format!("Forgot {}.", name)
        } else {
            format!("No learned command named {}.", name)
        };
        ctx.reply(&text).await?;
        Ok(())
    }
}

struct JoinRoom;

#[async_trait]
impl CommandHandler for JoinRoom {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let Some(ids) = parse_room_ids(&ctx.args) else {
            ctx.reply("Usage: joinroom <room id> ...").await?;
            return Ok(());
        };
        let site = ctx.event.site;
        let Some(result) = ctx.cancellable(ctx.chat.join_rooms(site, &ids)).await else {
            return Ok(());
        };
        let text = match result {
            Ok(true) => format!("Joined {}.", format_ids(&ids)),
            Ok(false) => format!("Could not join every room in {}.", format_ids(&ids)),
            Err(e) => {
                tracing::warn!(site = %site, error = %e, "joinroom failed");
                format!("Could not join {}.", format_ids(&ids))
            }
        };
        ctx.reply(&text).await?;
        Ok(())
    }
}

struct LeaveRoom;

#[async_trait]
impl CommandHandler for LeaveRoom {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let ids = match parse_room_ids(&ctx.args) {
            Some(ids) => ids,
            None if ctx.args.trim().is_empty() => vec![ctx.event.room_id],
            None => {
                ctx.reply("Usage: leaveroom [room id] ...").await?;
                return Ok(());
            }
        };
        let site = ctx.event.site;
        // Say goodbye before leaving the room we were asked from
        if ids.contains(&ctx.event.room_id) {
            ctx.reply(&format!("Leaving {}.", format_ids(&ids))).await?;
        }
        let Some(result) = ctx.cancellable(ctx.chat.leave_rooms(site, &ids)).await else {
            return Ok(());
        };
        match result {
            Ok(true) => {
                if !ids.contains(&ctx.event.room_id) {
                    ctx.reply(&format!("Left {}.", format_ids(&ids))).await?;
                }
            }
            Ok(false) => {
                ctx.reply(&format!("Could not leave every room in {}.", format_ids(&ids)))
                    .await?;
            }
            Err(e) => {
                tracing::warn!(site = %site, error = %e, "leaveroom failed");
                ctx.reply(&format!("Could not leave {}.", format_ids(&ids))).await?;
            }
        }
        Ok(())
    }
}

struct RoomLink;

#[async_trait]
impl CommandHandler for RoomLink {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let arg = ctx.args.trim();
        let room_id = if arg.is_empty() {
            ctx.event.room_id
        } else {
            match arg.parse::<u64>() {
                Ok(id) => id,
                Err(_) => {
                    ctx.reply(INVALID_INPUT_REPLY).await?;
                    return Ok(());
                }
            }
        };
        ctx.say(&ctx.event.site.room_url(room_id)).await?;
        Ok(())
    }
}

/// `render <template> <args...>`: run the first token as a template over the rest
struct Render;

#[async_trait]
impl CommandHandler for Render {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let input = ctx.args.trim_start();
        let (template, args) = input.split_once(' ').unwrap_or((input, ""));
        if template.is_empty() {
            ctx.reply(INVALID_INPUT_REPLY).await?;
            return Ok(());
        }
        match ctx.render(template, args) {
            Ok(text) => ctx.reply(&text).await?,
            Err(e) => {
                tracing::debug!(error = %e, "render failed");
                ctx.reply(INVALID_INPUT_REPLY).await?;
            }
        }
        Ok(())
    }
}

struct RollDice;

#[async_trait]
impl CommandHandler for RollDice {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let Some((count, sides)) = parse_dice(&ctx.args) else {
            ctx.reply(INVALID_INPUT_REPLY).await?;
            return Ok(());
        };
        let rolls = roll(count, sides);
        let total: u64 = rolls.iter().map(|r| u64::from(*r)).sum();
        let text = if rolls.len() == 1 {
            format!("Rolled {}d{}: {}", count, sides, total)
        } else {
            let faces = rolls
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!("Rolled {}d{}: {} (total {})", count, sides, faces, total)
        };
        ctx.reply(&text).await?;
        Ok(())
    }
}

struct RandomNumber;

#[async_trait]
impl CommandHandler for RandomNumber {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let Some((low, high)) = parse_rand_bounds(&ctx.args) else {
            ctx.reply(INVALID_INPUT_REPLY).await?;
            return Ok(());
        };
        let value = rand::thread_rng().gen_range(low..=high);
        ctx.reply(&value.to_string()).await?;
        Ok(())
    }
}

struct Fibonacci;

#[async_trait]
impl CommandHandler for Fibonacci {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let arg = ctx.args.trim();
        let arg = if arg.is_empty() { "0" } else { arg };
        let text = match arg.parse::<u32>() {
            Ok(n) => match fibonacci_until(n, || ctx.is_cancelled()) {
                Some(value) => value.to_string(),
                None if ctx.is_cancelled() => return Ok(()),
                None => format!("Too large, the limit is {}.", MAX_FIBONACCI),
            },
            Err(_) => INVALID_INPUT_REPLY.to_string(),
        };
        ctx.reply(&text).await?;
        Ok(())
    }
}

struct Eval;

#[async_trait]
impl CommandHandler for Eval {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let Some(evaluator) = ctx.evaluator.clone() else {
            ctx.reply(EVAL_UNAVAILABLE_REPLY).await?;
            return Ok(());
        };
        let input = ctx.args.trim();
        if input.is_empty() {
            ctx.reply(INVALID_INPUT_REPLY).await?;
            return Ok(());
        }
        let Some(result) = ctx.cancellable(evaluator.evaluate(input)).await else {
            return Ok(());
        };
        match result {
            Ok(text) => ctx.reply(&text).await?,
            Err(e) => {
                tracing::debug!(error = %e, "eval failed");
                ctx.reply(INVALID_INPUT_REPLY).await?;
            }
        }
        Ok(())
    }
}

struct WordOfTheDay {
    source: Arc<dyn WordSource>,
}

#[async_trait]
impl CommandHandler for WordOfTheDay {
    async fn run(&self, ctx: CommandContext) -> anyhow::Result<()> {
        let Some(result) = ctx.cancellable(self.source.word_of_the_day()).await else {
            return Ok(());
        };
        match result {
            Ok(text) => ctx.reply(&text).await?,
            Err(e) => {
                tracing::warn!(error = %e, "wotd failed");
                ctx.reply(WOTD_UNAVAILABLE_REPLY).await?;
            }
        }
        Ok(())
    }
}
