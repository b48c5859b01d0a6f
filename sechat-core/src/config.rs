// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones
use crate::builtins::BASIC_COMMANDS_FILE;
use crate::dispatcher::DispatcherConfig;
use crate::paths;
use crate::site::Site;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WOTD_FEED_URL: &str = "https://www.merriam-webster.com/wotd/feed/rss2";

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Sites to connect to, with the rooms to join on each
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

// Custom Debug impl to redact the password
impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_trigger")]
    pub trigger: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    #[serde(default = "default_wave_cooldown_secs")]
    pub wave_cooldown_secs: u64,
    /// RSS feed the `wotd` command reads; empty disables the command
    #[serde(default = "default_wotd_feed_url")]
    pub wotd_feed_url: String,
}

fn default_trigger() -> String {
    crate::dispatcher::DEFAULT_TRIGGER.to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_cancel_grace_secs() -> u64 {
    2
}

fn default_wave_cooldown_secs() -> u64 {
    300 // 5 minutes
}

fn default_wotd_feed_url() -> String {
    DEFAULT_WOTD_FEED_URL.to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trigger: default_trigger(),
            poll_interval_secs: default_poll_interval_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            wave_cooldown_secs: default_wave_cooldown_secs(),
            wotd_feed_url: default_wotd_feed_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Extra attempts for a POST whose connection could not be established
    #[serde(default = "default_post_retries")]
    pub post_retries: u32,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_post_retries() -> u32 {
    1
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            post_retries: default_post_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Template builtins; defaults to `basic_commands.properties` in the data dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_commands_file: Option<String>,
}

fn default_data_dir() -> String {
    paths::data_dir().to_string_lossy().to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            basic_commands_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub site: Site,
    #[serde(default)]
    pub rooms: Vec<u64>,
}

impl Config {
    /// Find config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // Check SECHAT_CONFIG_PATH env var first (useful for testing and deployment)
        if let Ok(env_path) = std::env::var("SECHAT_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "SECHAT_CONFIG_PATH does not exist");
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from config.toml with environment variable overrides
    /// Searches: SECHAT_CONFIG_PATH env var, ./config.toml, then ~/.config/sechat/config.toml
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit path when given, otherwise search the standard locations
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |_| Ok(()))
    }

    /// Like [`Config::load_from`], running `overrides` after the environment
    /// overrides and before validation (command-line flags go here)
    pub fn load_with<F>(path: Option<&Path>, overrides: F) -> Result<Self>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        let config_path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::find_config_file(),
        };

        let mut config = if let Some(config_path) = config_path {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config {
                account: AccountConfig {
                    email: String::new(),
                    password: None,
                },
                bot: BotConfig::default(),
                http: HttpConfig::default(),
                storage: StorageConfig::default(),
                sites: Vec::new(),
            }
        };

        config.apply_env_overrides()?;
        overrides(&mut config)?;
        config.storage.data_dir = paths::expand_tilde(&config.storage.data_dir);
        if let Some(file) = config.storage.basic_commands_file.as_mut() {
            *file = paths::expand_tilde(file);
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("SECHAT_EMAIL") {
            self.account.email = val;
        }
        if let Ok(val) = std::env::var("SECHAT_PASSWORD") {
            self.account.password = Some(val);
            // Clear from environment to prevent exposure via /proc or ps
            std::env::remove_var("SECHAT_PASSWORD");
        }
        if let Ok(val) = std::env::var("SECHAT_SITES") {
            self.set_sites(&val)?;
        }
        if let Ok(val) = std::env::var("SECHAT_TRIGGER") {
            self.bot.trigger = val;
        }
        if let Ok(val) = std::env::var("SECHAT_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("SECHAT_POLL_INTERVAL_SECS") {
            self.bot.poll_interval_secs = val.parse().with_context(|| {
                format!("SECHAT_POLL_INTERVAL_SECS must be a valid number, got: {}", val)
            })?;
        }
        Ok(())
    }

    /// Replace the site list from a comma-separated string, keeping rooms
    /// already configured for sites that stay in the list
    pub fn set_sites(&mut self, list: &str) -> Result<()> {
        let mut sites = Vec::new();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let site: Site = name
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("Invalid site in list: {}", list))?;
            if sites.iter().any(|s: &SiteConfig| s.site == site) {
                continue;
            }
            let rooms = self
                .sites
                .iter()
                .find(|s| s.site == site)
                .map(|s| s.rooms.clone())
                .unwrap_or_default();
            sites.push(SiteConfig { site, rooms });
        }
        self.sites = sites;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.account.email.trim().is_empty() {
            anyhow::bail!("account.email is required (set in config.toml or SECHAT_EMAIL env var)");
        }
        if self.account.password.as_deref().map_or(true, |p| p.is_empty()) {
            anyhow::bail!(
                "account.password is required (set in config.toml or SECHAT_PASSWORD env var)"
            );
        }
        if self.sites.is_empty() {
            anyhow::bail!("At least one site is required (set [[sites]] or SECHAT_SITES)");
        }
        if self.bot.trigger.chars().any(char::is_whitespace) {
            anyhow::bail!("bot.trigger must not contain whitespace: {:?}", self.bot.trigger);
        }
        if self.bot.poll_interval_secs == 0 {
            anyhow::bail!("bot.poll_interval_secs must be greater than zero");
        }
        if self.bot.command_timeout_secs == 0 {
            anyhow::bail!("bot.command_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Take the password out of the config; it is only needed for login
    pub fn take_password(&mut self) -> Option<String> {
        self.account.password.take()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.bot.poll_interval_secs)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    pub fn basic_commands_path(&self) -> PathBuf {
        match &self.storage.basic_commands_file {
            Some(file) => PathBuf::from(file),
            None => self.data_dir().join(BASIC_COMMANDS_FILE),
        }
    }

    /// Feed for `wotd`, or None when disabled
    pub fn wotd_feed_url(&self) -> Option<&str> {
        Some(self.bot.wotd_feed_url.trim()).filter(|url| !url.is_empty())
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            trigger: self.bot.trigger.clone(),
            command_timeout: Duration::from_secs(self.bot.command_timeout_secs),
            cancel_grace: Duration::from_secs(self.bot.cancel_grace_secs),
            wave_cooldown: Duration::from_secs(self.bot.wave_cooldown_secs),
        }
    }

    /// Add a room to a site's join list, adding the site if needed
    pub fn add_room(&mut self, site: Site, room_id: u64) {
        match self.sites.iter_mut().find(|s| s.site == site) {
            Some(entry) => {
                if !entry.rooms.contains(&room_id) {
                    entry.rooms.push(room_id);
                }
            }
            None => self.sites.push(SiteConfig {
                site,
                rooms: vec![room_id],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: [&str; 7] = [
        "SECHAT_CONFIG_PATH",
        "SECHAT_EMAIL",
        "SECHAT_PASSWORD",
        "SECHAT_SITES",
        "SECHAT_TRIGGER",
        "SECHAT_DATA_DIR",
        "SECHAT_POLL_INTERVAL_SECS",
    ];

    fn clear_env() {
        for key in ENV_VARS {
            std::env::remove_var(key);
        }
    }

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    const FULL_CONFIG: &str = r#"
        [account]
        email = "bot@example.com"
        password = "hunter2"

        [bot]
        trigger = ">>"
        poll_interval_secs = 5

        [storage]
        data_dir = "/tmp/sechat-test"

        [[sites]]
        site = "stackoverflow"
        rooms = [17, 42]

        [[sites]]
        site = "stackexchange"
    "#;

    #[test]
    fn test_account_debug_redacts_password() {
        let account = AccountConfig {
            email: "bot@example.com".to_string(),
            password: Some("hunter2".to_string()),
        };
        let debug_str = format!("{:?}", account);
        assert!(!debug_str.contains("hunter2"), "password should be redacted");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("bot@example.com"));
    }

    #[test]
    fn test_bot_config_defaults() {
        let bot: BotConfig = toml::from_str("").unwrap();
        assert_eq!(bot.trigger, "!!");
        assert_eq!(bot.poll_interval_secs, 10);
        assert_eq!(bot.command_timeout_secs, 30);
        assert_eq!(bot.wave_cooldown_secs, 300);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let tmpdir = tempfile::tempdir().unwrap();
        let path = write_config(tmpdir.path(), FULL_CONFIG);

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.account.email, "bot@example.com");
        assert_eq!(config.bot.trigger, ">>");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.http.post_retries, 1);
        assert_eq!(
            config.sites,
            vec![
                SiteConfig {
                    site: Site::StackOverflow,
                    rooms: vec![17, 42]
                },
                SiteConfig {
                    site: Site::StackExchange,
                    rooms: vec![]
                },
            ]
        );
        assert_eq!(config.dispatcher_config().trigger, ">>");
        assert_eq!(config.http.connect_timeout_secs, 10);
        assert_eq!(config.wotd_feed_url(), Some(DEFAULT_WOTD_FEED_URL));
        assert_eq!(
            config.basic_commands_path(),
            PathBuf::from("/tmp/sechat-test").join(BASIC_COMMANDS_FILE)
        );
    }

    #[test]
    #[serial]
    fn test_basic_commands_file_and_disabled_wotd() {
        clear_env();
        let tmpdir = tempfile::tempdir().unwrap();
        let body = FULL_CONFIG
            .replace(
                "poll_interval_secs = 5",
                "poll_interval_secs = 5\n        wotd_feed_url = \"  \"",
            )
            .replace(
                "data_dir = \"/tmp/sechat-test\"",
                "data_dir = \"/tmp/sechat-test\"\n        basic_commands_file = \"/etc/sechat/basics.properties\"",
            );
        let path = write_config(tmpdir.path(), &body);

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.wotd_feed_url(), None);
        assert_eq!(
            config.basic_commands_path(),
            PathBuf::from("/etc/sechat/basics.properties")
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        let tmpdir = tempfile::tempdir().unwrap();
        let path = write_config(tmpdir.path(), FULL_CONFIG);

        std::env::set_var("SECHAT_CONFIG_PATH", &path);
        std::env::set_var("SECHAT_EMAIL", "other@example.com");
        std::env::set_var("SECHAT_PASSWORD", "from-env");
        std::env::set_var("SECHAT_SITES", "so, mse");
        std::env::set_var("SECHAT_TRIGGER", "!");
        std::env::set_var("SECHAT_POLL_INTERVAL_SECS", "3");

        let mut config = Config::load().unwrap();
        assert_eq!(config.account.email, "other@example.com");
        assert_eq!(config.take_password().as_deref(), Some("from-env"));
        assert!(config.account.password.is_none());
        assert!(
            std::env::var("SECHAT_PASSWORD").is_err(),
            "password should be cleared from the environment"
        );
        assert_eq!(config.bot.trigger, "!");
        assert_eq!(config.bot.poll_interval_secs, 3);
        // Rooms survive for sites that stay in the list
        assert_eq!(config.sites[0].site, Site::StackOverflow);
        assert_eq!(config.sites[0].rooms, vec![17, 42]);
        assert_eq!(config.sites[1].site, Site::MetaStackExchange);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_poll_interval_env() {
        clear_env();
        let tmpdir = tempfile::tempdir().unwrap();
        let path = write_config(tmpdir.path(), FULL_CONFIG);
        std::env::set_var("SECHAT_POLL_INTERVAL_SECS", "soon");

        let err = Config::load_from(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("SECHAT_POLL_INTERVAL_SECS"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_validation_errors() {
        clear_env();
        let tmpdir = tempfile::tempdir().unwrap();

        let no_password = write_config(
            tmpdir.path(),
            r#"
                [account]
                email = "bot@example.com"

                [[sites]]
                site = "stackoverflow"
            "#,
        );
        let err = Config::load_from(Some(&no_password)).unwrap_err();
        assert!(err.to_string().contains("account.password"));

        let no_sites = write_config(
            tmpdir.path(),
            r#"
                [account]
                email = "bot@example.com"
                password = "pw"
            "#,
        );
        let err = Config::load_from(Some(&no_sites)).unwrap_err();
        assert!(err.to_string().contains("site"));

        std::env::set_var("SECHAT_SITES", "reddit");
        let err = Config::load_from(Some(&no_sites)).unwrap_err();
        assert!(format!("{:#}", err).contains("reddit"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides_run_before_validation() {
        clear_env();
        let tmpdir = tempfile::tempdir().unwrap();
        let path = write_config(
            tmpdir.path(),
            r#"
                [account]
                email = "bot@example.com"
                password = "pw"
            "#,
        );

        let config = Config::load_with(Some(&path), |config| {
            config.add_room(Site::StackExchange, 11);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            config.sites,
            vec![SiteConfig {
                site: Site::StackExchange,
                rooms: vec![11]
            }]
        );

        let err = Config::load_with(Some(&path), |_| anyhow::bail!("bad flag")).unwrap_err();
        assert!(err.to_string().contains("bad flag"));
    }

    #[test]
    fn test_add_room() {
        let mut config: Config = toml::from_str(FULL_CONFIG).unwrap();
        config.add_room(Site::StackOverflow, 17);
        config.add_room(Site::StackOverflow, 99);
        config.add_room(Site::MetaStackExchange, 1);
        assert_eq!(config.sites[0].rooms, vec![17, 42, 99]);
        assert_eq!(config.sites[2].site, Site::MetaStackExchange);
    }
}
