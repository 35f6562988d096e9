//! Configuration — YAML config + env var overrides + command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Suffix every bot nickname carries.
pub const NICK_SUFFIX: &str = "-bot";

pub const DEFAULT_PORT: u16 = 6667;

/// Longest accepted wait between timeout sweeps (one day).
pub const MAX_POLL_INTERVAL_SECONDS: f64 = 86_400.0;

/// Env var overrides, applied after the YAML file
const ENV_SERVER: &str = "SMALLTALK_SERVER";
const ENV_PORT: &str = "SMALLTALK_PORT";
const ENV_CHANNEL: &str = "SMALLTALK_CHANNEL";
const ENV_NICKNAME: &str = "SMALLTALK_NICKNAME";
const ENV_POLL_INTERVAL: &str = "SMALLTALK_POLL_INTERVAL";
const ENV_GIVEUP_TIMEOUT: &str = "SMALLTALK_GIVEUP_TIMEOUT";
const ENV_INITIATE_PROBABILITY: &str = "SMALLTALK_INITIATE_PROBABILITY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chat server host
    #[serde(default = "default_server")]
    pub server: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Channel to join ('#' is prepended if missing)
    #[serde(default)]
    pub channel: String,

    /// Bot nickname ('-bot' is appended if missing)
    #[serde(default)]
    pub nickname: String,

    /// Upper bound of the random wait between timeout sweeps
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_seconds: f64,

    /// How long a waiting state tolerates silence before escalating
    #[serde(default = "default_giveup_timeout")]
    pub giveup_timeout_seconds: u64,

    /// Chance per sweep of reaching out to an idle user (0 disables it)
    #[serde(default)]
    pub initiate_probability: f64,
}

fn default_server() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_max_poll_interval() -> f64 {
    5.0
}
fn default_giveup_timeout() -> u64 {
    10
}

impl Config {
    /// Load config from a YAML file with env var overrides.
    pub fn load(config_path: &Path) -> Result<Self> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], but a missing file means defaults.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        Self::load_or_default_with_env(config_path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env(
        config_path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        config.apply_env(lookup)?;
        config.normalize();
        Ok(config)
    }

    pub fn load_or_default_with_env(
        config_path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if config_path.is_file() {
            return Self::load_with_env(config_path, lookup);
        }
        let mut config = Self::default();
        config.apply_env(lookup)?;
        config.normalize();
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(content).context("Invalid YAML config")?;
        Ok(config)
    }

    /// Overlay values from the environment. `lookup` is `std::env::var`
    /// outside of tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(server) = lookup(ENV_SERVER) {
            self.set_server_address(&server)?;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PORT} is not a port: {port}"))?;
        }
        if let Some(channel) = lookup(ENV_CHANNEL) {
            self.channel = channel;
        }
        if let Some(nickname) = lookup(ENV_NICKNAME) {
            self.nickname = nickname;
        }
        if let Some(secs) = lookup(ENV_POLL_INTERVAL) {
            self.max_poll_interval_seconds = secs
                .trim()
                .parse()
                .with_context(|| format!("{ENV_POLL_INTERVAL} is not a number: {secs}"))?;
        }
        if let Some(secs) = lookup(ENV_GIVEUP_TIMEOUT) {
            self.giveup_timeout_seconds = secs
                .trim()
                .parse()
                .with_context(|| format!("{ENV_GIVEUP_TIMEOUT} is not a whole number: {secs}"))?;
        }
        if let Some(p) = lookup(ENV_INITIATE_PROBABILITY) {
            self.initiate_probability = p
                .trim()
                .parse()
                .with_context(|| format!("{ENV_INITIATE_PROBABILITY} is not a number: {p}"))?;
        }
        Ok(())
    }

    /// Accept `host`, `host:port`, `[v6]` or `[v6]:port`. Without a port
    /// the current one is kept.
    pub fn set_server_address(&mut self, address: &str) -> Result<()> {
        let address = address.trim();
        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .with_context(|| format!("Unclosed '[' in server address: {address}"))?;
            if after.is_empty() {
                (host, None)
            } else {
                let port = after
                    .strip_prefix(':')
                    .with_context(|| format!("Expected ':port' after ']': {address}"))?;
                (host, Some(port))
            }
        } else if address.matches(':').count() > 1 {
            anyhow::bail!("IPv6 server addresses must be bracketed, e.g. [::1]:6667: {address}");
        } else {
            match address.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        if host.is_empty() {
            anyhow::bail!("Server address has no host: {address}");
        }
        if let Some(port) = port {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid port in server address: {address}"))?;
        }
        self.server = host.to_string();
        Ok(())
    }

    pub fn normalize(&mut self) {
        self.channel = normalize_channel(&self.channel);
        self.nickname = normalize_nickname(&self.nickname);
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            anyhow::bail!("server must not be empty");
        }
        if self.channel.trim_start_matches('#').trim().is_empty() {
            anyhow::bail!("channel must not be empty");
        }
        if self.nickname.is_empty() || self.nickname == NICK_SUFFIX {
            anyhow::bail!("nickname must not be empty");
        }
        if !(0.0..=MAX_POLL_INTERVAL_SECONDS).contains(&self.max_poll_interval_seconds) {
            anyhow::bail!(
                "max_poll_interval_seconds must be within [0, {}], got {}",
                MAX_POLL_INTERVAL_SECONDS,
                self.max_poll_interval_seconds
            );
        }
        if self.giveup_timeout_seconds == 0 {
            anyhow::bail!("giveup_timeout_seconds must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.initiate_probability) {
            anyhow::bail!(
                "initiate_probability must be within [0, 1], got {}",
                self.initiate_probability
            );
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            channel: String::new(),
            nickname: String::new(),
            max_poll_interval_seconds: default_max_poll_interval(),
            giveup_timeout_seconds: default_giveup_timeout(),
            initiate_probability: 0.0,
        }
    }
}

/// `chat` → `#chat`; empty stays empty.
pub fn normalize_channel(channel: &str) -> String {
    let channel = channel.trim();
    if channel.is_empty() || channel.starts_with('#') {
        channel.to_string()
    } else {
        format!("#{channel}")
    }
}

/// `sam` → `sam-bot`; empty stays empty.
pub fn normalize_nickname(nickname: &str) -> String {
    let nickname = nickname.trim();
    if nickname.is_empty() || nickname.ends_with(NICK_SUFFIX) {
        nickname.to_string()
    } else {
        format!("{nickname}{NICK_SUFFIX}")
    }
}
