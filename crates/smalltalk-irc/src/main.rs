//! smalltalk-irc — runs the small-talk bot in one IRC channel.

mod irc;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use smalltalk_core::bot::ChatBot;
use smalltalk_core::config::Config;

use irc::IrcTransport;

#[derive(Debug, Parser)]
#[command(name = "smalltalk-irc", version, about = "A small-talk bot for IRC")]
struct Args {
    /// Server host and optional port, delimited by ':' (IPv6 as [addr]:port)
    #[arg(value_name = "server[:port]")]
    server: Option<String>,

    /// Channel to join ('#' is prepended if omitted)
    #[arg(value_name = "[#]channel")]
    channel: Option<String>,

    /// Nickname in the chat ('-bot' is appended if omitted)
    #[arg(value_name = "nickname[-bot]")]
    nickname: Option<String>,

    /// YAML config file (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Upper bound of the random wait between timeout sweeps, in seconds
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Seconds of silence before a conversation escalates
    #[arg(long)]
    giveup_timeout: Option<u64>,

    /// Chance per sweep of greeting an idle user
    #[arg(long)]
    initiate_probability: Option<f64>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}

/// Config file, then env vars, then the command line. Positionals left
/// out fall back to `SMALLTALK_SERVER` and friends or the file.
fn build_config(args: &Args) -> Result<Config> {
    build_config_with_env(args, |key| std::env::var(key).ok())
}

fn build_config_with_env(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path, lookup)?,
        None => Config::load_or_default_with_env(Path::new("config.yaml"), lookup)?,
    };

    if let Some(server) = &args.server {
        config.set_server_address(server)?;
    }
    if let Some(channel) = &args.channel {
        config.channel = channel.clone();
    }
    if let Some(nickname) = &args.nickname {
        config.nickname = nickname.clone();
    }
    if let Some(secs) = args.poll_interval {
        config.max_poll_interval_seconds = secs;
    }
    if let Some(secs) = args.giveup_timeout {
        config.giveup_timeout_seconds = secs;
    }
    if let Some(p) = args.initiate_probability {
        config.initiate_probability = p;
    }

    config.normalize();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_file.as_deref())?;
    let config = build_config(&args)?;

    println!("server:   {}", config.server);
    println!("port:     {}", config.port);
    println!("channel:  {}", config.channel);
    println!("nickname: {}", config.nickname);

    let (transport, reader) = IrcTransport::connect(&config).await?;
    let bot = Arc::new(ChatBot::new(&config, transport.clone()));

    let mut events = bot.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!("engine event: {}", event.to_json()),
                Err(RecvError::Lagged(n)) => debug!("engine event log lagged by {}", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let interrupted = bot.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            interrupted.on_shutdown_requested("interrupted").await;
        }
    });

    info!("connected, waiting to join {}", config.channel);
    let result = transport.listen(reader, &bot).await;
    bot.on_shutdown_requested("connection lost").await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml(content: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "{content}").unwrap();
        tmp
    }

    fn args(config: &NamedTempFile, rest: &[&str]) -> Args {
        let path = config.path().to_str().unwrap();
        let mut argv = vec!["smalltalk-irc", "--config", path];
        argv.extend_from_slice(rest);
        Args::try_parse_from(argv).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_positional_arguments_are_normalized() {
        let file = yaml("");
        let args = args(&file, &["irc.example.org:6697", "cafe", "sam"]);
        let config = build_config_with_env(&args, no_env).unwrap();
        assert_eq!(config.server, "irc.example.org");
        assert_eq!(config.port, 6697);
        assert_eq!(config.channel, "#cafe");
        assert_eq!(config.nickname, "sam-bot");
    }

    #[test]
    fn test_portless_server_keeps_file_port() {
        let file = yaml("port: 6697");
        let args = args(&file, &["irc.example.org", "#chat", "sam"]);
        let config = build_config_with_env(&args, no_env).unwrap();
        assert_eq!(config.server, "irc.example.org");
        assert_eq!(config.port, 6697);
    }

    #[test]
    fn test_env_fills_in_missing_positionals() {
        let file = yaml("server: from-file\nchannel: filechan\nnickname: filenick");
        let env: HashMap<&str, &str> = HashMap::from([
            ("SMALLTALK_SERVER", "chat.local"),
            ("SMALLTALK_PORT", "7000"),
            ("SMALLTALK_CHANNEL", "lobby"),
            ("SMALLTALK_NICKNAME", "eliza"),
        ]);
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let config = build_config_with_env(&args(&file, &[]), lookup).unwrap();
        assert_eq!(config.server, "chat.local");
        assert_eq!(config.port, 7000);
        assert_eq!(config.channel, "#lobby");
        assert_eq!(config.nickname, "eliza-bot");

        // Flags still win over env.
        let config =
            build_config_with_env(&args(&file, &["irc.example.org", "cafe"]), lookup).unwrap();
        assert_eq!(config.server, "irc.example.org");
        assert_eq!(config.port, 7000);
        assert_eq!(config.channel, "#cafe");
        assert_eq!(config.nickname, "eliza-bot");
    }

    #[test]
    fn test_flags_override_config() {
        let file = yaml("giveup_timeout_seconds: 12\ninitiate_probability: 0.5");
        let args = args(
            &file,
            &[
                "localhost",
                "#chat",
                "sam-bot",
                "--poll-interval",
                "2.5",
                "--giveup-timeout",
                "30",
                "--initiate-probability",
                "0.1",
            ],
        );
        let config = build_config_with_env(&args, no_env).unwrap();
        assert_eq!(config.port, 6667);
        assert_eq!(config.max_poll_interval_seconds, 2.5);
        assert_eq!(config.giveup_timeout_seconds, 30);
        assert_eq!(config.initiate_probability, 0.1);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let file = yaml("");
        let too_likely = args(&file, &["localhost", "chat", "sam", "--initiate-probability", "2"]);
        assert!(build_config_with_env(&too_likely, no_env).is_err());

        let no_channel = args(&file, &["localhost"]);
        assert!(build_config_with_env(&no_channel, no_env).is_err());

        let huge_poll = args(&file, &["localhost", "chat", "sam", "--poll-interval", "1e20"]);
        assert!(build_config_with_env(&huge_poll, no_env).is_err());
    }
}
