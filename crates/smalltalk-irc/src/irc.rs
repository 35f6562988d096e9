//! Plain-TCP IRC client implementing the core's `Transport`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use smalltalk_core::bot::ChatBot;
use smalltalk_core::config::Config;
use smalltalk_core::transport::{Transport, TransportError};
use smalltalk_core::types::{Event, Utterance, Visibility};

/// No data for this long means the connection is dead. Servers PING every
/// few minutes at most.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Channel user modes that prefix names in a `353` reply.
const MODE_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

/// A parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// `[:<prefix>] <command> [<params>] [:<trailing>]`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }

        let (prefix, rest) = match line.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, rest) = stripped.split_once(' ')?;
                (Some(prefix.to_string()), rest)
            }
            None => (None, line),
        };

        let (middle, trailing) = match rest.split_once(" :") {
            Some((middle, trailing)) => (middle, Some(trailing)),
            None => (rest, None),
        };

        let mut parts = middle.split_whitespace();
        let command = parts.next()?.to_uppercase();
        let mut params: Vec<String> = parts.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// `nick!user@host` → `nick`
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split('!').next().unwrap_or(prefix);
        (!nick.is_empty()).then_some(nick)
    }

    fn param(&self, index: usize) -> &str {
        self.params.get(index).map_or("", String::as_str)
    }
}

fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

/// Turn a `PRIVMSG` into an inbound event. The text is split at its first
/// `:` into an addressee and a body; private messages are always addressed
/// to the bot.
pub fn privmsg_event(msg: &IrcMessage, own_nick: &str, now: DateTime<Utc>) -> Option<Event> {
    if msg.command != "PRIVMSG" {
        return None;
    }
    let sender = msg.nick()?;
    let target = msg.param(0);
    let raw = msg.param(1).trim();

    let visibility = if is_channel(target) {
        Visibility::Public
    } else {
        Visibility::Private
    };

    let (addressee, body) = match raw.split_once(':') {
        Some((addressee, body)) => (Some(addressee.trim()), body.trim()),
        None => (None, raw),
    };
    let to_us = addressee.is_some_and(|a| a.eq_ignore_ascii_case(own_nick));

    let text = match (visibility, to_us) {
        (_, true) => body,
        (Visibility::Public, false) if addressee.is_some() => body,
        _ => raw,
    };

    Some(Event::message(
        sender,
        visibility,
        now,
        text,
        to_us || visibility == Visibility::Private,
    ))
}

/// Who is in the channel, and under which nick we are.
#[derive(Debug, Default)]
pub struct Presence {
    pub nick: String,
    pub users: BTreeSet<String>,
}

impl Presence {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            users: BTreeSet::new(),
        }
    }

    /// Apply a membership change. Returns `true` when the line is the
    /// server confirming our own join to `channel`.
    pub fn apply(&mut self, msg: &IrcMessage, channel: &str) -> bool {
        let in_channel = |name: &str| name.eq_ignore_ascii_case(channel);
        match msg.command.as_str() {
            "353" if in_channel(msg.param(2)) => {
                for name in msg.param(3).split_whitespace() {
                    let name = name.trim_start_matches(MODE_PREFIXES);
                    if !name.is_empty() {
                        self.users.insert(name.to_string());
                    }
                }
                false
            }
            "JOIN" if in_channel(msg.param(0)) => match msg.nick() {
                Some(nick) if nick.eq_ignore_ascii_case(&self.nick) => true,
                Some(nick) => {
                    self.users.insert(nick.to_string());
                    false
                }
                None => false,
            },
            "PART" if in_channel(msg.param(0)) => {
                if let Some(nick) = msg.nick() {
                    self.users.remove(nick);
                }
                false
            }
            "KICK" if in_channel(msg.param(0)) => {
                self.users.remove(msg.param(1));
                false
            }
            "QUIT" => {
                if let Some(nick) = msg.nick() {
                    self.users.remove(nick);
                }
                false
            }
            "NICK" => {
                let Some(old) = msg.nick() else {
                    return false;
                };
                let new = msg.param(0).to_string();
                if old.eq_ignore_ascii_case(&self.nick) {
                    self.nick = new;
                } else if self.users.remove(old) {
                    self.users.insert(new);
                }
                false
            }
            _ => false,
        }
    }

    /// Present users other than ourselves.
    pub fn others(&self) -> Vec<String> {
        self.users
            .iter()
            .filter(|u| !u.eq_ignore_ascii_case(&self.nick))
            .cloned()
            .collect()
    }
}

/// Collapse line breaks so a reply can never inject a second IRC command.
fn one_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct IrcTransport {
    channel: String,
    presence: Mutex<Presence>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: AtomicBool,
}

impl IrcTransport {
    /// Open the TCP connection and send `NICK`/`USER`. The returned reader
    /// goes to [`IrcTransport::listen`].
    pub async fn connect(config: &Config) -> Result<(Arc<Self>, BufReader<OwnedReadHalf>)> {
        info!(
            "connecting to {} port {} as {}",
            config.server, config.port, config.nickname
        );
        let stream = TcpStream::connect((config.server.as_str(), config.port))
            .await
            .with_context(|| format!("Failed to connect to {} port {}", config.server, config.port))?;
        let (reader, writer) = stream.into_split();

        let transport = Arc::new(Self {
            channel: config.channel.clone(),
            presence: Mutex::new(Presence::new(&config.nickname)),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        });
        transport
            .send_raw(&format!("NICK {}", config.nickname))
            .await?;
        transport
            .send_raw(&format!("USER {} 0 * :{}", config.nickname, config.nickname))
            .await?;

        Ok((transport, BufReader::new(reader)))
    }

    async fn send_raw(&self, line: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(format!("{line}\r\n").as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read lines until the server hangs up or the bot shuts down.
    pub async fn listen(&self, mut reader: BufReader<OwnedReadHalf>, bot: &ChatBot) -> Result<()> {
        let shutdown = bot.shutdown_token();
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                read = tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line)) => read,
            };
            let n = read
                .map_err(|_| anyhow::anyhow!("IRC read timed out (no data for {READ_TIMEOUT:?})"))?
                .context("IRC read failed")?;
            if n == 0 {
                if shutdown.is_cancelled() || self.closed.load(Ordering::SeqCst) {
                    break;
                }
                anyhow::bail!("IRC connection closed by server");
            }

            let Some(msg) = IrcMessage::parse(&line) else {
                continue;
            };
            self.handle(msg, bot).await?;
        }

        info!("IRC read loop finished");
        Ok(())
    }

    async fn handle(&self, msg: IrcMessage, bot: &ChatBot) -> Result<()> {
        match msg.command.as_str() {
            "PING" => {
                self.send_raw(&format!("PONG :{}", msg.param(0))).await?;
            }
            "001" => {
                info!("registered, joining {}", self.channel);
                self.send_raw(&format!("JOIN {}", self.channel)).await?;
            }
            "433" => {
                let mut presence = self.presence.lock().await;
                let alt = format!("{}_", presence.nick);
                warn!("nickname {} is in use, trying {}", presence.nick, alt);
                presence.nick = alt.clone();
                drop(presence);
                self.send_raw(&format!("NICK {alt}")).await?;
            }
            "PRIVMSG" => {
                let own_nick = self.presence.lock().await.nick.clone();
                if let Some(event) = privmsg_event(&msg, &own_nick, Utc::now()) {
                    info!(
                        "{}-[{}] <{}> {}",
                        event.visibility.to_string().to_uppercase(),
                        event.timestamp.with_timezone(&Local).format("%H:%M"),
                        event.user,
                        msg.param(1).trim()
                    );
                    bot.on_inbound_event(event).await;
                }
            }
            _ => {
                let joined = self.presence.lock().await.apply(&msg, &self.channel);
                if joined {
                    info!("joined {}", self.channel);
                    bot.on_join_confirmed().await;
                } else {
                    debug!("irc: {} {:?}", msg.command, msg.params);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for IrcTransport {
    fn name(&self) -> &str {
        "irc"
    }

    async fn current_users(&self) -> Vec<String> {
        self.presence.lock().await.others()
    }

    async fn send(&self, utterance: &Utterance) -> Result<(), TransportError> {
        let text = one_line(&utterance.text);
        let line = match utterance.visibility {
            Visibility::Public => {
                format!("PRIVMSG {} :{}: {}", self.channel, utterance.user, text)
            }
            Visibility::Private => format!("PRIVMSG {} :{}", utterance.user, text),
        };
        self.send_raw(&line).await
    }

    async fn notice(&self, user: &str, text: &str) -> Result<(), TransportError> {
        self.send_raw(&format!("NOTICE {} :{}", user, one_line(text)))
            .await
    }

    async fn disconnect(&self, reason: &str) -> Result<(), TransportError> {
        self.send_raw(&format!("QUIT :{}", one_line(reason))).await?;
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}
