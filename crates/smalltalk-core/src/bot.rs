//! ChatBot — the surface a transport adapter talks to.
//!
//! The adapter calls [`ChatBot::on_join_confirmed`] once it is in the
//! channel, hands every parsed message to [`ChatBot::on_inbound_event`], and
//! calls [`ChatBot::on_shutdown_requested`] when the process should exit.
//! The bot itself requests shutdown on `die`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{Command, DIE_REASON, NO_CONVERSATION};
use crate::config::Config;
use crate::engine::Engine;
use crate::events::EngineEvent;
use crate::scheduler::Scheduler;
use crate::transport::Transport;
use crate::types::Event;

pub struct ChatBot {
    engine: Arc<Engine>,
    scheduler: Mutex<Option<Scheduler>>,
    stopping: AtomicBool,
    shutdown: CancellationToken,
}

impl ChatBot {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self::with_rng(config, transport, Box::new(StdRng::from_entropy()))
    }

    /// Same as [`ChatBot::new`] with a caller-supplied random source.
    pub fn with_rng(
        config: &Config,
        transport: Arc<dyn Transport>,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            engine: Arc::new(Engine::new(config, transport, rng)),
            scheduler: Mutex::new(None),
            stopping: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    /// Cancelled once shutdown has completed and the transport was told to
    /// disconnect. Adapters stop their read loop on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn scheduler_running(&self) -> bool {
        self.scheduler
            .lock()
            .await
            .as_ref()
            .is_some_and(Scheduler::is_running)
    }

    /// Start the timeout scheduler. Repeated confirmations (a rejoin after a
    /// kick, say) do not start a second one.
    pub async fn on_join_confirmed(&self) {
        if self.stopping.load(Ordering::SeqCst) {
            debug!("join confirmed during shutdown, not starting scheduler");
            return;
        }
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_none() {
            *scheduler = Some(Scheduler::start(self.engine.clone()));
        }
    }

    /// Single entry point for message traffic.
    pub async fn on_inbound_event(&self, event: Event) {
        if !event.addressed_to_bot {
            return;
        }
        let Some(text) = event.usable_text().map(str::to_string) else {
            debug!("ignoring event from {} with no usable text", event.user);
            return;
        };

        match Command::parse(&text) {
            Some(command) => self.handle_command(&event.user, command).await,
            None => {
                let event = Event {
                    text: Some(text),
                    ..event
                };
                self.engine.dispatch(&event).await;
            }
        }
    }

    /// Stop the scheduler, then disconnect. Safe to call more than once;
    /// only the first call does anything.
    pub async fn on_shutdown_requested(&self, reason: &str) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down: {}", reason);

        let scheduler = self.scheduler.lock().await.take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        self.engine.publish(EngineEvent::ShuttingDown {
            reason: reason.to_string(),
        });

        let transport = self.engine.transport();
        if let Err(e) = transport.disconnect(reason).await {
            warn!("disconnect from {} failed: {}", transport.name(), e);
        }
        self.shutdown.cancel();
    }

    async fn handle_command(&self, user: &str, command: Command) {
        info!("{} issued {:?}", user, command);
        match command {
            Command::Die => self.on_shutdown_requested(DIE_REASON).await,
            Command::State => {
                let reply = self.engine.state_name(user).await.unwrap_or(NO_CONVERSATION);
                self.notice(user, reply).await;
            }
            Command::Forget => {
                let reply = if self.engine.forget(user).await {
                    "forgotten"
                } else {
                    "nothing to forget"
                };
                self.notice(user, reply).await;
            }
            Command::Stats => {
                for line in self.stats_lines().await {
                    self.notice(user, &line).await;
                }
            }
            Command::Unknown(text) => {
                self.notice(user, &format!("Not understood: {text}")).await;
            }
        }
    }

    async fn stats_lines(&self) -> Vec<String> {
        let snapshot = self.engine.snapshot().await;
        let mut by_state: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        for (user, state) in &snapshot {
            by_state.entry(*state).or_default().push(user.clone());
        }

        let mut lines = vec![format!("{} live conversation(s)", snapshot.len())];
        lines.extend(
            by_state
                .into_iter()
                .map(|(state, users)| format!("{}: {}", state, users.join(", "))),
        );

        let mut present = self.engine.transport().current_users().await;
        present.sort();
        lines.push(if present.is_empty() {
            "present: nobody".to_string()
        } else {
            format!("present: {}", present.join(", "))
        });
        lines
    }

    async fn notice(&self, user: &str, text: &str) {
        let transport = self.engine.transport();
        if let Err(e) = transport.notice(user, text).await {
            warn!("notice to {} over {} failed: {}", user, transport.name(), e);
        }
    }
}
