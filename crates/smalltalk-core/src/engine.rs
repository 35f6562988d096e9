//! The engine — registry plus random source behind one coarse lock.
//!
//! Every registry access (a message dispatch, a sweep, a command lookup)
//! takes the lock for its whole duration. Engine events are published while
//! the lock is held, so subscribers see them in commit order. Utterances are
//! sent only after the lock is released, so a slow transport never holds up
//! other users.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::events::EngineEvent;
use crate::initiator::Initiator;
use crate::registry::{ConversationRegistry, Step};
use crate::scheduler::poll_delay;
use crate::transport::Transport;
use crate::types::{Event, Visibility};

/// Everything the lock guards.
pub struct Core {
    pub registry: ConversationRegistry,
    rng: Box<dyn RngCore + Send>,
}

pub struct Engine {
    core: Mutex<Core>,
    transport: Arc<dyn Transport>,
    initiator: Initiator,
    max_poll_interval_seconds: f64,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            core: Mutex::new(Core {
                registry: ConversationRegistry::new(config.giveup_timeout_seconds),
                rng,
            }),
            transport,
            initiator: Initiator::new(config.initiate_probability),
            max_poll_interval_seconds: config.max_poll_interval_seconds,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn publish(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Random wait before the next sweep, uniform in [0, max].
    pub async fn next_delay(&self) -> Duration {
        let mut core = self.core.lock().await;
        poll_delay(self.max_poll_interval_seconds, core.rng.as_mut())
    }

    /// Start a bot-initiated conversation with `user`; `false` if one exists.
    pub async fn begin(&self, user: &str, visibility: Visibility, now: DateTime<Utc>) -> bool {
        let mut core = self.core.lock().await;
        let started = core.registry.begin(user, visibility, now);
        if started {
            self.publish(EngineEvent::Started {
                user: user.to_string(),
                visibility,
            });
        }
        started
    }

    /// Feed one conversational event to the registry and speak the result.
    pub async fn dispatch(&self, event: &Event) {
        let step = {
            let mut core = self.core.lock().await;
            let Core { registry, rng } = &mut *core;
            let step = registry.dispatch(event, rng.as_mut());
            if let Some(step) = &step {
                self.record(step);
            }
            step
        };
        match step {
            Some(step) => self.send_all(vec![step]).await,
            None => debug!("no conversation for {}, ignoring", event.user),
        }
    }

    /// One scheduler tick: maybe reach out to someone idle, then push a
    /// timeout event through every live conversation.
    pub async fn tick(&self, now: DateTime<Utc>) {
        // Presence is transport I/O, so ask before taking the lock.
        let present = if self.initiator.is_enabled() {
            self.transport.current_users().await
        } else {
            Vec::new()
        };

        let steps = {
            let mut core = self.core.lock().await;
            let Core { registry, rng } = &mut *core;
            if let Some(user) = self.initiator.maybe_initiate(registry, &present, now, rng.as_mut()) {
                self.publish(EngineEvent::Started {
                    user,
                    visibility: Visibility::Public,
                });
            }
            let steps = registry.sweep(now, rng.as_mut());
            for step in &steps {
                self.record(step);
            }
            debug!(
                "sweep touched {} conversation(s), {} live",
                steps.len(),
                registry.len()
            );
            self.publish(EngineEvent::Swept {
                conversations: steps.len(),
            });
            steps
        };

        self.send_all(steps).await;
    }

    pub async fn state_name(&self, user: &str) -> Option<&'static str> {
        self.core.lock().await.registry.state_name(user)
    }

    pub async fn forget(&self, user: &str) -> bool {
        let mut core = self.core.lock().await;
        let Some(last_state) = core.registry.state_name(user) else {
            return false;
        };
        core.registry.forget(user);
        info!("forgot conversation with {} (was {})", user, last_state);
        self.publish(EngineEvent::Removed {
            user: user.to_string(),
            last_state: last_state.to_string(),
        });
        true
    }

    /// `(user, state)` for every live conversation.
    pub async fn snapshot(&self) -> Vec<(String, &'static str)> {
        self.core.lock().await.registry.snapshot()
    }

    /// Log and broadcast one committed step. Called with the lock held.
    fn record(&self, step: &Step) {
        if step.changed() {
            info!(
                "{}: {} -> {}",
                step.user,
                step.from.unwrap_or("NEW"),
                step.to
            );
        }
        for event in EngineEvent::from_step(step) {
            self.publish(event);
        }
    }

    /// Send what the registry produced. A failed send is reported and
    /// otherwise ignored: the transition already happened.
    async fn send_all(&self, steps: Vec<Step>) {
        for step in steps {
            for utterance in &step.utterances {
                if let Err(e) = self.transport.send(utterance).await {
                    error!(
                        "failed to send to {} over {}: {}",
                        utterance.user,
                        self.transport.name(),
                        e
                    );
                    self.publish(EngineEvent::SendFailed {
                        user: utterance.user.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}
