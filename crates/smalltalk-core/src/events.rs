//! EngineEvent enum — broadcast from the engine to whoever is watching
//! (the binary's logger, tests) via tokio::broadcast.

use serde::{Deserialize, Serialize};

use crate::registry::Step;
use crate::types::Visibility;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A conversation entry was created.
    Started { user: String, visibility: Visibility },

    /// A conversation moved to a different state.
    Transition {
        user: String,
        from: String,
        to: String,
    },

    /// A conversation entry was deleted (terminal state or `*forget`).
    Removed { user: String, last_state: String },

    /// One scheduler pass finished.
    Swept { conversations: usize },

    /// An utterance could not be handed to the transport.
    SendFailed { user: String, error: String },

    ShuttingDown { reason: String },
}

impl EngineEvent {
    /// Events describing one registry step, in order.
    pub fn from_step(step: &Step) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        match step.from {
            None => {
                events.push(EngineEvent::Started {
                    user: step.user.clone(),
                    visibility: step.visibility,
                });
                events.push(EngineEvent::Transition {
                    user: step.user.clone(),
                    from: "NEW".to_string(),
                    to: step.to.to_string(),
                });
            }
            Some(from) if from != step.to => events.push(EngineEvent::Transition {
                user: step.user.clone(),
                from: from.to_string(),
                to: step.to.to_string(),
            }),
            Some(_) => {}
        }
        if step.removed {
            events.push(EngineEvent::Removed {
                user: step.user.clone(),
                last_state: step.to.to_string(),
            });
        }
        events
    }

    /// `{"event": "...", "data": {...}}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
