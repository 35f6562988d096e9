//! Spontaneous outreach — occasionally start a conversation with someone idle.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use tracing::info;

use crate::registry::ConversationRegistry;
use crate::types::Visibility;

pub struct Initiator {
    probability: f64,
}

impl Initiator {
    /// `probability` is clamped to [0, 1]; NaN disables initiation.
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { probability }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn is_enabled(&self) -> bool {
        self.probability > 0.0
    }

    /// With the configured probability, pick one present user who is not
    /// already conversing and `begin` a public conversation with them.
    pub fn maybe_initiate(
        &self,
        registry: &mut ConversationRegistry,
        present: &[String],
        now: DateTime<Utc>,
        rng: &mut dyn RngCore,
    ) -> Option<String> {
        if !self.is_enabled() || rng.gen::<f64>() >= self.probability {
            return None;
        }

        let idle: Vec<&String> = present.iter().filter(|u| !registry.contains(u)).collect();
        let user = idle.choose(rng)?.to_string();
        if registry.begin(&user, Visibility::Public, now) {
            info!("reaching out to {}", user);
            Some(user)
        } else {
            None
        }
    }
}
