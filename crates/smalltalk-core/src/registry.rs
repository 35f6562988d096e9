//! Conversation registry — at most one live conversation per user.
//!
//! Entries are created by [`ConversationRegistry::begin`] (bot-initiated)
//! or by the first bot-addressed message from an unknown user, and are
//! removed by the very call whose transition lands in a terminal phase.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::{debug, info};

use crate::states::{ConversationState, Track};
use crate::types::{Event, Utterance, Visibility};

#[derive(Debug, Clone)]
pub struct Conversation {
    pub user: String,
    pub visibility: Visibility,
    pub state: ConversationState,
}

/// What a single `dispatch` did to one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub user: String,
    pub visibility: Visibility,
    /// `None` when the entry was created by this dispatch.
    pub from: Option<&'static str>,
    pub to: &'static str,
    pub utterances: Vec<Utterance>,
    pub removed: bool,
}

impl Step {
    pub fn changed(&self) -> bool {
        self.from != Some(self.to)
    }
}

pub struct ConversationRegistry {
    conversations: HashMap<String, Conversation>,
    giveup_timeout_seconds: u64,
}

impl ConversationRegistry {
    pub fn new(giveup_timeout_seconds: u64) -> Self {
        Self {
            conversations: HashMap::new(),
            giveup_timeout_seconds,
        }
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn contains(&self, user: &str) -> bool {
        self.conversations.contains_key(user)
    }

    pub fn get(&self, user: &str) -> Option<&Conversation> {
        self.conversations.get(user)
    }

    pub fn state_name(&self, user: &str) -> Option<&'static str> {
        self.conversations.get(user).map(|c| c.state.name())
    }

    /// `(user, state name)` pairs, sorted by user.
    pub fn snapshot(&self) -> Vec<(String, &'static str)> {
        let mut rows: Vec<(String, &'static str)> = self
            .conversations
            .values()
            .map(|c| (c.user.clone(), c.state.name()))
            .collect();
        rows.sort();
        rows
    }

    /// Start a bot-initiated conversation. Returns `false` and leaves the
    /// existing entry untouched if `user` is already conversing.
    pub fn begin(&mut self, user: &str, visibility: Visibility, now: DateTime<Utc>) -> bool {
        if self.conversations.contains_key(user) {
            debug!("{} already has a conversation, not starting another", user);
            return false;
        }
        self.conversations.insert(
            user.to_string(),
            Conversation {
                user: user.to_string(),
                visibility,
                state: ConversationState::start(Track::Outreach, now, self.giveup_timeout_seconds),
            },
        );
        info!("started conversation with {} ({})", user, visibility);
        true
    }

    /// Drop a conversation without saying anything. Returns whether one existed.
    pub fn forget(&mut self, user: &str) -> bool {
        self.conversations.remove(user).is_some()
    }

    /// Feed one event to the user's conversation. Creates a track-2 entry for
    /// an unknown user who addressed the bot; otherwise unknown users are
    /// ignored and `None` is returned.
    pub fn dispatch(&mut self, event: &Event, rng: &mut dyn RngCore) -> Option<Step> {
        let created = if self.conversations.contains_key(&event.user) {
            false
        } else if event.text.is_some() && event.addressed_to_bot {
            self.conversations.insert(
                event.user.clone(),
                Conversation {
                    user: event.user.clone(),
                    visibility: event.visibility,
                    state: ConversationState::start(
                        Track::Addressed,
                        event.timestamp,
                        self.giveup_timeout_seconds,
                    ),
                },
            );
            true
        } else {
            return None;
        };

        let conversation = self.conversations.get_mut(&event.user)?;
        let from = conversation.state.name();
        let visibility = conversation.visibility;

        let Some(mut next) = conversation.state.transition(event) else {
            self.conversations.remove(&event.user);
            return Some(Step {
                user: event.user.clone(),
                visibility,
                from: Some(from),
                to: from,
                utterances: Vec::new(),
                removed: true,
            });
        };

        let lines = next.run(rng);
        let to = next.name();
        let terminal = next.is_terminal();
        conversation.state = next;

        let utterances = lines
            .into_iter()
            .map(|text| Utterance {
                user: conversation.user.clone(),
                visibility,
                text,
            })
            .collect();

        if terminal {
            self.conversations.remove(&event.user);
        }

        Some(Step {
            user: event.user.clone(),
            visibility,
            from: if created { None } else { Some(from) },
            to,
            utterances,
            removed: terminal,
        })
    }

    /// Deliver a timeout tick stamped `now` to every live conversation.
    /// Users are visited in sorted order.
    pub fn sweep(&mut self, now: DateTime<Utc>, rng: &mut dyn RngCore) -> Vec<Step> {
        let mut targets: Vec<(String, Visibility)> = self
            .conversations
            .values()
            .map(|c| (c.user.clone(), c.visibility))
            .collect();
        targets.sort();

        targets
            .into_iter()
            .filter_map(|(user, visibility)| self.dispatch(&Event::tick(user, visibility, now), rng))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replies;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    fn say(user: &str, secs: i64, text: &str) -> Event {
        Event::message(user, Visibility::Public, at(secs), text, true)
    }

    #[test]
    fn test_begin_is_idempotent() {
        let mut registry = ConversationRegistry::new(10);
        assert!(registry.begin("ann", Visibility::Public, t0()));
        let before = registry.get("ann").unwrap().state.clone();

        assert!(!registry.begin("ann", Visibility::Private, at(5)));
        let after = registry.get("ann").unwrap();
        assert_eq!(after.state, before);
        assert_eq!(after.visibility, Visibility::Public);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_user_tick_or_unaddressed_is_ignored() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut registry = ConversationRegistry::new(10);
        assert!(registry
            .dispatch(&Event::tick("ann", Visibility::Public, t0()), &mut rng)
            .is_none());

        let unaddressed = Event::message("ann", Visibility::Public, t0(), "hi", false);
        assert!(registry.dispatch(&unaddressed, &mut rng).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_addressed_greeting_creates_track_two() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut registry = ConversationRegistry::new(10);

        let step = registry.dispatch(&say("bob", 0, "hi"), &mut rng).unwrap();
        assert_eq!(step.from, None);
        assert_eq!(step.to, "2_OUTREACH_REPLY");
        assert!(!step.removed);
        assert_eq!(step.utterances.len(), 1);
        assert!(replies::GREETING_REPLIES.contains(&step.utterances[0].text.as_str()));
        assert_eq!(step.utterances[0].user, "bob");
        assert_eq!(registry.state_name("bob"), Some("2_OUTREACH_REPLY"));
    }

    #[test]
    fn test_addressed_non_greeting_leaves_nothing_behind() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut registry = ConversationRegistry::new(10);
        let step = registry
            .dispatch(&say("bob", 0, "what's the time"), &mut rng)
            .unwrap();
        assert_eq!(step.to, "2_START");
        assert!(step.removed);
        assert!(step.utterances.is_empty());
        assert!(!registry.contains("bob"));
    }

    #[test]
    fn test_sweep_escalates_and_removes_on_give_up() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut registry = ConversationRegistry::new(10);
        registry.begin("ann", Visibility::Public, t0());

        let steps = registry.sweep(at(1), &mut rng);
        assert_eq!(steps[0].to, "1_INITIAL_OUTREACH");
        assert_eq!(steps[0].utterances.len(), 1);

        let steps = registry.sweep(at(5), &mut rng);
        assert_eq!(steps[0].to, "1_INITIAL_OUTREACH");
        assert!(steps[0].utterances.is_empty());
        assert!(!steps[0].changed());

        let steps = registry.sweep(at(11), &mut rng);
        assert_eq!(steps[0].to, "1_SECONDARY_OUTREACH");

        let steps = registry.sweep(at(21), &mut rng);
        assert_eq!(steps[0].to, "1_GIVEUP_FRUSTRATED");
        assert!(steps[0].removed);
        assert!(replies::FRUSTRATED.contains(&steps[0].utterances[0].text.as_str()));
        assert!(!registry.contains("ann"));

        assert!(registry.sweep(at(30), &mut rng).is_empty());
    }

    #[test]
    fn test_full_exchange_ends_and_is_removed() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut registry = ConversationRegistry::new(10);
        registry.begin("ann", Visibility::Private, t0());
        registry.sweep(at(1), &mut rng);

        let step = registry.dispatch(&say("ann", 2, "oh hi"), &mut rng).unwrap();
        assert_eq!(step.to, "1_INQUIRY");
        assert_eq!(step.utterances[0].visibility, Visibility::Private);

        let step = registry
            .dispatch(&say("ann", 3, "pretty good"), &mut rng)
            .unwrap();
        assert_eq!(step.to, "1_INQUIRY_REPLY");
        assert!(registry.contains("ann"));

        let steps = registry.sweep(at(4), &mut rng);
        assert_eq!(steps[0].to, "END");
        assert!(steps[0].removed);
        assert!(replies::FAREWELLS.contains(&steps[0].utterances[0].text.as_str()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_keeps_each_conversation_visibility() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut registry = ConversationRegistry::new(10);
        registry.begin("ann", Visibility::Public, t0());
        registry.begin("cat", Visibility::Private, t0());

        let steps = registry.sweep(at(1), &mut rng);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].user, "ann");
        assert_eq!(steps[0].utterances[0].visibility, Visibility::Public);
        assert_eq!(steps[1].user, "cat");
        assert_eq!(steps[1].utterances[0].visibility, Visibility::Private);
    }

    #[test]
    fn test_forget_and_snapshot() {
        let mut registry = ConversationRegistry::new(10);
        registry.begin("zed", Visibility::Public, t0());
        registry.begin("amy", Visibility::Public, t0());
        assert_eq!(
            registry.snapshot(),
            vec![
                ("amy".to_string(), "1_START"),
                ("zed".to_string(), "1_START")
            ]
        );
        assert!(registry.forget("zed"));
        assert!(!registry.forget("zed"));
        assert_eq!(registry.len(), 1);
    }
}
