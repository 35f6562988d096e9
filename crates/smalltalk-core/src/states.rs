//! Conversation state machine — one `Phase` per step of a small-talk exchange.
//!
//! Two tracks share most of the shape:
//!
//! ```text
//! Track 1 (bot reaches out):
//!   Start → InitialOutreach ─timeout→ SecondaryOutreach ─timeout→ GiveUpFrustrated → End
//!                │ message                 │ message
//!                └──────────→ Inquiry ←────┘
//!                               │ answer            ─timeout→ GiveUpFrustrated
//!                               └→ InquiryReply → End
//!
//! Track 2 (user greets the bot):
//!   Start ─greeting→ OutreachReply ─inquiry→ InquiryReply → End
//!                         │ other message
//!                         └→ Inquiry ─answer→ InquiryReply → End
//! ```
//!
//! `transition` is a pure function of the state and the event. `run` speaks
//! on entry and records that it did, so a state kept alive across timeout
//! ticks never repeats itself.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::replies;
use crate::types::Event;

// ── Track ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// The bot started the conversation.
    Outreach,
    /// The user addressed the bot first.
    Addressed,
}

// ── Phase ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Start {
        track: Track,
    },
    InitialOutreach,
    SecondaryOutreach,
    Inquiry {
        track: Track,
        /// The last message did not answer the question.
        waiting: bool,
        /// The bot already nudged about that message.
        responded: bool,
    },
    InquiryReply {
        track: Track,
    },
    OutreachReply,
    GiveUpFrustrated {
        track: Track,
    },
    End,
}

impl Phase {
    /// Display name reported by `*state`.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Start {
                track: Track::Outreach,
            } => "1_START",
            Phase::Start {
                track: Track::Addressed,
            } => "2_START",
            Phase::InitialOutreach => "1_INITIAL_OUTREACH",
            Phase::SecondaryOutreach => "1_SECONDARY_OUTREACH",
            Phase::Inquiry {
                track: Track::Outreach,
                ..
            } => "1_INQUIRY",
            Phase::Inquiry {
                track: Track::Addressed,
                ..
            } => "2_INQUIRY",
            Phase::InquiryReply {
                track: Track::Outreach,
            } => "1_INQUIRY_REPLY",
            Phase::InquiryReply {
                track: Track::Addressed,
            } => "2_INQUIRY_REPLY",
            Phase::OutreachReply => "2_OUTREACH_REPLY",
            Phase::GiveUpFrustrated {
                track: Track::Outreach,
            } => "1_GIVEUP_FRUSTRATED",
            Phase::GiveUpFrustrated {
                track: Track::Addressed,
            } => "2_GIVEUP_FRUSTRATED",
            Phase::End => "END",
        }
    }

    pub fn track(&self) -> Option<Track> {
        match self {
            Phase::Start { track }
            | Phase::Inquiry { track, .. }
            | Phase::InquiryReply { track }
            | Phase::GiveUpFrustrated { track } => Some(*track),
            Phase::InitialOutreach | Phase::SecondaryOutreach => Some(Track::Outreach),
            Phase::OutreachReply => Some(Track::Addressed),
            Phase::End => None,
        }
    }

    /// The registry drops a conversation as soon as it lands in one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Start { .. } | Phase::GiveUpFrustrated { .. } | Phase::End
        )
    }

    /// Phases that escalate when a tick arrives after the giveup timeout.
    pub fn is_timeout_sensitive(&self) -> bool {
        matches!(
            self,
            Phase::InitialOutreach
                | Phase::SecondaryOutreach
                | Phase::Inquiry { .. }
                | Phase::OutreachReply
        )
    }

    /// Escalation steps left before giving up. Timeout escalation always
    /// lowers this.
    pub fn patience(&self) -> u8 {
        match self {
            Phase::Start { .. } | Phase::InitialOutreach => 2,
            Phase::SecondaryOutreach
            | Phase::Inquiry { .. }
            | Phase::InquiryReply { .. }
            | Phase::OutreachReply => 1,
            Phase::GiveUpFrustrated { .. } | Phase::End => 0,
        }
    }

    fn catalog(&self) -> &'static [&'static str] {
        match self {
            Phase::Start { .. } => &[],
            Phase::InitialOutreach => replies::OUTREACH_GREETINGS,
            Phase::SecondaryOutreach => replies::OUTREACH_REMINDERS,
            Phase::Inquiry { .. } => replies::INQUIRIES,
            Phase::InquiryReply {
                track: Track::Outreach,
            } => replies::INQUIRY_ACKNOWLEDGMENTS,
            Phase::InquiryReply {
                track: Track::Addressed,
            } => replies::INQUIRY_ANSWERS,
            Phase::OutreachReply => replies::GREETING_REPLIES,
            Phase::GiveUpFrustrated { .. } => replies::FRUSTRATED,
            Phase::End => replies::FAREWELLS,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── ConversationState ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub phase: Phase,
    /// When this instance was entered; timeouts count from here.
    pub entered_at: DateTime<Utc>,
    pub timeout_seconds: u64,
    #[serde(default)]
    spoken: bool,
}

impl ConversationState {
    pub fn start(track: Track, now: DateTime<Utc>, timeout_seconds: u64) -> Self {
        Self::new(Phase::Start { track }, now, timeout_seconds)
    }

    pub fn new(phase: Phase, entered_at: DateTime<Utc>, timeout_seconds: u64) -> Self {
        Self {
            phase,
            entered_at,
            timeout_seconds,
            spoken: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.phase.name()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn has_spoken(&self) -> bool {
        self.spoken
    }

    pub fn elapsed(&self, at: DateTime<Utc>) -> Duration {
        at - self.entered_at
    }

    fn timed_out(&self, at: DateTime<Utc>) -> bool {
        let limit_ms = i64::try_from(self.timeout_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.elapsed(at).num_milliseconds() >= limit_ms
    }

    /// Fresh instance of `phase`, bootstrapped from the triggering event.
    fn advance(&self, phase: Phase, event: &Event) -> Self {
        Self::new(phase, event.timestamp, self.timeout_seconds)
    }

    /// Ticks only: move to `phase` once the timeout has passed, otherwise
    /// stay exactly as we are.
    fn escalate(&self, phase: Phase, event: &Event) -> Self {
        if self.timed_out(event.timestamp) {
            self.advance(phase, event)
        } else {
            self.clone()
        }
    }

    /// Compute the next state. `None` means the conversation is over and
    /// the entry should be removed.
    ///
    /// A tick (no text) only ever takes the timeout path; a message never
    /// does, however late it arrives.
    pub fn transition(&self, event: &Event) -> Option<ConversationState> {
        let next = match (self.phase, event.text.as_deref()) {
            (Phase::End, _) => return None,

            (
                Phase::Start {
                    track: Track::Outreach,
                },
                _,
            ) => self.advance(Phase::InitialOutreach, event),
            (
                Phase::Start {
                    track: Track::Addressed,
                },
                Some(text),
            ) if replies::is_greeting(text) => self.advance(Phase::OutreachReply, event),
            (Phase::Start { .. }, _) => self.clone(),

            (Phase::InitialOutreach | Phase::SecondaryOutreach, Some(_)) => {
                self.advance(inquiry(Track::Outreach), event)
            }
            (Phase::InitialOutreach, None) => self.escalate(Phase::SecondaryOutreach, event),
            (Phase::SecondaryOutreach, None) => self.escalate(
                Phase::GiveUpFrustrated {
                    track: Track::Outreach,
                },
                event,
            ),

            (Phase::Inquiry { track, .. }, Some(text)) if replies::is_answer(text) => {
                self.advance(Phase::InquiryReply { track }, event)
            }
            (Phase::Inquiry { track, .. }, Some(_)) => {
                // Same question still open: keep having asked it.
                let mut next = self.advance(
                    Phase::Inquiry {
                        track,
                        waiting: true,
                        responded: false,
                    },
                    event,
                );
                next.spoken = self.spoken;
                next
            }
            (Phase::Inquiry { track, .. }, None) => {
                self.escalate(Phase::GiveUpFrustrated { track }, event)
            }

            (Phase::OutreachReply, Some(text)) if replies::is_inquiry(text) => self.advance(
                Phase::InquiryReply {
                    track: Track::Addressed,
                },
                event,
            ),
            (Phase::OutreachReply, Some(_)) => self.advance(inquiry(Track::Addressed), event),
            (Phase::OutreachReply, None) => self.escalate(
                Phase::GiveUpFrustrated {
                    track: Track::Addressed,
                },
                event,
            ),

            (Phase::InquiryReply { .. } | Phase::GiveUpFrustrated { .. }, _) => {
                self.advance(Phase::End, event)
            }
        };
        Some(next)
    }

    /// Produce this state's utterances. Each instance speaks once on entry;
    /// an `Inquiry` additionally nudges once per unanswered reply.
    pub fn run(&mut self, rng: &mut dyn RngCore) -> Vec<String> {
        if let Phase::Inquiry {
            track,
            waiting: true,
            responded: false,
        } = self.phase
        {
            if self.spoken {
                self.phase = Phase::Inquiry {
                    track,
                    waiting: true,
                    responded: true,
                };
                return vec![replies::pick(replies::NUDGES, rng).to_string()];
            }
        }

        if self.spoken {
            return Vec::new();
        }
        self.spoken = true;

        let catalog = self.phase.catalog();
        if catalog.is_empty() {
            return Vec::new();
        }
        vec![replies::pick(catalog, rng).to_string()]
    }
}

fn inquiry(track: Track) -> Phase {
    Phase::Inquiry {
        track,
        waiting: false,
        responded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Visibility;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const TIMEOUT: u64 = 10;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    fn tick(secs: i64) -> Event {
        Event::tick("ann", Visibility::Public, at(secs))
    }

    fn say(secs: i64, text: &str) -> Event {
        Event::message("ann", Visibility::Public, at(secs), text, true)
    }

    fn state(phase: Phase) -> ConversationState {
        ConversationState::new(phase, t0(), TIMEOUT)
    }

    fn sensitive_phases() -> Vec<Phase> {
        vec![
            Phase::InitialOutreach,
            Phase::SecondaryOutreach,
            inquiry(Track::Outreach),
            inquiry(Track::Addressed),
            Phase::OutreachReply,
        ]
    }

    #[test]
    fn test_tick_before_timeout_keeps_state() {
        let mut phases = sensitive_phases();
        phases.push(Phase::Start {
            track: Track::Addressed,
        });
        for phase in phases {
            let current = state(phase);
            let next = current.transition(&tick(9)).unwrap();
            assert_eq!(next.phase, phase, "{phase} moved early");
            assert_eq!(next.entered_at, current.entered_at);
        }
    }

    #[test]
    fn test_tick_at_and_after_timeout_escalates() {
        for phase in sensitive_phases() {
            for secs in [10, 11, 600] {
                let next = state(phase).transition(&tick(secs)).unwrap();
                assert_ne!(next.phase, phase, "{phase} did not escalate at {secs}s");
                assert!(
                    next.phase.patience() < phase.patience(),
                    "{phase} -> {} regressed",
                    next.phase
                );
                assert_eq!(next.entered_at, at(secs));
            }
        }
    }

    #[test]
    fn test_escalation_targets() {
        let next = state(Phase::InitialOutreach).transition(&tick(10)).unwrap();
        assert_eq!(next.phase, Phase::SecondaryOutreach);

        let next = state(Phase::SecondaryOutreach).transition(&tick(10)).unwrap();
        assert_eq!(next.name(), "1_GIVEUP_FRUSTRATED");

        let next = state(inquiry(Track::Addressed)).transition(&tick(10)).unwrap();
        assert_eq!(next.name(), "2_GIVEUP_FRUSTRATED");

        let next = state(Phase::OutreachReply).transition(&tick(10)).unwrap();
        assert_eq!(next.name(), "2_GIVEUP_FRUSTRATED");
    }

    #[test]
    fn test_late_message_is_not_a_timeout() {
        // Long past the threshold, but a message takes the message path.
        let next = state(Phase::InitialOutreach)
            .transition(&say(500, "oh hey"))
            .unwrap();
        assert_eq!(next.name(), "1_INQUIRY");

        let next = state(inquiry(Track::Outreach))
            .transition(&say(500, "huh"))
            .unwrap();
        assert_eq!(next.name(), "1_INQUIRY");
        assert_eq!(next.entered_at, at(500));
    }

    #[test]
    fn test_end_has_no_successor() {
        assert!(state(Phase::End).transition(&tick(1)).is_none());
        assert!(state(Phase::End).transition(&say(1, "hi")).is_none());
    }

    #[test]
    fn test_terminal_set() {
        assert!(Phase::End.is_terminal());
        assert!(Phase::GiveUpFrustrated {
            track: Track::Outreach
        }
        .is_terminal());
        assert!(Phase::GiveUpFrustrated {
            track: Track::Addressed
        }
        .is_terminal());
        assert!(Phase::Start {
            track: Track::Addressed
        }
        .is_terminal());
        assert!(!Phase::OutreachReply.is_terminal());
        assert!(!inquiry(Track::Outreach).is_terminal());
    }

    #[test]
    fn test_run_draws_from_state_catalog_once() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut current = state(Phase::InitialOutreach);
        let first = current.run(&mut rng);
        assert_eq!(first.len(), 1);
        assert!(replies::OUTREACH_GREETINGS.contains(&first[0].as_str()));
        assert!(current.run(&mut rng).is_empty());

        // A timeout-stay returns the same instance, so no repeat.
        let mut stayed = current.transition(&tick(3)).unwrap();
        assert!(stayed.run(&mut rng).is_empty());
    }

    #[test]
    fn test_start_says_nothing() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut current = ConversationState::start(Track::Outreach, t0(), TIMEOUT);
        assert!(current.run(&mut rng).is_empty());
    }

    #[test]
    fn test_inquiry_asks_then_nudges_once_per_non_answer() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut current = state(inquiry(Track::Outreach));

        let asked = current.run(&mut rng);
        assert!(replies::INQUIRIES.contains(&asked[0].as_str()));

        let mut next = current.transition(&say(2, "what?")).unwrap();
        assert_eq!(
            next.phase,
            Phase::Inquiry {
                track: Track::Outreach,
                waiting: true,
                responded: false
            }
        );
        let nudge = next.run(&mut rng);
        assert_eq!(nudge.len(), 1);
        assert!(replies::NUDGES.contains(&nudge[0].as_str()));
        assert!(next.run(&mut rng).is_empty());

        let mut again = next.transition(&say(4, "lol")).unwrap();
        assert_eq!(again.run(&mut rng).len(), 1);

        let reply = again.transition(&say(5, "i'm good thanks")).unwrap();
        assert_eq!(reply.name(), "1_INQUIRY_REPLY");
    }

    #[test]
    fn test_scenario_user_never_replies() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut current = ConversationState::start(Track::Outreach, t0(), TIMEOUT);
        assert!(current.run(&mut rng).is_empty());

        current = current.transition(&tick(1)).unwrap();
        assert_eq!(current.name(), "1_INITIAL_OUTREACH");
        assert_eq!(current.run(&mut rng).len(), 1);

        current = current.transition(&tick(5)).unwrap();
        assert_eq!(current.name(), "1_INITIAL_OUTREACH");
        assert!(current.run(&mut rng).is_empty());

        current = current.transition(&tick(11)).unwrap();
        assert_eq!(current.name(), "1_SECONDARY_OUTREACH");
        let reminder = current.run(&mut rng);
        assert!(replies::OUTREACH_REMINDERS.contains(&reminder[0].as_str()));

        current = current.transition(&tick(15)).unwrap();
        assert_eq!(current.name(), "1_SECONDARY_OUTREACH");

        current = current.transition(&tick(21)).unwrap();
        assert_eq!(current.name(), "1_GIVEUP_FRUSTRATED");
        let frustrated = current.run(&mut rng);
        assert!(replies::FRUSTRATED.contains(&frustrated[0].as_str()));

        current = current.transition(&tick(22)).unwrap();
        assert_eq!(current.name(), "END");
        let farewell = current.run(&mut rng);
        assert!(replies::FAREWELLS.contains(&farewell[0].as_str()));
        assert!(current.transition(&tick(23)).is_none());
    }

    #[test]
    fn test_scenario_user_greets_bot() {
        let mut rng = StdRng::seed_from_u64(5);
        let start = ConversationState::start(Track::Addressed, t0(), TIMEOUT);
        let mut next = start.transition(&say(0, "hi")).unwrap();
        assert_eq!(next.name(), "2_OUTREACH_REPLY");
        let lines = next.run(&mut rng);
        assert_eq!(lines.len(), 1);
        assert!(["hi", "hello back at you!"].contains(&lines[0].as_str()));

        let mut answered = next.transition(&say(2, "how are you?")).unwrap();
        assert_eq!(answered.name(), "2_INQUIRY_REPLY");
        assert!(replies::INQUIRY_ANSWERS.contains(&answered.run(&mut rng)[0].as_str()));
        assert_eq!(answered.transition(&say(3, "cool")).unwrap().name(), "END");
    }

    #[test]
    fn test_addressed_start_ignores_non_greeting() {
        let start = ConversationState::start(Track::Addressed, t0(), TIMEOUT);
        let next = start.transition(&say(0, "what time is it")).unwrap();
        assert_eq!(next.name(), "2_START");
        assert!(next.is_terminal());
    }

    #[test]
    fn test_outreach_reply_without_inquiry_asks() {
        let next = state(Phase::OutreachReply)
            .transition(&say(1, "nice weather"))
            .unwrap();
        assert_eq!(next.name(), "2_INQUIRY");
    }
}
