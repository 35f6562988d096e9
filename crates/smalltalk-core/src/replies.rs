//! Reply catalogs — the fixed lines each state can say, and the phrase
//! lists used to recognise what the other side said.

use rand::seq::SliceRandom;
use rand::RngCore;

// ── What the bot says ──

/// First contact when the bot reaches out.
pub const OUTREACH_GREETINGS: &[&str] = &["hi", "hello", "hey there", "howdy"];

/// Second attempt after the first greeting went unanswered.
pub const OUTREACH_REMINDERS: &[&str] = &[
    "hello?",
    "hey, anyone there?",
    "excuse me... hello?",
];

/// Greeting back to someone who greeted the bot first.
pub const GREETING_REPLIES: &[&str] = &["hi", "hello back at you!"];

pub const INQUIRIES: &[&str] = &["how are you?", "how's it going?", "what's happening?"];

/// Re-ask after a reply that did not answer the question.
pub const NUDGES: &[&str] = &[
    "hmm? i asked how you're doing",
    "that's not really an answer. how are you?",
    "so... how are you?",
];

/// Closing line after the other side answered the bot's question.
pub const INQUIRY_ACKNOWLEDGMENTS: &[&str] = &["glad to hear it!", "good to know, thanks", "nice!"];

/// Closing line after the other side asked how the bot is doing.
pub const INQUIRY_ANSWERS: &[&str] = &[
    "i'm good, thanks for asking",
    "doing fine, thanks!",
    "not bad at all",
];

pub const FRUSTRATED: &[&str] = &[
    "ugh, fine. forget you.",
    "whatever, never mind.",
    "ok, be that way.",
];

pub const FAREWELLS: &[&str] = &["bye!", "talk to you later", "see ya"];

// ── What the bot recognises ──

pub const KNOWN_GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hiya",
    "howdy",
    "hola",
    "yo",
    "sup",
    "greetings",
    "good morning",
    "good afternoon",
    "good evening",
];

pub const KNOWN_INQUIRIES: &[&str] = &[
    "how are you",
    "how are you doing",
    "how's it going",
    "hows it going",
    "how are things",
    "how have you been",
    "what's up",
    "whats up",
    "how about you",
    "and you",
];

pub const KNOWN_ANSWERS: &[&str] = &[
    "good",
    "fine",
    "great",
    "well",
    "okay",
    "ok",
    "alright",
    "not bad",
    "awesome",
    "excellent",
    "so so",
    "meh",
    "bad",
    "terrible",
    "tired",
];

/// Draw one line uniformly from `catalog`.
pub fn pick(catalog: &'static [&'static str], rng: &mut dyn RngCore) -> &'static str {
    catalog.choose(rng).copied().unwrap_or_default()
}

/// Lowercase, turn punctuation into spaces and collapse whitespace.
/// Apostrophes survive so "how's" stays one word.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when any phrase occurs in `text` as whole words.
pub fn mentions_any(text: &str, phrases: &[&str]) -> bool {
    let haystack = format!(" {} ", normalize(text));
    phrases.iter().any(|phrase| {
        let needle = normalize(phrase);
        !needle.is_empty() && haystack.contains(&format!(" {} ", needle))
    })
}

pub fn is_greeting(text: &str) -> bool {
    mentions_any(text, KNOWN_GREETINGS)
}

pub fn is_inquiry(text: &str) -> bool {
    mentions_any(text, KNOWN_INQUIRIES)
}

pub fn is_answer(text: &str) -> bool {
    mentions_any(text, KNOWN_ANSWERS)
}
