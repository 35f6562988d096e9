//! Administrative verbs addressed to the bot.

/// Reply for `*state` when the caller has no conversation.
pub const NO_CONVERSATION: &str = "no conversation";

/// Line the bot quits with on `die`.
pub const DIE_REASON: &str = "ugh fine bye";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Orderly shutdown.
    Die,
    /// Report the caller's current state name.
    State,
    /// Drop the caller's conversation.
    Forget,
    /// Live conversations and channel presence.
    Stats,
    /// Anything else that starts with `*`.
    Unknown(String),
}

impl Command {
    /// `None` means the text is conversation, not a command.
    pub fn parse(text: &str) -> Option<Command> {
        let text = text.trim();
        match text {
            "die" => Some(Command::Die),
            "*state" => Some(Command::State),
            "*forget" => Some(Command::Forget),
            "*stats" => Some(Command::Stats),
            _ if text.starts_with('*') => Some(Command::Unknown(text.to_string())),
            _ => None,
        }
    }
}
