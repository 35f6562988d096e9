//! Transport boundary — what the engine needs from a chat connection.

use async_trait::async_trait;

use crate::types::Utterance;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A connected chat client. Sends are best-effort: an `Ok` only means the
/// line was handed to the connection.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Users currently present in the channel, excluding the bot.
    async fn current_users(&self) -> Vec<String>;

    /// Public utterances go to the channel prefixed with the user's name,
    /// private ones directly to the user.
    async fn send(&self, utterance: &Utterance) -> Result<(), TransportError>;

    async fn notice(&self, user: &str, text: &str) -> Result<(), TransportError>;

    async fn disconnect(&self, reason: &str) -> Result<(), TransportError>;
}
