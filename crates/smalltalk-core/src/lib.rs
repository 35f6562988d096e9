//! smalltalk-core — Conversation engine, no transport.
//!
//! This crate holds the per-user conversation state machine, the registry
//! that owns live conversations, the jittered timeout scheduler and the
//! inbound dispatcher. It is transport-agnostic: an adapter implements
//! [`transport::Transport`] and feeds parsed [`types::Event`]s into
//! [`bot::ChatBot`].

pub mod bot;
pub mod commands;
pub mod config;
pub mod engine;
pub mod events;
pub mod initiator;
pub mod registry;
pub mod replies;
pub mod scheduler;
pub mod states;
pub mod transport;
pub mod types;
