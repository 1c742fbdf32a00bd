//! # guildcast
//!
//! Per-guild music playback engine: a queue and playback session per
//! guild, and a streaming loop that pipes a decoder process through an
//! Opus encoder into a voice transport.
//!
//! The crate is transport-agnostic. A gateway driver implements (or
//! drains) [`audio::transport::VoiceTransport`]; a command layer resolves
//! tracks with [`sources::SourceManager`], edits the session's queue and
//! calls [`audio::player::Player::play`].

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod registry;
pub mod sources;
pub mod storage;

pub use config::Config;
pub use error::PlayError;
pub use registry::SessionRegistry;
