//! # Audio Module
//!
//! Per-guild playback engine: queue, session state machine and the
//! streaming loop that turns a stream URL into Opus frames.
//!
//! ## Architecture
//!
//! ### [`track`] - Track metadata
//! - Immutable once queued, shared as `Arc<Track>`
//! - Stream URL may be resolved lazily before playback
//!
//! ### [`queue`] - Queue Management
//! - Index 0 is the current track, the rest are upcoming
//! - Bounded history for "previous"
//! - Shuffle, move and remove only touch upcoming positions
//!
//! ### [`session`] - Playback Session
//! - Play state, volume and elapsed-time clock
//! - Single-slot control signals (stop, pause, resume, skip)
//! - Track-change / track-end hooks
//!
//! ### [`player`] - Streaming Loop
//! - Decoder process → Opus encoder → voice transport
//! - Signal priority: stop > skip > pause
//! - Chains through the queue until it is exhausted
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz
//! - **Bit Depth**: 16-bit signed integers, little endian
//! - **Channels**: Stereo (2 channels)
//! - **Frame**: 20ms (960 samples per channel, 3840 bytes)
//! - **Encoding**: Opus at 128kbps (configurable)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guildcast::audio::{player::Player, session::Session, transport::ChannelTransport};
//! use serenity::model::id::{ChannelId, GuildId};
//! use std::sync::Arc;
//!
//! # async fn example(player: Player, track: Arc<guildcast::audio::track::Track>) -> anyhow::Result<()> {
//! let session = Arc::new(Session::new(GuildId::new(123456789), 50));
//! let (transport, _frames) = ChannelTransport::new(ChannelId::new(1), 50);
//! session.attach_transport(Arc::new(transport));
//!
//! session.queue().add([track]);
//! player.play(&session)?;
//!
//! session.pause();
//! session.resume();
//! session.skip();
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod encoder;
pub mod player;
pub mod queue;
pub mod session;
pub mod track;
pub mod transport;

pub use player::{Player, StreamResolver};
pub use queue::Queue;
pub use session::{PlayState, Session, SessionHooks};
pub use track::{SourceKind, Track};
pub use transport::{ChannelTransport, VoiceTransport};
