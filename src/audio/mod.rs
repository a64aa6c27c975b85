//! # Audio Module
//!
//! Per-guild playback sessions for the bot.
//!
//! ## Architecture
//!
//! ### [`session`] - Session Manager
//! - One lane (fair async mutex) per guild; every input for a guild is
//!   linearized through it
//! - Owns the queue, the inactivity timer and the playback controller
//! - Bounded self-advance past unplayable tracks
//!
//! ### [`player`] - Playback Controller
//! - The [`player::VoiceBackend`] seam and the events it emits
//! - Per-play identifiers so late finish events are discarded
//!
//! ### [`queue`] - Queue Management
//! - FIFO with 1-based public indices, capacity limit, shuffle and loop modes
//!
//! ### [`timer`] - Inactivity Timer
//! - At most one pending timer per guild, identified by generation
//!
//! ### [`songbird_backend`] - Voice Backend
//! - [`player::VoiceBackend`] over Songbird with yt-dlp inputs
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_jukebox::audio::{
//!     session::{SessionManager, SessionSettings, StatusSink},
//!     player::VoiceBackend,
//!     track::Track,
//! };
//! use serenity::all::{ChannelId, GuildId};
//! use std::sync::Arc;
//!
//! # async fn example(backend: Arc<dyn VoiceBackend>, sink: Arc<dyn StatusSink>) {
//! let sessions = SessionManager::new(backend, sink, SessionSettings::default());
//! let guild_id = GuildId::new(123456789);
//!
//! let track = Track::new("Song", "Artist", "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
//! let _ = sessions
//!     .play(guild_id, ChannelId::new(1), ChannelId::new(2), track)
//!     .await;
//! let _ = sessions.pause(guild_id).await;
//! let _ = sessions.resume(guild_id).await;
//! let _ = sessions.skip(guild_id).await;
//! # }
//! ```

pub mod error;
pub mod player;
pub mod queue;
pub mod session;
pub mod songbird_backend;
#[cfg(test)]
pub(crate) mod testing;
pub mod timer;
pub mod track;

pub use error::PlayerError;
pub use track::Track;
