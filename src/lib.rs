//! Per-guild playback session manager for a Discord music bot.
//!
//! - [`audio`]: sessions, queue, inactivity timer and the voice backend seam
//! - [`bot`]: Discord (serenity) adapter and the event router
//! - [`sources`]: track resolution through yt-dlp
//! - [`ui`]: Spanish reply rendering
//! - [`config`]: environment configuration

pub mod audio;
pub mod bot;
pub mod config;
pub mod sources;
pub mod ui;
