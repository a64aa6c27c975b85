//! Textos en español de respuestas, errores y avisos.

use crate::audio::{
    queue::LoopMode,
    session::{CommandReply, StatusNotice},
    PlayerError, Track,
};

use super::embeds::format_duration;

/// Título con autor y duración, como se muestra en los mensajes
pub fn describe_track(track: &Track) -> String {
    let duration = track
        .duration()
        .map(|d| format!(" `[{}]`", format_duration(d)))
        .unwrap_or_default();
    format!("**{}** - {}{}", track.title(), track.author(), duration)
}

pub fn render_reply(reply: &CommandReply) -> String {
    match reply {
        CommandReply::NowPlaying(track) => format!("🎵 Reproduciendo: {}", describe_track(track)),
        CommandReply::Queued { track, position } => {
            format!("✅ Agregado a la cola (#{}): {}", position, describe_track(track))
        }
        CommandReply::Skipped(track) => format!("⏭️ Saltado: **{}**", track.title()),
        CommandReply::Paused => "⏸️ Reproducción pausada".to_string(),
        CommandReply::Resumed => "▶️ Reproducción reanudada".to_string(),
        CommandReply::Stopped => "⏹️ Reproducción detenida y cola limpiada".to_string(),
        CommandReply::Removed { index, track } => {
            format!("🗑️ Eliminado de la posición {}: **{}**", index, track.title())
        }
        CommandReply::Queue(view) => {
            if view.current.is_none() && view.upcoming.is_empty() {
                "😴 La cola está vacía".to_string()
            } else {
                format!("📋 {} canciones en cola", view.upcoming.len())
            }
        }
        CommandReply::Volume(level) => format!("🔊 Volumen ajustado a {}%", level),
        CommandReply::Current(Some(track)) => format!("🎵 Sonando ahora: {}", describe_track(track)),
        CommandReply::Current(None) => "🔇 No hay nada reproduciéndose".to_string(),
        CommandReply::Loop(mode) => format!("{} Repetición: {}", loop_icon(*mode), mode),
        CommandReply::Shuffled(count) => format!("🔀 Cola mezclada ({} canciones)", count),
    }
}

pub fn render_error(error: &PlayerError) -> String {
    let icon = match error {
        PlayerError::NoVoiceChannel | PlayerError::NotConnected => "🔇",
        PlayerError::NotFound(_) => "🔍",
        PlayerError::QueueFull(_) | PlayerError::InvalidVolume(_) | PlayerError::IndexOutOfRange { .. } => "⚠️",
        _ => "❌",
    };
    format!("{} {}", icon, error)
}

pub fn render_notice(notice: &StatusNotice) -> String {
    match notice {
        StatusNotice::NowPlaying(track) => format!("🎵 Reproduciendo: {}", describe_track(track)),
        StatusNotice::TrackFailed { title, reason } => {
            format!("❌ No se pudo reproducir **{}**: {}", title, reason)
        }
        StatusNotice::InactivityDisconnect => "💤 Me desconecté por inactividad".to_string(),
    }
}

pub fn loop_icon(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Track => "🔂",
        LoopMode::Queue => "🔁",
        LoopMode::Off => "▶️",
    }
}
