use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    session::{CommandReply, PlaybackState, QueueView, StatusNotice},
    PlayerError, Track,
};

use super::messages::{loop_icon, render_error, render_notice, render_reply};

/// Colores consistentes para todos los embeds
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";
const ITEMS_PER_PAGE: usize = 10;

/// Embed de respuesta a un comando
pub fn reply_embed(reply: &CommandReply) -> CreateEmbed {
    match reply {
        CommandReply::NowPlaying(track) | CommandReply::Current(Some(track)) => now_playing_embed(track),
        CommandReply::Queue(view) => queue_embed(view),
        other => simple_embed(render_reply(other), colors::SUCCESS_GREEN),
    }
}

pub fn error_embed(error: &PlayerError) -> CreateEmbed {
    let colour = match error {
        PlayerError::QueueFull(_) | PlayerError::InvalidVolume(_) | PlayerError::IndexOutOfRange { .. } => {
            colors::WARNING_ORANGE
        }
        _ => colors::ERROR_RED,
    };
    simple_embed(render_error(error), colour)
}

pub fn notice_embed(notice: &StatusNotice) -> CreateEmbed {
    match notice {
        StatusNotice::NowPlaying(track) => now_playing_embed(track),
        StatusNotice::TrackFailed { .. } => simple_embed(render_notice(notice), colors::ERROR_RED),
        StatusNotice::InactivityDisconnect => simple_embed(render_notice(notice), colors::NEUTRAL_GRAY),
    }
}

/// Comando mal formado (antes de llegar al gestor de sesiones)
pub fn usage_embed(message: &str) -> CreateEmbed {
    simple_embed(format!("⚠️ {}", message), colors::WARNING_ORANGE)
}

fn simple_embed(description: String, colour: Colour) -> CreateEmbed {
    CreateEmbed::default()
        .description(description)
        .color(colour)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar la canción actual
pub fn now_playing_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title()))
        .color(colors::MUSIC_PURPLE)
        .field("🎤 Artista", track.author(), true);

    embed = match track.duration() {
        Some(duration) => embed.field("⏱️ Duración", format_duration(duration), true),
        None => embed.field("⏱️ Duración", "🔴 En vivo", true),
    };

    if let Some(user_id) = track.requester() {
        embed = embed.field("👤 Solicitado por", format!("<@{}>", user_id), true);
    }

    if track.source_ref().starts_with("http") {
        embed = embed.url(track.source_ref());
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea el embed de la cola (primera página)
pub fn queue_embed(view: &QueueView) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if view.current.is_none() && view.upcoming.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &view.current {
        let status = if view.state == PlaybackState::Paused {
            "⏸️"
        } else {
            loop_icon(view.loop_mode)
        };
        embed = embed.field(
            format!("{} Reproduciendo", status),
            format!("**{}** - {}", current.title(), current.author()),
            false,
        );
    }

    let upcoming = upcoming_lines(&view.upcoming, ITEMS_PER_PAGE);
    if !upcoming.is_empty() {
        embed = embed.field("Próximas canciones", upcoming, false);
    }

    embed
        .field("Información", queue_summary(view), false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Lista numerada (1-based) de las primeras `limit` canciones
fn upcoming_lines(upcoming: &[Track], limit: usize) -> String {
    let mut lines = String::new();
    for (i, item) in upcoming.iter().take(limit).enumerate() {
        let duration = item
            .duration()
            .map(|d| format!(" `[{}]`", format_duration(d)))
            .unwrap_or_default();
        lines.push_str(&format!("**{}**. {} - {}{}\n", i + 1, item.title(), item.author(), duration));
    }
    if upcoming.len() > limit {
        lines.push_str(&format!("… y {} más\n", upcoming.len() - limit));
    }
    lines
}

fn queue_summary(view: &QueueView) -> String {
    let total: Duration = view.upcoming.iter().filter_map(Track::duration).sum();
    let mut info = format!("**Total:** {} canciones", view.upcoming.len());
    if total > Duration::ZERO {
        info.push_str(&format!(" • **Duración:** {}", format_duration(total)));
    }
    info.push_str(&format!(
        "\n**Volumen:** {}% • **Repetición:** {}",
        view.volume, view.loop_mode
    ));
    info
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
