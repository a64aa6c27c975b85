//! # Bot Module
//!
//! Discord adapter for the session manager.
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`]: it registers slash
//! commands on `ready`, turns interactions and voice state updates into
//! [`events::InboundEvent`]s for the [`events::EventRouter`], and renders the
//! replies. [`ChannelStatusSink`] posts asynchronous notices back to the text
//! channel a guild last used.

use anyhow::Result;
use async_trait::async_trait;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    builder::CreateMessage,
    http::Http,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{
    audio::{
        player::BackendEvent,
        session::{StatusNotice, StatusSink},
    },
    config::Config,
    ui::embeds,
};
use events::{EventRouter, InboundEvent, PresenceUpdate};

pub struct JukeboxBot {
    config: Arc<Config>,
    router: Arc<EventRouter>,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, router: Arc<EventRouter>) -> Self {
        Self { config, router }
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Registra los comandos globalmente, o en `GUILD_ID` si está definido
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        self.router.handle_backend_event(BackendEvent::NodeReady).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let bot_id = ctx.cache.current_user().id;

        // Detectar si el bot fue desconectado
        if new.user_id == bot_id && new.channel_id.is_none() {
            if let Some(old) = old {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                let event = InboundEvent::VoiceReleased {
                    guild_id,
                    channel_id: old.channel_id,
                };
                self.router.dispatch(event).await;
            }
            return;
        }

        let touched = [old.as_ref().and_then(|state| state.channel_id), new.channel_id];
        if let Some(update) = bot_channel_occupancy(&ctx, guild_id, &touched) {
            debug!(
                "👥 Canal {} en guild {}: {} ocupantes",
                update.channel_id, guild_id, update.occupant_count
            );
            self.router.dispatch(InboundEvent::Presence(update)).await;
        }
    }
}

/// Ocupación del canal del bot, si el cambio afectó a ese canal
fn bot_channel_occupancy(
    ctx: &Context,
    guild_id: GuildId,
    touched: &[Option<ChannelId>],
) -> Option<PresenceUpdate> {
    let bot_id = ctx.cache.current_user().id;
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    let bot_channel = guild.voice_states.get(&bot_id)?.channel_id?;

    if !touched.contains(&Some(bot_channel)) {
        return None;
    }

    let occupant_count = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(bot_channel))
        .filter(|state| {
            state.user_id == bot_id || !state.member.as_ref().is_some_and(|member| member.user.bot)
        })
        .count();

    Some(PresenceUpdate {
        guild_id,
        channel_id: bot_channel,
        occupant_count,
        bot_present: true,
    })
}

/// Publica avisos de estado con la API HTTP de Discord
pub struct ChannelStatusSink {
    http: Arc<Http>,
}

impl ChannelStatusSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl StatusSink for ChannelStatusSink {
    async fn post(&self, channel_id: ChannelId, notice: StatusNotice) {
        let message = CreateMessage::new().embed(embeds::notice_embed(&notice));
        if let Err(e) = channel_id.send_message(&self.http, message).await {
            warn!("No se pudo enviar aviso al canal {}: {:?}", channel_id, e);
        }
    }
}
