//! Enrutado de eventos entrantes hacia el [`SessionManager`].
//!
//! Los adaptadores de Discord y del backend de voz traducen lo que reciben a
//! [`InboundEvent`] y [`BackendEvent`]; este módulo no sabe nada de serenity
//! más allá de los tipos de id.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        player::BackendEvent,
        queue::LoopMode,
        session::{CommandReply, PresenceChange, SessionManager},
        PlayerError,
    },
    sources::TrackResolver,
};

/// Comandos de usuario ya validados sintácticamente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuildCommand {
    Play {
        requester: UserId,
        /// Canal de voz donde está quien pide, si está en alguno
        requester_channel: Option<ChannelId>,
        query: String,
        reply_channel: ChannelId,
    },
    Skip,
    Pause,
    Resume,
    Stop,
    Queue,
    Remove { index: i64 },
    Volume { level: i64 },
    NowPlaying,
    Loop { mode: LoopMode },
    Shuffle,
}

/// Ocupación del canal de voz donde está el bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// Miembros humanos más el bot
    pub occupant_count: usize,
    pub bot_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Command {
        guild_id: GuildId,
        command: GuildCommand,
    },
    Presence(PresenceUpdate),
    /// El bot dejó `channel_id` sin que se lo pidiéramos
    VoiceReleased {
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
    },
}

pub struct EventRouter {
    sessions: Arc<SessionManager>,
    resolver: Arc<dyn TrackResolver>,
}

impl EventRouter {
    pub fn new(sessions: Arc<SessionManager>, resolver: Arc<dyn TrackResolver>) -> Self {
        Self { sessions, resolver }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Solo los comandos producen respuesta
    pub async fn dispatch(&self, event: InboundEvent) -> Option<Result<CommandReply, PlayerError>> {
        match event {
            InboundEvent::Command { guild_id, command } => Some(self.execute(guild_id, command).await),
            InboundEvent::Presence(update) => {
                self.presence(update).await;
                None
            }
            InboundEvent::VoiceReleased { guild_id, channel_id } => {
                self.sessions.release(guild_id, channel_id).await;
                None
            }
        }
    }

    pub async fn execute(&self, guild_id: GuildId, command: GuildCommand) -> Result<CommandReply, PlayerError> {
        debug!("📨 Comando {:?} en guild {}", command, guild_id);
        match command {
            GuildCommand::Play {
                requester,
                requester_channel,
                query,
                reply_channel,
            } => {
                let voice_channel = requester_channel.ok_or(PlayerError::NoVoiceChannel)?;

                // La búsqueda ocurre fuera del carril de la guild
                let track = match self.resolver.search(&query).await {
                    Ok(Some(track)) => track.requested_by(requester),
                    Ok(None) => return Err(PlayerError::NotFound(query)),
                    Err(e) => {
                        warn!("🔍 Error buscando {:?}: {:#}", query, e);
                        return Err(PlayerError::LoadFailed(e.to_string()));
                    }
                };

                self.sessions
                    .play(guild_id, voice_channel, reply_channel, track)
                    .await
            }
            GuildCommand::Skip => self.sessions.skip(guild_id).await,
            GuildCommand::Pause => self.sessions.pause(guild_id).await,
            GuildCommand::Resume => self.sessions.resume(guild_id).await,
            GuildCommand::Stop => self.sessions.stop(guild_id).await,
            GuildCommand::Queue => Ok(self.sessions.queue(guild_id).await),
            GuildCommand::Remove { index } => self.sessions.remove(guild_id, index).await,
            GuildCommand::Volume { level } => self.sessions.volume(guild_id, level).await,
            GuildCommand::NowPlaying => Ok(self.sessions.now_playing(guild_id).await),
            GuildCommand::Loop { mode } => self.sessions.set_loop(guild_id, mode).await,
            GuildCommand::Shuffle => self.sessions.shuffle(guild_id).await,
        }
    }

    async fn presence(&self, update: PresenceUpdate) {
        if !update.bot_present {
            return;
        }
        let change = if update.occupant_count <= 1 {
            PresenceChange::BotAlone
        } else {
            PresenceChange::Accompanied
        };
        self.sessions
            .on_presence_change(update.guild_id, update.channel_id, change)
            .await;
    }

    pub async fn handle_backend_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::TrackFinished {
                guild_id,
                play_id,
                reason,
            } => self.sessions.on_track_finished(guild_id, play_id, reason).await,
            BackendEvent::ConnectionLost { guild_id } => self.sessions.on_connection_lost(guild_id).await,
            BackendEvent::NodeReady => info!("✅ Backend de voz listo"),
        }
    }

    /// Consume el canal de eventos del backend, una tarea por evento.
    pub async fn run_backend_events(self: Arc<Self>, events: flume::Receiver<BackendEvent>) {
        while let Ok(event) = events.recv_async().await {
            let router = self.clone();
            tokio::spawn(async move {
                router.handle_backend_event(event).await;
            });
        }
        info!("Canal de eventos del backend cerrado");
    }
}
