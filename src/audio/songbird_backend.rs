//! [`VoiceBackend`] implementado sobre Songbird.
//!
//! Cada pista se reproduce con `play_only`, así el driver nunca tiene más de
//! una pista viva por guild. Los fines de pista y las caídas del driver se
//! convierten en [`BackendEvent`] y se envían por un canal `flume`.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    input::YoutubeDl,
    tracks::{PlayMode, Track as DriverTrack, TrackHandle},
    CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, error, info, warn};

use super::{
    error::PlayerError,
    player::{BackendEvent, FinishReason, VoiceBackend},
    track::Track,
};

pub struct SongbirdBackend {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    tracks: DashMap<GuildId, TrackHandle>,
    watched: Mutex<HashSet<GuildId>>,
    events: flume::Sender<BackendEvent>,
}

impl SongbirdBackend {
    pub fn new(manager: Arc<Songbird>, events: flume::Sender<BackendEvent>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
            tracks: DashMap::new(),
            watched: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Registra el aviso de caída del driver una sola vez por llamada de voz
    async fn watch_driver(&self, guild_id: GuildId) {
        if !self.watched.lock().insert(guild_id) {
            return;
        }
        if let Some(call) = self.manager.get(guild_id) {
            let mut call = call.lock().await;
            call.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectNotifier {
                    guild_id,
                    events: self.events.clone(),
                },
            );
        }
    }

    fn volume_scale(volume: u8) -> f32 {
        f32::from(volume) / 100.0
    }
}

#[async_trait]
impl VoiceBackend for SongbirdBackend {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), PlayerError> {
        self.manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| PlayerError::ConnectFailed(e.to_string()))?;
        self.watch_driver(guild_id).await;
        info!("🔊 Conectado al canal {} en guild {}", channel_id, guild_id);
        Ok(())
    }

    async fn move_to(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), PlayerError> {
        self.manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| PlayerError::MoveFailed(e.to_string()))?;
        info!("🔀 Movido al canal {} en guild {}", channel_id, guild_id);
        Ok(())
    }

    async fn play(&self, guild_id: GuildId, play_id: u64, track: Track, volume: u8) -> Result<(), PlayerError> {
        let call = self.manager.get(guild_id).ok_or(PlayerError::NotConnected)?;

        let input = YoutubeDl::new(self.http.clone(), track.source_ref().to_string());
        let driver_track = DriverTrack::from(input).volume(Self::volume_scale(volume));

        let handle = {
            let mut call = call.lock().await;
            call.play_only(driver_track)
        };

        let notifier = TrackNotifier {
            guild_id,
            play_id,
            events: self.events.clone(),
        };
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(Event::Track(event), notifier.clone())
                .map_err(|e| PlayerError::LoadFailed(e.to_string()))?;
        }

        debug!("🎵 play {} → {} en guild {}", play_id, track.title(), guild_id);
        self.tracks.insert(guild_id, handle);
        Ok(())
    }

    async fn stop(&self, guild_id: GuildId) -> Result<bool, PlayerError> {
        let Some((_, handle)) = self.tracks.remove(&guild_id) else {
            return Ok(false);
        };
        // Si ya había terminado, su evento de fin ya está en camino
        match handle.stop() {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("stop sobre pista terminada en guild {}: {}", guild_id, e);
                Ok(false)
            }
        }
    }

    async fn pause(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let handle = self.tracks.get(&guild_id).ok_or(PlayerError::NothingPlaying)?;
        handle.pause().map_err(|e| {
            warn!("No se pudo pausar en guild {}: {}", guild_id, e);
            PlayerError::BackendUnavailable
        })
    }

    async fn resume(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let handle = self.tracks.get(&guild_id).ok_or(PlayerError::NothingPaused)?;
        handle.play().map_err(|e| {
            warn!("No se pudo reanudar en guild {}: {}", guild_id, e);
            PlayerError::BackendUnavailable
        })
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), PlayerError> {
        if let Some(handle) = self.tracks.get(&guild_id) {
            handle.set_volume(Self::volume_scale(volume)).map_err(|e| {
                warn!("No se pudo cambiar el volumen en guild {}: {}", guild_id, e);
                PlayerError::BackendUnavailable
            })?;
        }
        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        self.tracks.remove(&guild_id);
        self.watched.lock().remove(&guild_id);

        match self.manager.remove(guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Desconectado del canal de voz en guild {}", guild_id);
                Ok(())
            }
            Err(e) => {
                error!("Error al salir del canal de voz en guild {}: {}", guild_id, e);
                Err(PlayerError::BackendUnavailable)
            }
        }
    }

    async fn is_connected(&self, guild_id: GuildId) -> bool {
        match self.manager.get(guild_id) {
            Some(call) => call.lock().await.current_channel().is_some(),
            None => false,
        }
    }
}

/// Avisa del fin (o error) de una reproducción concreta.
#[derive(Clone)]
struct TrackNotifier {
    guild_id: GuildId,
    play_id: u64,
    events: flume::Sender<BackendEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let failure = match ctx {
            EventContext::Track(states) => states.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(e.to_string()),
                _ => None,
            }),
            _ => None,
        };

        let reason = match failure {
            Some(cause) => FinishReason::Failed(cause),
            None => FinishReason::Completed,
        };

        if self
            .events
            .send(BackendEvent::TrackFinished {
                guild_id: self.guild_id,
                play_id: self.play_id,
                reason,
            })
            .is_err()
        {
            warn!("Canal de eventos cerrado, fin de pista descartado");
        }

        None
    }
}

struct DisconnectNotifier {
    guild_id: GuildId,
    events: flume::Sender<BackendEvent>,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            // Sin motivo significa que fuimos nosotros quienes salimos
            if data.reason.is_some() {
                warn!("📡 Driver de voz desconectado en guild {}: {:?}", self.guild_id, data.reason);
                let sent = self.events.send(BackendEvent::ConnectionLost {
                    guild_id: self.guild_id,
                });
                if sent.is_err() {
                    warn!("Canal de eventos cerrado, caída del driver descartada");
                }
            }
        }
        None
    }
}
