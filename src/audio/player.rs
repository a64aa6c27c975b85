use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, warn};

use super::{error::PlayerError, track::Track};

/// Identificadores de reproducción únicos en todo el proceso, para que un
/// fin de pista tardío de una sesión anterior nunca coincida con uno nuevo.
static NEXT_PLAY_ID: AtomicU64 = AtomicU64::new(1);

fn next_play_id() -> u64 {
    NEXT_PLAY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Cómo terminó una pista según el backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Terminó sola o por un `stop` pedido
    Completed,
    /// Error de carga o de reproducción
    Failed(String),
}

/// Notificaciones asíncronas que origina el backend de audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    TrackFinished {
        guild_id: GuildId,
        play_id: u64,
        reason: FinishReason,
    },
    /// El driver de voz se cayó a mitad de reproducción
    ConnectionLost { guild_id: GuildId },
    NodeReady,
}

/// Lo que el núcleo necesita de un backend (nodo Lavalink o pipeline local).
///
/// El fin de cada pista se informa aparte, como [`BackendEvent::TrackFinished`]
/// con el `play_id` recibido en [`VoiceBackend::play`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), PlayerError>;

    async fn move_to(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), PlayerError>;

    async fn play(
        &self,
        guild_id: GuildId,
        play_id: u64,
        track: Track,
        volume: u8,
    ) -> Result<(), PlayerError>;

    /// Devuelve `true` si había una pista viva que detener.
    async fn stop(&self, guild_id: GuildId) -> Result<bool, PlayerError>;

    async fn pause(&self, guild_id: GuildId) -> Result<(), PlayerError>;

    async fn resume(&self, guild_id: GuildId) -> Result<(), PlayerError>;

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), PlayerError>;

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), PlayerError>;

    /// Si el backend mantiene una llamada de voz activa en la guild
    async fn is_connected(&self, guild_id: GuildId) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Stopped,
    Playing,
    Paused,
}

/// Envuelve la conexión de voz de una guild y refleja su estado.
///
/// Nunca decide qué suena después: eso lo hace el gestor de sesiones al
/// recibir el fin de pista.
pub struct PlaybackController {
    guild_id: GuildId,
    backend: Arc<dyn VoiceBackend>,
    call_timeout: Duration,
    channel_id: Option<ChannelId>,
    current: Option<Track>,
    transport: Transport,
    play_id: u64,
    volume: u8,
}

impl PlaybackController {
    pub fn new(
        guild_id: GuildId,
        backend: Arc<dyn VoiceBackend>,
        volume: u8,
        call_timeout: Duration,
    ) -> Self {
        Self {
            guild_id,
            backend,
            call_timeout,
            channel_id: None,
            current: None,
            transport: Transport::Stopped,
            play_id: 0,
            volume: volume.min(100),
        }
    }

    /// Toda llamada al backend tiene un tope de espera
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, PlayerError>>,
        on_timeout: PlayerError,
    ) -> Result<T, PlayerError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("⌛ Backend sin respuesta en guild {}", self.guild_id);
                Err(on_timeout)
            }
        }
    }

    pub async fn connect(&mut self, channel_id: ChannelId) -> Result<(), PlayerError> {
        let result = self
            .bounded(
                self.backend.connect(self.guild_id, channel_id),
                PlayerError::ConnectFailed("tiempo de espera agotado".into()),
            )
            .await;

        match result {
            Ok(()) => {
                self.channel_id = Some(channel_id);
                info!("🔊 Conectado al canal {} en guild {}", channel_id, self.guild_id);
                Ok(())
            }
            Err(e) => {
                // Un join que terminó tarde no debe dejar la llamada viva
                let cleanup = self
                    .bounded(self.backend.disconnect(self.guild_id), PlayerError::BackendUnavailable)
                    .await;
                if let Err(cleanup) = cleanup {
                    debug!("Limpieza tras conexión fallida: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    pub async fn move_to(&mut self, channel_id: ChannelId) -> Result<(), PlayerError> {
        self.bounded(
            self.backend.move_to(self.guild_id, channel_id),
            PlayerError::MoveFailed("tiempo de espera agotado".into()),
        )
        .await?;

        info!("🚚 Movido al canal {} en guild {}", channel_id, self.guild_id);
        self.channel_id = Some(channel_id);
        Ok(())
    }

    pub async fn play(&mut self, track: Track) -> Result<(), PlayerError> {
        if self.channel_id.is_none() {
            return Err(PlayerError::NotConnected);
        }

        let play_id = next_play_id();
        self.play_id = play_id;
        self.current = None;
        self.transport = Transport::Stopped;

        self.bounded(
            self.backend
                .play(self.guild_id, play_id, track.clone(), self.volume),
            PlayerError::BackendUnavailable,
        )
        .await?;

        info!("🎵 Reproduciendo: {} (guild {})", track.title(), self.guild_id);
        self.current = Some(track);
        self.transport = Transport::Playing;
        Ok(())
    }

    /// Pide detener la pista actual. Si había una pista viva, el backend
    /// responderá con `TrackFinished`.
    pub async fn stop(&mut self) -> Result<bool, PlayerError> {
        self.bounded(self.backend.stop(self.guild_id), PlayerError::BackendUnavailable)
            .await
    }

    pub async fn pause(&mut self) -> Result<(), PlayerError> {
        self.bounded(self.backend.pause(self.guild_id), PlayerError::BackendUnavailable)
            .await?;
        self.transport = Transport::Paused;
        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<(), PlayerError> {
        self.bounded(self.backend.resume(self.guild_id), PlayerError::BackendUnavailable)
            .await?;
        self.transport = Transport::Playing;
        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        Ok(())
    }

    /// Ajusta el volumen (0-100). Se conserva para las siguientes pistas.
    pub async fn set_volume(&mut self, level: i64) -> Result<u8, PlayerError> {
        let volume = u8::try_from(level)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(PlayerError::InvalidVolume(level))?;

        if self.current.is_some() {
            self.bounded(
                self.backend.set_volume(self.guild_id, volume),
                PlayerError::BackendUnavailable,
            )
            .await?;
        }

        self.volume = volume;
        info!("🔊 Volumen ajustado a {}% en guild {}", volume, self.guild_id);
        Ok(volume)
    }

    /// Libera la conexión. Los errores del backend solo se registran.
    pub async fn disconnect(&mut self) {
        let result = self
            .bounded(self.backend.disconnect(self.guild_id), PlayerError::BackendUnavailable)
            .await;
        if let Err(e) = result {
            warn!("Error al desconectar guild {}: {}", self.guild_id, e);
        }

        self.channel_id = None;
        self.current = None;
        self.transport = Transport::Stopped;
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }

    /// Pregunta al backend si la llamada sigue viva. Sin respuesta a tiempo
    /// se da por perdida.
    pub async fn backend_connected(&self) -> bool {
        tokio::time::timeout(self.call_timeout, self.backend.is_connected(self.guild_id))
            .await
            .unwrap_or(false)
    }

    /// Acepta el fin de pista solo si corresponde a la reproducción viva.
    pub fn finish(&mut self, play_id: u64) -> Option<Track> {
        if play_id != self.play_id {
            return None;
        }
        let finished = self.current.take()?;
        self.transport = Transport::Stopped;
        Some(finished)
    }

    pub fn live_play_id(&self) -> Option<u64> {
        self.current.as_ref().map(|_| self.play_id)
    }

    pub fn is_connected(&self) -> bool {
        self.channel_id.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.transport == Transport::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.transport == Transport::Paused
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel_id
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }
}
