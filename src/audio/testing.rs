//! Dobles de prueba compartidos por los tests de sesión y del router.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::Notify;

use super::{
    error::PlayerError,
    player::{BackendEvent, FinishReason, VoiceBackend},
    session::{StatusNotice, StatusSink},
    track::Track,
};

/// Backend en memoria que registra lo que se le pide
pub struct FakeBackend {
    connected: Mutex<HashMap<GuildId, ChannelId>>,
    playing: Mutex<HashMap<GuildId, u64>>,
    started: Mutex<Vec<String>>,
    broken: Mutex<HashSet<String>>,
    refuse_connect: Mutex<bool>,
    connect_gate: Mutex<Option<(GuildId, Arc<Notify>)>>,
    events: flume::Sender<BackendEvent>,
}

impl FakeBackend {
    pub fn new(events: flume::Sender<BackendEvent>) -> Self {
        Self {
            connected: Mutex::new(HashMap::new()),
            playing: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            broken: Mutex::new(HashSet::new()),
            refuse_connect: Mutex::new(false),
            connect_gate: Mutex::new(None),
            events,
        }
    }

    /// Las pistas con este título fallan al cargar
    pub fn break_track(&self, title: &str) {
        self.broken.lock().insert(title.to_string());
    }

    pub fn refuse_connect(&self) {
        *self.refuse_connect.lock() = true;
    }

    /// `connect` para `guild_id` espera a que se notifique `gate`
    pub fn gate_connect(&self, guild_id: GuildId, gate: Arc<Notify>) {
        *self.connect_gate.lock() = Some((guild_id, gate));
    }

    pub fn channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.connected.lock().get(&guild_id).copied()
    }

    /// Títulos arrancados, en orden
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    /// Simula que Discord sacó al bot del canal
    pub fn drop_call(&self, guild_id: GuildId) {
        self.playing.lock().remove(&guild_id);
        self.connected.lock().remove(&guild_id);
    }

    /// Simula que la pista actual terminó sola
    pub fn end_current(&self, guild_id: GuildId) -> u64 {
        self.playing
            .lock()
            .remove(&guild_id)
            .expect("no track playing in fake backend")
    }
}

#[async_trait]
impl VoiceBackend for FakeBackend {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), PlayerError> {
        let gate = self.connect_gate.lock().clone();
        if let Some((gated, notify)) = gate {
            if gated == guild_id {
                notify.notified().await;
            }
        }
        tokio::task::yield_now().await;
        if *self.refuse_connect.lock() {
            return Err(PlayerError::ConnectFailed("sin permisos".into()));
        }
        self.connected.lock().insert(guild_id, channel_id);
        Ok(())
    }

    async fn move_to(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), PlayerError> {
        self.connected.lock().insert(guild_id, channel_id);
        Ok(())
    }

    async fn play(&self, guild_id: GuildId, play_id: u64, track: Track, _volume: u8) -> Result<(), PlayerError> {
        if self.broken.lock().contains(track.title()) {
            return Err(PlayerError::LoadFailed(track.title().to_string()));
        }
        self.playing.lock().insert(guild_id, play_id);
        self.started.lock().push(track.title().to_string());
        Ok(())
    }

    async fn stop(&self, guild_id: GuildId) -> Result<bool, PlayerError> {
        let stopped = self.playing.lock().remove(&guild_id);
        if let Some(play_id) = stopped {
            let _ = self.events.send(BackendEvent::TrackFinished {
                guild_id,
                play_id,
                reason: FinishReason::Completed,
            });
        }
        Ok(stopped.is_some())
    }

    async fn pause(&self, _guild_id: GuildId) -> Result<(), PlayerError> {
        Ok(())
    }

    async fn resume(&self, _guild_id: GuildId) -> Result<(), PlayerError> {
        Ok(())
    }

    async fn set_volume(&self, _guild_id: GuildId, _volume: u8) -> Result<(), PlayerError> {
        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        tokio::task::yield_now().await;
        self.playing.lock().remove(&guild_id);
        self.connected.lock().remove(&guild_id);
        Ok(())
    }

    async fn is_connected(&self, guild_id: GuildId) -> bool {
        self.connected.lock().contains_key(&guild_id)
    }
}

/// Sink que guarda los avisos en memoria
#[derive(Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<(ChannelId, StatusNotice)>>,
}

impl RecordingSink {
    /// Vacía y devuelve los avisos recibidos
    pub fn taken(&self) -> Vec<StatusNotice> {
        self.notices.lock().drain(..).map(|(_, notice)| notice).collect()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn post(&self, channel_id: ChannelId, notice: StatusNotice) {
        self.notices.lock().push((channel_id, notice));
    }
}
