//! Per-guild playback sessions.
//!
//! [`SessionManager`] keeps one *lane* per guild: a fair async mutex around an
//! optional [`Session`]. Every command, backend event, presence change and
//! timer firing for a guild runs inside that lane, so they are linearized in
//! arrival order; lanes of different guilds never block each other.
//!
//! Backend calls are awaited inside the lane but are individually bounded by
//! the configured backend timeout. Status notices produced while the lane is
//! held are posted after it is released.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    error::PlayerError,
    player::{FinishReason, PlaybackController, VoiceBackend},
    queue::{GuildQueue, LoopMode},
    timer::{InactivityTimer, TimerReason},
    track::Track,
};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Absent,
    /// Solo existe dentro de `play` mientras se espera el join
    Connecting,
    Idle,
    Playing,
    Paused,
}

/// Cambio de ocupación del canal del bot, ya traducido por el router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    BotAlone,
    Accompanied,
}

/// Vista de solo lectura de la cola de una guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueView {
    pub state: PlaybackState,
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub loop_mode: LoopMode,
    pub volume: u8,
}

/// Resultado de un comando, que el adaptador de chat formatea.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    NowPlaying(Track),
    Queued { track: Track, position: usize },
    Skipped(Track),
    Paused,
    Resumed,
    Stopped,
    Removed { index: i64, track: Track },
    Queue(QueueView),
    Volume(u8),
    Current(Option<Track>),
    Loop(LoopMode),
    Shuffled(usize),
}

/// Avisos asíncronos para el último canal de texto usado en la guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusNotice {
    NowPlaying(Track),
    TrackFailed { title: String, reason: String },
    InactivityDisconnect,
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn post(&self, channel_id: ChannelId, notice: StatusNotice);
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub inactivity_timeout: Duration,
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub backend_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(300),
            default_volume: 50,
            max_queue_size: 1000,
            backend_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(config.inactivity_timeout_secs),
            default_volume: config.default_volume,
            max_queue_size: config.max_queue_size,
            backend_timeout: Duration::from_secs(config.backend_timeout_secs),
        }
    }
}

/// Cola + timer + controlador de una guild.
struct Session {
    guild_id: GuildId,
    queue: GuildQueue,
    player: PlaybackController,
    timer: InactivityTimer,
    status_channel: Option<ChannelId>,
    loop_mode: LoopMode,
    alone: bool,
    skip_requested: bool,
}

impl Session {
    fn new(guild_id: GuildId, player: PlaybackController, max_queue_size: usize) -> Self {
        Self {
            guild_id,
            queue: GuildQueue::new(max_queue_size),
            player,
            timer: InactivityTimer::new(),
            status_channel: None,
            loop_mode: LoopMode::Off,
            alone: false,
            skip_requested: false,
        }
    }

    fn state(&self) -> PlaybackState {
        if self.player.is_paused() {
            PlaybackState::Paused
        } else if self.player.is_playing() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }

    fn view(&self) -> QueueView {
        QueueView {
            state: self.state(),
            current: self.player.current().cloned(),
            upcoming: self.queue.snapshot(),
            loop_mode: self.loop_mode,
            volume: self.player.volume(),
        }
    }

    fn notify(&self, outbox: &mut Outbox, notice: StatusNotice) {
        match self.status_channel {
            Some(channel_id) => outbox.push((channel_id, notice)),
            None => debug!("Sin canal de estado en guild {}: {:?}", self.guild_id, notice),
        }
    }

    fn notify_failures(&self, outbox: &mut Outbox, failures: Vec<(Track, PlayerError)>) {
        for (track, err) in failures {
            self.notify(
                outbox,
                StatusNotice::TrackFailed {
                    title: track.title().to_string(),
                    reason: err.to_string(),
                },
            );
        }
    }
}

type Lane = Arc<Mutex<Option<Session>>>;
type Outbox = Vec<(ChannelId, StatusNotice)>;

struct AdvanceOutcome {
    started: Option<Track>,
    failures: Vec<(Track, PlayerError)>,
}

pub struct SessionManager {
    lanes: DashMap<GuildId, Lane>,
    backend: Arc<dyn VoiceBackend>,
    status: Arc<dyn StatusSink>,
    settings: SessionSettings,
    this: Weak<SessionManager>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn VoiceBackend>,
        status: Arc<dyn StatusSink>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            lanes: DashMap::new(),
            backend,
            status,
            settings,
            this: this.clone(),
        })
    }

    fn lane(&self, guild_id: GuildId) -> Lane {
        self.lanes.entry(guild_id).or_default().value().clone()
    }

    fn existing_lane(&self, guild_id: GuildId) -> Option<Lane> {
        self.lanes.get(&guild_id).map(|lane| lane.value().clone())
    }

    async fn flush(&self, outbox: Outbox) {
        for (channel_id, notice) in outbox {
            self.status.post(channel_id, notice).await;
        }
    }

    /// Encola `track` y arranca la reproducción si no hay nada sonando.
    pub async fn play(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        reply_channel: ChannelId,
        track: Track,
    ) -> Result<CommandReply, PlayerError> {
        let lane = self.lane(guild_id);
        let mut outbox = Outbox::new();
        let result = {
            let mut slot = lane.lock().await;
            self.play_locked(&mut slot, guild_id, voice_channel, reply_channel, track, &mut outbox)
                .await
        };
        self.flush(outbox).await;
        result
    }

    async fn play_locked(
        &self,
        slot: &mut Option<Session>,
        guild_id: GuildId,
        voice_channel: ChannelId,
        reply_channel: ChannelId,
        track: Track,
        outbox: &mut Outbox,
    ) -> Result<CommandReply, PlayerError> {
        if slot.is_none() {
            debug!("🔗 {:?}: guild {} → canal {}", PlaybackState::Connecting, guild_id, voice_channel);
            let mut player = PlaybackController::new(
                guild_id,
                self.backend.clone(),
                self.settings.default_volume,
                self.settings.backend_timeout,
            );
            player.connect(voice_channel).await?;
            *slot = Some(Session::new(guild_id, player, self.settings.max_queue_size));
            info!("🆕 Sesión creada para guild {}", guild_id);
        }
        let Some(session) = slot.as_mut() else {
            return Err(PlayerError::NotConnected);
        };

        session.status_channel = Some(reply_channel);

        if session.player.channel_id() != Some(voice_channel) {
            session.player.move_to(voice_channel).await?;
            session.alone = false;
        }

        let position = session.queue.enqueue(track.clone())?;

        if session.timer.cancel() {
            debug!("⏲️ Actividad nueva en guild {}, timer cancelado", guild_id);
        }

        if session.player.is_playing() || session.player.is_paused() {
            return Ok(CommandReply::Queued { track, position });
        }

        let AdvanceOutcome {
            started,
            mut failures,
        } = self.advance(session).await;

        match started {
            Some(now_playing) => {
                session.notify_failures(outbox, failures);
                Ok(CommandReply::NowPlaying(now_playing))
            }
            None => {
                self.arm_timer(session, TimerReason::Idle);
                let last = failures.pop();
                session.notify_failures(outbox, failures);
                Err(last.map(|(_, err)| err).unwrap_or(PlayerError::NothingPlaying))
            }
        }
    }

    /// Saca pistas del frente hasta que una arranque. El número de intentos
    /// se fija con la longitud de la cola al empezar, así termina siempre.
    async fn advance(&self, session: &mut Session) -> AdvanceOutcome {
        let mut attempts = session.queue.len();
        let mut failures = Vec::new();

        while attempts > 0 {
            attempts -= 1;
            let Some(track) = session.queue.dequeue() else {
                break;
            };

            match session.player.play(track.clone()).await {
                Ok(()) => {
                    session.timer.cancel();
                    return AdvanceOutcome {
                        started: Some(track),
                        failures,
                    };
                }
                Err(err) => {
                    warn!(
                        "❌ No se pudo reproducir {} en guild {}: {}",
                        track.title(),
                        session.guild_id,
                        err
                    );
                    failures.push((track, err));
                }
            }
        }

        AdvanceOutcome {
            started: None,
            failures,
        }
    }

    pub async fn skip(&self, guild_id: GuildId) -> Result<CommandReply, PlayerError> {
        let lane = self.existing_lane(guild_id).ok_or(PlayerError::NothingPlaying)?;
        let mut slot = lane.lock().await;
        let session = slot
            .as_mut()
            .filter(|session| session.state() == PlaybackState::Playing)
            .ok_or(PlayerError::NothingPlaying)?;
        let current = session
            .player
            .current()
            .cloned()
            .ok_or(PlayerError::NothingPlaying)?;

        // El avance real llega con el TrackFinished que provoca este stop
        if session.player.stop().await? {
            session.skip_requested = true;
        } else {
            debug!("La pista ya había terminado en guild {}, su fin sigue en camino", guild_id);
        }
        info!("⏭️ Saltando {} en guild {}", current.title(), guild_id);
        Ok(CommandReply::Skipped(current))
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<CommandReply, PlayerError> {
        let lane = self.existing_lane(guild_id).ok_or(PlayerError::NotConnected)?;
        let mut slot = lane.lock().await;
        let session = slot.as_mut().ok_or(PlayerError::NotConnected)?;

        match session.state() {
            PlaybackState::Playing => {
                session.player.pause().await?;
                Ok(CommandReply::Paused)
            }
            PlaybackState::Paused => Err(PlayerError::InvalidState("la reproducción ya está en pausa")),
            _ => Err(PlayerError::InvalidState("no hay nada sonando para pausar")),
        }
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<CommandReply, PlayerError> {
        let lane = self.existing_lane(guild_id).ok_or(PlayerError::NotConnected)?;
        let mut slot = lane.lock().await;
        let session = slot.as_mut().ok_or(PlayerError::NotConnected)?;

        match session.state() {
            PlaybackState::Paused => {
                session.player.resume().await?;
                Ok(CommandReply::Resumed)
            }
            PlaybackState::Playing => Err(PlayerError::NothingPaused),
            _ => Err(PlayerError::InvalidState("no hay nada que reanudar")),
        }
    }

    /// Limpia la cola, detiene, desconecta y descarta la sesión.
    pub async fn stop(&self, guild_id: GuildId) -> Result<CommandReply, PlayerError> {
        let lane = self.existing_lane(guild_id).ok_or(PlayerError::NotConnected)?;
        let mut slot = lane.lock().await;
        let session = slot.take().ok_or(PlayerError::NotConnected)?;
        self.teardown(session).await;
        Ok(CommandReply::Stopped)
    }

    /// El bot salió de `left_channel` por fuera de nuestros comandos
    /// (expulsado, etc.). Un aviso tardío de una salida anterior no toca la
    /// sesión actual: el canal debe coincidir y el backend no debe tener
    /// llamada activa.
    pub async fn release(&self, guild_id: GuildId, left_channel: Option<ChannelId>) {
        let Some(lane) = self.existing_lane(guild_id) else {
            return;
        };
        let mut slot = lane.lock().await;
        let Some(session) = slot.as_ref() else {
            return;
        };

        if left_channel.is_some() && left_channel != session.player.channel_id() {
            debug!("Salida obsoleta de {:?} ignorada en guild {}", left_channel, guild_id);
            return;
        }
        if session.player.backend_connected().await {
            debug!("La llamada sigue activa en guild {}, salida obsoleta ignorada", guild_id);
            return;
        }

        if let Some(session) = slot.take() {
            info!("🔌 Bot desconectado externamente en guild {}", guild_id);
            self.teardown(session).await;
        }
    }

    async fn teardown(&self, mut session: Session) {
        session.queue.clear();
        session.timer.cancel();
        if session.player.current().is_some() {
            if let Err(e) = session.player.stop().await {
                warn!("Error al detener reproducción en guild {}: {}", session.guild_id, e);
            }
        }
        session.player.disconnect().await;
        info!("⏹️ Sesión cerrada en guild {}", session.guild_id);
    }

    pub async fn remove(&self, guild_id: GuildId, index: i64) -> Result<CommandReply, PlayerError> {
        let lane = self.existing_lane(guild_id).ok_or(PlayerError::NotConnected)?;
        let mut slot = lane.lock().await;
        let session = slot.as_mut().ok_or(PlayerError::NotConnected)?;
        let track = session.queue.remove_at(index)?;
        Ok(CommandReply::Removed { index, track })
    }

    pub async fn queue(&self, guild_id: GuildId) -> CommandReply {
        CommandReply::Queue(self.view(guild_id).await)
    }

    pub async fn view(&self, guild_id: GuildId) -> QueueView {
        let absent = QueueView {
            state: PlaybackState::Absent,
            current: None,
            upcoming: Vec::new(),
            loop_mode: LoopMode::Off,
            volume: self.settings.default_volume,
        };
        let Some(lane) = self.existing_lane(guild_id) else {
            return absent;
        };
        let slot = lane.lock().await;
        slot.as_ref().map(Session::view).unwrap_or(absent)
    }

    pub async fn volume(&self, guild_id: GuildId, level: i64) -> Result<CommandReply, PlayerError> {
        if !(0..=100).contains(&level) {
            return Err(PlayerError::InvalidVolume(level));
        }
        let lane = self.existing_lane(guild_id).ok_or(PlayerError::NotConnected)?;
        let mut slot = lane.lock().await;
        let session = slot.as_mut().ok_or(PlayerError::NotConnected)?;
        let volume = session.player.set_volume(level).await?;
        Ok(CommandReply::Volume(volume))
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> CommandReply {
        CommandReply::Current(self.view(guild_id).await.current)
    }

    pub async fn set_loop(&self, guild_id: GuildId, mode: LoopMode) -> Result<CommandReply, PlayerError> {
        let lane = self.existing_lane(guild_id).ok_or(PlayerError::NotConnected)?;
        let mut slot = lane.lock().await;
        let session = slot.as_mut().ok_or(PlayerError::NotConnected)?;
        session.loop_mode = mode;
        info!("🔁 Modo de repetición en guild {}: {:?}", guild_id, mode);
        Ok(CommandReply::Loop(mode))
    }

    pub async fn shuffle(&self, guild_id: GuildId) -> Result<CommandReply, PlayerError> {
        let lane = self.existing_lane(guild_id).ok_or(PlayerError::NotConnected)?;
        let mut slot = lane.lock().await;
        let session = slot.as_mut().ok_or(PlayerError::NotConnected)?;
        Ok(CommandReply::Shuffled(session.queue.shuffle()))
    }

    /// Fin de pista informado por el backend.
    pub async fn on_track_finished(&self, guild_id: GuildId, play_id: u64, reason: FinishReason) {
        let Some(lane) = self.existing_lane(guild_id) else {
            return;
        };
        let mut outbox = Outbox::new();
        {
            let mut slot = lane.lock().await;
            match slot.as_mut() {
                Some(session) => self.finish_locked(session, play_id, reason, &mut outbox).await,
                None => debug!("Fin de pista sin sesión en guild {}", guild_id),
            }
        }
        self.flush(outbox).await;
    }

    /// Una caída del driver de voz cuenta como fin de pista fallido.
    pub async fn on_connection_lost(&self, guild_id: GuildId) {
        let Some(lane) = self.existing_lane(guild_id) else {
            return;
        };
        let mut outbox = Outbox::new();
        {
            let mut slot = lane.lock().await;
            if let Some(session) = slot.as_mut() {
                if let Some(play_id) = session.player.live_play_id() {
                    warn!("📡 Conexión de voz perdida en guild {}", guild_id);
                    let reason = FinishReason::Failed("se perdió la conexión de voz".into());
                    self.finish_locked(session, play_id, reason, &mut outbox).await;
                }
            }
        }
        self.flush(outbox).await;
    }

    async fn finish_locked(
        &self,
        session: &mut Session,
        play_id: u64,
        reason: FinishReason,
        outbox: &mut Outbox,
    ) {
        let Some(finished) = session.player.finish(play_id) else {
            debug!("Fin de pista obsoleto ignorado (play {}) en guild {}", play_id, session.guild_id);
            return;
        };
        let skipped = std::mem::take(&mut session.skip_requested);

        match &reason {
            FinishReason::Failed(cause) => {
                error!("❌ Error en track {} en guild {}: {}", finished.title(), session.guild_id, cause);
                session.notify(
                    outbox,
                    StatusNotice::TrackFailed {
                        title: finished.title().to_string(),
                        reason: cause.clone(),
                    },
                );
            }
            FinishReason::Completed => match session.loop_mode {
                LoopMode::Track if !skipped => {
                    info!("🔂 Repitiendo track: {}", finished.title());
                    session.queue.insert_front(finished);
                }
                LoopMode::Queue => {
                    info!("🔁 Track agregado al final por loop de cola: {}", finished.title());
                    session.queue.requeue_back(finished);
                }
                _ => {}
            },
        }

        if session.queue.is_empty() {
            info!("📭 Cola vacía en guild {}, esperando actividad", session.guild_id);
            self.arm_timer(session, TimerReason::Idle);
            return;
        }

        let AdvanceOutcome { started, failures } = self.advance(session).await;
        session.notify_failures(outbox, failures);
        match started {
            Some(track) => session.notify(outbox, StatusNotice::NowPlaying(track)),
            None => self.arm_timer(session, TimerReason::Idle),
        }
    }

    /// Cambio de ocupación del canal `channel_id` de la guild.
    pub async fn on_presence_change(&self, guild_id: GuildId, channel_id: ChannelId, change: PresenceChange) {
        let Some(lane) = self.existing_lane(guild_id) else {
            return;
        };
        let mut slot = lane.lock().await;
        let Some(session) = slot.as_mut() else {
            return;
        };
        if session.player.channel_id() != Some(channel_id) {
            return;
        }

        match change {
            PresenceChange::BotAlone => {
                if !session.alone {
                    session.alone = true;
                    info!("🚪 Programando auto-desconexión por inactividad en guild {}", guild_id);
                    self.arm_timer(session, TimerReason::Alone);
                }
            }
            PresenceChange::Accompanied => {
                session.alone = false;
                if session.timer.cancel() {
                    info!("👥 Alguien se unió al canal en guild {}, auto-desconexión cancelada", guild_id);
                }
            }
        }
    }

    fn arm_timer(&self, session: &mut Session, reason: TimerReason) {
        let manager = self.this.clone();
        let guild_id = session.guild_id;
        session
            .timer
            .arm(self.settings.inactivity_timeout, reason, move |generation| async move {
                if let Some(manager) = manager.upgrade() {
                    manager.on_inactivity_timeout(guild_id, generation).await;
                }
            });
    }

    async fn on_inactivity_timeout(&self, guild_id: GuildId, generation: u64) {
        let Some(lane) = self.existing_lane(guild_id) else {
            return;
        };
        let mut outbox = Outbox::new();
        {
            let mut slot = lane.lock().await;
            let Some(session) = slot.as_mut() else {
                return;
            };
            let Some(reason) = session.timer.claim(generation) else {
                debug!("⏲️ Timer obsoleto (generación {}) en guild {}", generation, guild_id);
                return;
            };

            let still_inactive = session.player.is_connected()
                && match reason {
                    TimerReason::Idle => {
                        session.state() == PlaybackState::Idle && session.queue.is_empty()
                    }
                    TimerReason::Alone => session.alone,
                };
            if !still_inactive {
                debug!("⏲️ Hubo actividad en guild {}, no se desconecta", guild_id);
                return;
            }

            let status_channel = session.status_channel;
            if let Some(session) = slot.take() {
                info!("💤 Desconectando por inactividad en guild {}", guild_id);
                self.teardown(session).await;
            }
            if let Some(channel_id) = status_channel {
                outbox.push((channel_id, StatusNotice::InactivityDisconnect));
            }
        }
        self.flush(outbox).await;
    }

    pub async fn state(&self, guild_id: GuildId) -> PlaybackState {
        self.view(guild_id).await.state
    }

    pub async fn has_session(&self, guild_id: GuildId) -> bool {
        self.state(guild_id).await != PlaybackState::Absent
    }

    /// Cierra todas las sesiones vivas (apagado ordenado).
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.lanes.iter().map(|lane| *lane.key()).collect();
        let stopped = join_all(guilds.into_iter().map(|guild_id| self.stop(guild_id)))
            .await
            .into_iter()
            .filter(Result::is_ok)
            .count();
        info!("🛑 {} sesiones cerradas por apagado", stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        player::BackendEvent,
        testing::{FakeBackend, RecordingSink},
    };
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(1);
    const VOICE: ChannelId = ChannelId::new(10);
    const OTHER_VOICE: ChannelId = ChannelId::new(20);
    const TEXT: ChannelId = ChannelId::new(99);

    struct Harness {
        manager: Arc<SessionManager>,
        backend: Arc<FakeBackend>,
        sink: Arc<RecordingSink>,
        events: flume::Receiver<BackendEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = flume::unbounded();
            let backend = Arc::new(FakeBackend::new(tx));
            let sink = Arc::new(RecordingSink::default());
            let manager = SessionManager::new(backend.clone(), sink.clone(), SessionSettings::default());
            Self {
                manager,
                backend,
                sink,
                events: rx,
            }
        }

        async fn play(&self, title: &str) -> Result<CommandReply, PlayerError> {
            self.manager.play(GUILD, VOICE, TEXT, track(title)).await
        }

        /// Termina la pista actual como lo haría el backend
        async fn finish_current(&self) {
            let play_id = self.backend.end_current(GUILD);
            self.manager
                .on_track_finished(GUILD, play_id, FinishReason::Completed)
                .await;
        }

        /// Entrega al gestor los eventos pendientes del backend
        async fn pump(&self) -> usize {
            let mut delivered = 0;
            while let Ok(event) = self.events.try_recv() {
                if let BackendEvent::TrackFinished { guild_id, play_id, reason } = event {
                    self.manager.on_track_finished(guild_id, play_id, reason).await;
                    delivered += 1;
                }
            }
            delivered
        }

        async fn upcoming(&self) -> Vec<String> {
            self.manager
                .view(GUILD)
                .await
                .upcoming
                .iter()
                .map(|t| t.title().to_string())
                .collect()
        }

        async fn timer_armed(&self) -> bool {
            let lane = self.manager.existing_lane(GUILD).expect("lane");
            let slot = lane.lock().await;
            slot.as_ref().map(|s| s.timer.is_armed()).unwrap_or(false)
        }
    }

    fn track(title: &str) -> Track {
        Track::new(title, "artist", format!("https://example.com/{title}"))
    }

    #[tokio::test]
    async fn first_play_starts_and_later_plays_queue_in_order() {
        let h = Harness::new();

        assert_eq!(h.play("A").await, Ok(CommandReply::NowPlaying(track("A"))));
        assert_eq!(
            h.play("B").await,
            Ok(CommandReply::Queued { track: track("B"), position: 1 })
        );
        assert_eq!(
            h.play("C").await,
            Ok(CommandReply::Queued { track: track("C"), position: 2 })
        );

        assert_eq!(h.upcoming().await, vec!["B", "C"]);
        assert_eq!(h.backend.started(), vec!["A"]);
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn end_to_end_play_queue_advance_idle_stop() {
        let h = Harness::new();

        assert_eq!(h.play("track-A").await, Ok(CommandReply::NowPlaying(track("track-A"))));
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);

        assert!(matches!(h.play("track-B").await, Ok(CommandReply::Queued { .. })));
        assert_eq!(h.upcoming().await, vec!["track-B"]);

        h.finish_current().await;
        assert!(h.upcoming().await.is_empty());
        assert_eq!(h.backend.started(), vec!["track-A", "track-B"]);
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);
        assert_eq!(h.sink.taken(), vec![StatusNotice::NowPlaying(track("track-B"))]);

        h.finish_current().await;
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Idle);
        assert!(h.timer_armed().await);

        assert_eq!(h.manager.stop(GUILD).await, Ok(CommandReply::Stopped));
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Absent);
        assert!(!h.manager.has_session(GUILD).await);
        assert!(!h.timer_armed().await);
        assert_eq!(h.backend.channel(GUILD), None);
    }

    #[tokio::test]
    async fn skip_drives_exactly_one_advance() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.play("B").await.unwrap();

        assert_eq!(h.manager.skip(GUILD).await, Ok(CommandReply::Skipped(track("A"))));
        assert_eq!(h.pump().await, 1);
        assert_eq!(h.pump().await, 0);

        assert_eq!(h.backend.started(), vec!["A", "B"]);
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn skip_without_playback_is_rejected_without_mutation() {
        let h = Harness::new();
        assert_eq!(h.manager.skip(GUILD).await, Err(PlayerError::NothingPlaying));

        h.play("A").await.unwrap();
        h.play("B").await.unwrap();
        h.manager.pause(GUILD).await.unwrap();

        assert_eq!(h.manager.skip(GUILD).await, Err(PlayerError::NothingPlaying));
        assert_eq!(h.pump().await, 0);
        assert_eq!(h.upcoming().await, vec!["B"]);
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Paused);
    }

    #[tokio::test]
    async fn remove_out_of_range_leaves_queue_untouched() {
        let h = Harness::new();
        for title in ["now", "a", "b", "c"] {
            h.play(title).await.unwrap();
        }
        assert_eq!(h.upcoming().await, vec!["a", "b", "c"]);

        assert_eq!(
            h.manager.remove(GUILD, 0).await,
            Err(PlayerError::IndexOutOfRange { index: 0, len: 3 })
        );
        assert_eq!(
            h.manager.remove(GUILD, 4).await,
            Err(PlayerError::IndexOutOfRange { index: 4, len: 3 })
        );
        assert_eq!(h.upcoming().await, vec!["a", "b", "c"]);

        assert_eq!(
            h.manager.remove(GUILD, 2).await,
            Ok(CommandReply::Removed { index: 2, track: track("b") })
        );
        assert_eq!(h.upcoming().await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn unplayable_tracks_are_skipped_with_bounded_retries() {
        let h = Harness::new();
        h.backend.break_track("bad-1");
        h.backend.break_track("bad-2");

        for title in ["ok-1", "bad-1", "bad-2", "ok-2"] {
            h.play(title).await.unwrap();
        }

        h.finish_current().await;
        assert_eq!(h.backend.started(), vec!["ok-1", "ok-2"]);
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);

        let notices = h.sink.taken();
        assert_eq!(notices.len(), 3);
        assert!(matches!(&notices[0], StatusNotice::TrackFailed { title, .. } if title == "bad-1"));
        assert!(matches!(&notices[1], StatusNotice::TrackFailed { title, .. } if title == "bad-2"));
        assert_eq!(notices[2], StatusNotice::NowPlaying(track("ok-2")));
    }

    #[tokio::test]
    async fn queue_of_only_bad_tracks_ends_idle() {
        let h = Harness::new();
        h.backend.break_track("bad-1");
        h.backend.break_track("bad-2");

        h.play("ok").await.unwrap();
        h.play("bad-1").await.unwrap();
        h.play("bad-2").await.unwrap();

        h.finish_current().await;
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Idle);
        assert!(h.upcoming().await.is_empty());
        assert!(h.timer_armed().await);
        assert_eq!(h.sink.taken().len(), 2);
    }

    #[tokio::test]
    async fn failed_first_play_reports_error_and_keeps_session_idle() {
        let h = Harness::new();
        h.backend.break_track("bad");

        assert_eq!(h.play("bad").await, Err(PlayerError::LoadFailed("bad".into())));
        assert!(h.manager.has_session(GUILD).await);
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Idle);
        assert!(h.timer_armed().await);
        assert!(h.sink.taken().is_empty());
    }

    #[tokio::test]
    async fn connect_failure_stays_absent() {
        let h = Harness::new();
        h.backend.refuse_connect();

        assert_eq!(
            h.play("A").await,
            Err(PlayerError::ConnectFailed("sin permisos".into()))
        );
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Absent);
        assert_eq!(h.backend.channel(GUILD), None);
    }

    #[tokio::test]
    async fn play_from_another_channel_moves_the_bot() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        assert_eq!(h.backend.channel(GUILD), Some(VOICE));

        h.manager
            .play(GUILD, OTHER_VOICE, TEXT, track("B"))
            .await
            .unwrap();
        assert_eq!(h.backend.channel(GUILD), Some(OTHER_VOICE));
    }

    #[tokio::test]
    async fn late_release_from_a_previous_call_keeps_the_new_session() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.manager.stop(GUILD).await.unwrap();
        assert_eq!(h.play("B").await, Ok(CommandReply::NowPlaying(track("B"))));

        // Discord avisa ahora de la salida provocada por el stop
        h.manager.release(GUILD, Some(VOICE)).await;
        h.manager.release(GUILD, Some(OTHER_VOICE)).await;

        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);
        assert_eq!(h.backend.channel(GUILD), Some(VOICE));
    }

    #[tokio::test]
    async fn release_after_being_kicked_discards_the_session() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.play("B").await.unwrap();

        h.backend.drop_call(GUILD);
        h.manager.release(GUILD, Some(VOICE)).await;

        assert!(!h.manager.has_session(GUILD).await);
        assert!(!h.timer_armed().await);
    }

    #[tokio::test]
    async fn pause_and_resume_follow_the_state_machine() {
        let h = Harness::new();
        assert_eq!(h.manager.pause(GUILD).await, Err(PlayerError::NotConnected));

        h.play("A").await.unwrap();
        assert_eq!(h.manager.resume(GUILD).await, Err(PlayerError::NothingPaused));
        assert_eq!(h.manager.pause(GUILD).await, Ok(CommandReply::Paused));
        assert!(matches!(h.manager.pause(GUILD).await, Err(PlayerError::InvalidState(_))));
        assert_eq!(h.manager.resume(GUILD).await, Ok(CommandReply::Resumed));

        h.finish_current().await;
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Idle);
        assert!(matches!(h.manager.pause(GUILD).await, Err(PlayerError::InvalidState(_))));
        assert!(matches!(h.manager.resume(GUILD).await, Err(PlayerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn play_while_paused_only_queues() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.manager.pause(GUILD).await.unwrap();

        assert!(matches!(h.play("B").await, Ok(CommandReply::Queued { position: 1, .. })));
        assert_eq!(h.backend.started(), vec!["A"]);
    }

    #[tokio::test]
    async fn stop_without_session_reports_not_connected() {
        let h = Harness::new();
        assert_eq!(h.manager.stop(GUILD).await, Err(PlayerError::NotConnected));
    }

    #[tokio::test]
    async fn volume_is_validated_before_anything_else() {
        let h = Harness::new();
        assert_eq!(h.manager.volume(GUILD, 150).await, Err(PlayerError::InvalidVolume(150)));
        assert_eq!(h.manager.volume(GUILD, 40).await, Err(PlayerError::NotConnected));

        h.play("A").await.unwrap();
        assert_eq!(h.manager.volume(GUILD, 40).await, Ok(CommandReply::Volume(40)));
        assert_eq!(h.manager.view(GUILD).await.volume, 40);
    }

    #[tokio::test]
    async fn stale_finish_events_are_ignored() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.play("B").await.unwrap();

        h.manager
            .on_track_finished(GUILD, u64::MAX, FinishReason::Completed)
            .await;
        assert_eq!(h.backend.started(), vec!["A"]);
        assert_eq!(h.upcoming().await, vec!["B"]);
    }

    #[tokio::test]
    async fn failed_finish_is_reported_and_advances() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.play("B").await.unwrap();

        let play_id = h.backend.end_current(GUILD);
        h.manager
            .on_track_finished(GUILD, play_id, FinishReason::Failed("403".into()))
            .await;

        assert_eq!(
            h.sink.taken(),
            vec![
                StatusNotice::TrackFailed { title: "A".into(), reason: "403".into() },
                StatusNotice::NowPlaying(track("B")),
            ]
        );
    }

    #[tokio::test]
    async fn connection_loss_is_an_implicit_failed_finish() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.play("B").await.unwrap();

        h.manager.on_connection_lost(GUILD).await;
        assert_eq!(h.backend.started(), vec!["A", "B"]);
        assert!(matches!(&h.sink.taken()[0], StatusNotice::TrackFailed { title, .. } if title == "A"));
    }

    #[tokio::test]
    async fn skip_racing_a_natural_end_still_repeats_in_track_loop() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.manager.set_loop(GUILD, LoopMode::Track).await.unwrap();

        // La pista terminó en el backend pero su evento aún no llegó
        let play_id = h.backend.end_current(GUILD);
        assert_eq!(h.manager.skip(GUILD).await, Ok(CommandReply::Skipped(track("A"))));
        assert_eq!(h.pump().await, 0);

        h.manager
            .on_track_finished(GUILD, play_id, FinishReason::Completed)
            .await;
        assert_eq!(h.backend.started(), vec!["A", "A"]);
    }

    #[tokio::test]
    async fn loop_track_repeats_until_skipped() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.play("B").await.unwrap();
        h.manager.set_loop(GUILD, LoopMode::Track).await.unwrap();

        h.finish_current().await;
        assert_eq!(h.backend.started(), vec!["A", "A"]);

        h.manager.skip(GUILD).await.unwrap();
        h.pump().await;
        assert_eq!(h.backend.started(), vec!["A", "A", "B"]);
    }

    #[tokio::test]
    async fn loop_queue_requeues_finished_tracks() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.play("B").await.unwrap();
        h.manager.set_loop(GUILD, LoopMode::Queue).await.unwrap();

        h.finish_current().await;
        assert_eq!(h.upcoming().await, vec!["A"]);
        h.finish_current().await;
        assert_eq!(h.upcoming().await, vec!["B"]);
        assert_eq!(h.backend.started(), vec!["A", "B", "A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_disconnects_after_timeout() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.finish_current().await;
        h.sink.taken();

        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;

        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Absent);
        assert_eq!(h.backend.channel(GUILD), None);
        assert_eq!(h.sink.taken(), vec![StatusNotice::InactivityDisconnect]);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_before_firing_keeps_the_session() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.finish_current().await;
        assert!(h.timer_armed().await);

        tokio::time::sleep(Duration::from_secs(100)).await;
        h.play("B").await.unwrap();
        assert!(!h.timer_armed().await);

        tokio::time::sleep(Duration::from_secs(400)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.backend.channel(GUILD), Some(VOICE));
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_firing_is_a_noop() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.finish_current().await;
        h.play("B").await.unwrap();

        // Un disparo tardío con la generación vieja no puede desconectar
        h.manager.on_inactivity_timeout(GUILD, 1).await;
        h.manager.on_inactivity_timeout(GUILD, u64::MAX).await;
        assert_eq!(h.backend.channel(GUILD), Some(VOICE));
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn alone_timer_rechecks_presence_when_it_fires() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.manager
            .on_presence_change(GUILD, VOICE, PresenceChange::BotAlone)
            .await;
        assert!(h.timer_armed().await);

        // Compañía registrada sin pasar por `Accompanied`: el timer sigue armado
        {
            let lane = h.manager.existing_lane(GUILD).expect("lane");
            let mut slot = lane.lock().await;
            slot.as_mut().expect("session").alone = false;
        }

        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;

        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);
        assert_eq!(h.backend.channel(GUILD), Some(VOICE));
        assert!(!h.timer_armed().await);
        assert!(h.sink.taken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_rechecks_the_queue_when_it_fires() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.finish_current().await;
        assert!(h.timer_armed().await);

        {
            let lane = h.manager.existing_lane(GUILD).expect("lane");
            let mut slot = lane.lock().await;
            slot.as_mut().expect("session").queue.enqueue(track("B")).unwrap();
        }

        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;

        assert!(h.manager.has_session(GUILD).await);
        assert_eq!(h.upcoming().await, vec!["B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_does_not_disarm_the_alone_timer() {
        let (tx, _rx) = flume::unbounded();
        let backend = Arc::new(FakeBackend::new(tx));
        let settings = SessionSettings {
            max_queue_size: 1,
            ..SessionSettings::default()
        };
        let manager = SessionManager::new(backend.clone(), Arc::new(RecordingSink::default()), settings);

        manager.play(GUILD, VOICE, TEXT, track("A")).await.unwrap();
        manager.play(GUILD, VOICE, TEXT, track("B")).await.unwrap();
        manager
            .on_presence_change(GUILD, VOICE, PresenceChange::BotAlone)
            .await;

        assert_eq!(
            manager.play(GUILD, VOICE, TEXT, track("C")).await,
            Err(PlayerError::QueueFull(1))
        );

        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;
        assert!(!manager.has_session(GUILD).await);
        assert_eq!(backend.channel(GUILD), None);
    }

    #[tokio::test(start_paused = true)]
    async fn being_alone_disconnects_even_while_playing() {
        let h = Harness::new();
        h.play("A").await.unwrap();

        h.manager
            .on_presence_change(GUILD, VOICE, PresenceChange::BotAlone)
            .await;
        assert!(h.timer_armed().await);

        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Absent);
        assert_eq!(h.backend.channel(GUILD), None);
    }

    #[tokio::test(start_paused = true)]
    async fn company_cancels_the_timer_and_other_channels_are_ignored() {
        let h = Harness::new();
        h.play("A").await.unwrap();

        h.manager
            .on_presence_change(GUILD, OTHER_VOICE, PresenceChange::BotAlone)
            .await;
        assert!(!h.timer_armed().await);

        h.manager
            .on_presence_change(GUILD, VOICE, PresenceChange::BotAlone)
            .await;
        h.manager
            .on_presence_change(GUILD, VOICE, PresenceChange::Accompanied)
            .await;
        assert!(!h.timer_armed().await);

        tokio::time::sleep(Duration::from_secs(400)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.manager.state(GUILD).await, PlaybackState::Playing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_play_and_stop_keep_registry_and_backend_consistent() {
        let h = Harness::new();

        for round in 0..50u64 {
            let guild = GuildId::new(1000 + round);
            let (m1, m2) = (h.manager.clone(), h.manager.clone());
            let play = tokio::spawn(async move { m1.play(guild, VOICE, TEXT, track("A")).await });
            let stop = tokio::spawn(async move { m2.stop(guild).await });
            let _ = play.await.unwrap();
            let _ = stop.await.unwrap();

            assert_eq!(
                h.backend.channel(guild).is_some(),
                h.manager.has_session(guild).await,
                "round {round}"
            );
        }
    }

    #[tokio::test]
    async fn a_slow_guild_does_not_block_another() {
        let h = Harness::new();
        let gate = Arc::new(tokio::sync::Notify::new());
        let slow = GuildId::new(7);
        h.backend.gate_connect(slow, gate.clone());

        let manager = h.manager.clone();
        let pending = tokio::spawn(async move { manager.play(slow, VOICE, TEXT, track("slow")).await });

        let fast = tokio::time::timeout(Duration::from_secs(1), h.play("fast")).await;
        assert!(matches!(fast, Ok(Ok(CommandReply::NowPlaying(_)))));

        gate.notify_one();
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let h = Harness::new();
        h.play("A").await.unwrap();
        h.manager
            .play(GuildId::new(2), VOICE, TEXT, track("B"))
            .await
            .unwrap();

        h.manager.shutdown().await;
        assert!(!h.manager.has_session(GUILD).await);
        assert!(!h.manager.has_session(GuildId::new(2)).await);
        assert_eq!(h.backend.channel(GUILD), None);
    }
}
