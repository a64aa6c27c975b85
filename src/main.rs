use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use guild_jukebox::{
    audio::{
        session::{SessionManager, SessionSettings},
        songbird_backend::SongbirdBackend,
    },
    bot::{events::EventRouter, ChannelStatusSink, JukeboxBot},
    config::Config,
    sources::YtDlpResolver,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // El health check no necesita token
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let resolver = Arc::new(YtDlpResolver::new(
        config.ytdlp_path.clone(),
        Duration::from_secs(config.search_timeout_secs),
    ));
    if let Err(e) = resolver.verify().await {
        error!("⚠️ {:?}; /play fallará hasta que yt-dlp esté disponible", e);
    }

    // Backend de voz y gestor de sesiones
    let songbird = Songbird::serenity();
    let (events_tx, events_rx) = flume::unbounded();
    let backend = Arc::new(SongbirdBackend::new(songbird.clone(), events_tx));
    let status = Arc::new(ChannelStatusSink::new(Arc::new(Http::new(&config.discord_token))));
    let sessions = SessionManager::new(backend, status, SessionSettings::from(config.as_ref()));

    let router = Arc::new(EventRouter::new(sessions.clone(), resolver));
    tokio::spawn(router.clone().run_backend_events(events_rx));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = JukeboxBot::new(config.clone(), router);
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando sesiones...");
        sessions.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    dotenvy::dotenv().ok();
    let binary = std::env::var("YTDLP_PATH").unwrap_or_else(|_| Config::default().ytdlp_path);

    YtDlpResolver::new(binary, Duration::from_secs(10)).verify().await?;
    println!("OK");
    Ok(())
}
