use anyhow::{Context as _, Result};
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{
        application::CommandOptionType,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};

use super::events::GuildCommand;
use crate::audio::queue::LoopMode;

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        skip_command(),
        pause_command(),
        resume_command(),
        stop_command(),
        queue_command(),
        remove_command(),
        volume_command(),
        nowplaying_command(),
        loop_command(),
        shuffle_command(),
    ]
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL o término de búsqueda")
                .required(true),
        )
}

// Comandos de control

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción, limpia la cola y desconecta")
}

// Comandos de cola

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Elimina una canción de la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "index", "Posición en la cola (desde 1)")
                .required(true),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra información de la canción actual")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Mezcla las canciones en cola")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop")
        .description("Configura el modo de repetición")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "mode", "Modo de repetición")
                .add_string_choice("Desactivar", "off")
                .add_string_choice("Canción", "track")
                .add_string_choice("Cola", "queue")
                .required(true),
        )
}

// Comandos de audio

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Nivel de volumen (0-100)")
                .required(true),
        )
}

/// Valor de una opción de comando, ya extraído de la interacción
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Text(String),
    Integer(i64),
}

/// Datos de una invocación de comando slash independientes de serenity
#[derive(Debug, Clone)]
pub struct Invocation {
    pub name: String,
    pub options: Vec<(String, OptionValue)>,
    pub user_id: UserId,
    pub user_voice_channel: Option<ChannelId>,
    pub text_channel: ChannelId,
}

impl Invocation {
    fn text(&self, key: &str) -> Option<&str> {
        self.options.iter().find_map(|(name, value)| match value {
            OptionValue::Text(text) if name == key => Some(text.as_str()),
            _ => None,
        })
    }

    fn integer(&self, key: &str) -> Option<i64> {
        self.options.iter().find_map(|(name, value)| match value {
            OptionValue::Integer(n) if name == key => Some(*n),
            _ => None,
        })
    }
}

/// Traduce una invocación al comando de dominio
pub fn build_command(invocation: &Invocation) -> Result<GuildCommand> {
    let command = match invocation.name.as_str() {
        "play" => {
            let query = invocation
                .text("query")
                .map(str::trim)
                .filter(|query| !query.is_empty())
                .context("Falta la búsqueda")?;
            GuildCommand::Play {
                requester: invocation.user_id,
                requester_channel: invocation.user_voice_channel,
                query: query.to_string(),
                reply_channel: invocation.text_channel,
            }
        }
        "skip" => GuildCommand::Skip,
        "pause" => GuildCommand::Pause,
        "resume" => GuildCommand::Resume,
        "stop" => GuildCommand::Stop,
        "queue" => GuildCommand::Queue,
        "remove" => GuildCommand::Remove {
            index: invocation.integer("index").context("Falta la posición")?,
        },
        "volume" => GuildCommand::Volume {
            level: invocation.integer("level").context("Falta el nivel de volumen")?,
        },
        "nowplaying" => GuildCommand::NowPlaying,
        "loop" => GuildCommand::Loop {
            mode: invocation.text("mode").context("Falta el modo")?.parse::<LoopMode>()?,
        },
        "shuffle" => GuildCommand::Shuffle,
        other => anyhow::bail!("Comando no reconocido: {}", other),
    };
    Ok(command)
}
