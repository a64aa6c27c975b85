use anyhow::Result;
use serenity::{
    builder::EditInteractionResponse,
    model::{
        application::{CommandDataOptionValue, CommandInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use super::{
    commands::{build_command, Invocation, OptionValue},
    events::InboundEvent,
    JukeboxBot,
};
use crate::ui::embeds;

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // /play puede tardar en la búsqueda; todas las respuestas van diferidas
    command.defer(ctx).await?;

    let invocation = Invocation {
        name: command.data.name.clone(),
        options: extract_options(&command),
        user_id: command.user.id,
        user_voice_channel: get_user_voice_channel(ctx, guild_id, command.user.id),
        text_channel: command.channel_id,
    };

    let embed = match build_command(&invocation) {
        Ok(guild_command) => {
            let event = InboundEvent::Command {
                guild_id,
                command: guild_command,
            };
            match bot.router().dispatch(event).await {
                Some(Ok(reply)) => embeds::reply_embed(&reply),
                Some(Err(e)) => {
                    warn!("Comando /{} falló en guild {}: {}", invocation.name, guild_id, e);
                    embeds::error_embed(&e)
                }
                None => return Ok(()),
            }
        }
        Err(e) => embeds::usage_embed(&e.to_string()),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

fn extract_options(command: &CommandInteraction) -> Vec<(String, OptionValue)> {
    command
        .data
        .options
        .iter()
        .filter_map(|option| {
            let value = match &option.value {
                CommandDataOptionValue::String(text) => OptionValue::Text(text.clone()),
                CommandDataOptionValue::Integer(n) => OptionValue::Integer(*n),
                _ => return None,
            };
            Some((option.name.clone(), value))
        })
        .collect()
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    guild_id.to_guild_cached(&ctx.cache).and_then(|guild| {
        guild
            .voice_states
            .get(&user_id)
            .and_then(|voice_state| voice_state.channel_id)
    })
}
