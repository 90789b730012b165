use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::application::CommandInteraction,
    model::id::ChannelId,
    prelude::Context,
};
use tracing::{error, info};

use crate::{
    bot::VegaBot,
    ui::embeds,
    voice::coordinator::{CommandContext, CommandError, CommandReply, CommandResult},
};

/// Despacha un comando slash hacia el coordinador y responde
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &VegaBot,
) -> Result<()> {
    info!(
        "📝 Comando /{} usado por {} en {:?}",
        command.data.name, command.user.name, command.guild_id
    );

    let command_ctx = build_context(ctx, &command);
    let coordinator = &bot.coordinator;

    // Los comandos que pueden esperar un handshake difieren la respuesta
    let deferred = matches!(
        command.data.name.as_str(),
        "play" | "connect" | "disconnect"
    );
    if deferred {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
            )
            .await?;
    }

    let result = match command.data.name.as_str() {
        "play" => {
            let query = option_str(&command, "query");
            coordinator.play(&command_ctx, query).await
        }
        "connect" => {
            coordinator
                .connect(&command_ctx, option_channel(&command, "channel"))
                .await
        }
        "disconnect" => coordinator.disconnect(&command_ctx).await,
        "stop" => coordinator.stop(&command_ctx).await,
        "skip" => coordinator.skip(&command_ctx).await,
        "now-playing" => coordinator.now_playing(&command_ctx).await,
        "shuffle" => coordinator.shuffle(&command_ctx).await,
        "repeat" => {
            let status = option_bool(&command, "status").unwrap_or(false);
            coordinator.repeat(&command_ctx, status).await
        }
        "volume" => {
            let level = option_int(&command, "level").unwrap_or(100);
            coordinator.volume(&command_ctx, level).await
        }
        "queue" => coordinator.queue(&command_ctx).await,
        "seek" => {
            // El usuario escribe segundos; el coordinador trabaja en ms
            let seconds = option_int(&command, "position").unwrap_or(0).max(0) as u64;
            coordinator.seek(&command_ctx, seconds * 1000).await
        }
        "pause" => coordinator.pause(&command_ctx).await,
        other => Err(CommandError::User(format!("comando desconocido: {other}"))),
    };

    respond(ctx, &command, deferred, result).await
}

/// Arma el contexto del comando: guild, autor y su canal de voz según la
/// caché del gateway.
fn build_context(ctx: &Context, command: &CommandInteraction) -> CommandContext {
    let user_channel = command.guild_id.and_then(|guild_id| {
        let guild = ctx.cache.guild(guild_id)?;
        guild
            .voice_states
            .get(&command.user.id)
            .and_then(|state| state.channel_id)
    });

    CommandContext {
        guild_id: command.guild_id,
        user_id: command.user.id,
        user_channel,
    }
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    deferred: bool,
    result: CommandResult,
) -> Result<()> {
    match result {
        Ok(reply) => {
            let (content, embed) = render_reply(reply);
            if deferred {
                let mut edit = EditInteractionResponse::new();
                if let Some(content) = content {
                    edit = edit.content(content);
                }
                if let Some(embed) = embed {
                    edit = edit.embed(embed);
                }
                command.edit_response(&ctx.http, edit).await?;
            } else {
                let mut message = CreateInteractionResponseMessage::new();
                if let Some(content) = content {
                    message = message.content(content);
                }
                if let Some(embed) = embed {
                    message = message.embed(embed);
                }
                command
                    .create_response(&ctx.http, CreateInteractionResponse::Message(message))
                    .await?;
            }
        }
        Err(err) => {
            let content = match &err {
                CommandError::Internal(source) => {
                    error!("error interno en /{}: {:?}", command.data.name, source);
                    "❌ Algo salió mal, intenta de nuevo".to_string()
                }
                other => format!("❌ {other}"),
            };

            if deferred {
                command
                    .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
                    .await?;
            } else {
                command
                    .create_response(
                        &ctx.http,
                        CreateInteractionResponse::Message(
                            CreateInteractionResponseMessage::new()
                                .content(content)
                                .ephemeral(true),
                        ),
                    )
                    .await?;
            }
        }
    }

    Ok(())
}

fn render_reply(reply: CommandReply) -> (Option<String>, Option<CreateEmbed>) {
    match reply {
        CommandReply::Joined { channel_id } => {
            (Some(format!("🔊 Conectado a <#{channel_id}>")), None)
        }
        CommandReply::AlreadyJoined { channel_id } => {
            (Some(format!("✅ Ya estoy conectado a <#{channel_id}>")), None)
        }
        CommandReply::Moved { channel_id } => {
            (Some(format!("➡️ Me mudé a <#{channel_id}>")), None)
        }
        CommandReply::Left => (Some("👋 Desconectado".to_string()), None),
        CommandReply::Started { track } => (None, Some(embeds::now_starting_embed(&track))),
        CommandReply::TrackQueued { track, position } => {
            (None, Some(embeds::track_added_embed(&track, position)))
        }
        CommandReply::PlaylistQueued { name, added } => (
            Some(format!(
                "➕ Agregadas {added} canciones de «{name}» a la cola"
            )),
            None,
        ),
        CommandReply::Resumed => (Some("▶️ Reproducción reanudada".to_string()), None),
        CommandReply::Paused => (Some("⏸️ Reproducción pausada".to_string()), None),
        CommandReply::Skipped { next: Some(track) } => (
            Some(format!("⏭️ Saltada, ahora suena **{}**", track.title)),
            None,
        ),
        CommandReply::Skipped { next: None } => {
            (Some("⏭️ Saltada, la cola quedó vacía".to_string()), None)
        }
        CommandReply::Stopped => (Some("⏹️ Reproducción detenida".to_string()), None),
        CommandReply::Shuffled { count } => {
            (Some(format!("🔀 Cola mezclada ({count} pistas)")), None)
        }
        CommandReply::RepeatSet { enabled: true } => {
            (Some("🔁 Repetición activada".to_string()), None)
        }
        CommandReply::RepeatSet { enabled: false } => {
            (Some("➡️ Repetición desactivada".to_string()), None)
        }
        CommandReply::VolumeSet { level } => (Some(format!("🔊 Volumen al {level}%")), None),
        CommandReply::Seeked { position_ms } => (
            Some(format!("⏩ Posición: {}", embeds::format_timestamp(position_ms))),
            None,
        ),
        CommandReply::NowPlaying {
            track,
            position_ms,
            paused,
            volume,
            repeat,
        } => (
            None,
            Some(embeds::now_playing_embed(
                &track,
                position_ms,
                paused,
                volume,
                repeat,
            )),
        ),
        CommandReply::QueueSnapshot {
            current,
            upcoming,
            repeat,
            paused,
            volume,
        } => (
            None,
            Some(embeds::queue_embed(
                current.as_ref(),
                &upcoming,
                repeat,
                paused,
                volume,
            )),
        ),
    }
}

// Extracción de opciones

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.value.as_str())
}

fn option_int(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.value.as_i64())
}

fn option_bool(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.value.as_bool())
}

fn option_channel(command: &CommandInteraction, name: &str) -> Option<ChannelId> {
    command
        .data
        .options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.value.as_channel_id())
}
