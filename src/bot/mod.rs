//! # Bot Module
//!
//! Capa de Discord: registro de comandos slash, despacho de
//! interacciones y el puente de voz con el gateway. Toda la lógica de
//! sesiones vive en [`crate::voice`]; aquí solo se traduce entre
//! interacciones de Discord y la superficie de comandos del coordinador.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info};

pub mod commands;
pub mod gateway;
pub mod handlers;

use crate::{config::Config, voice::coordinator::VoiceCoordinator};

/// Handler principal de eventos de Discord
pub struct VegaBot {
    config: Arc<Config>,
    pub coordinator: Arc<VoiceCoordinator>,
}

impl VegaBot {
    pub fn new(config: Arc<Config>, coordinator: Arc<VoiceCoordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    /// Registra los comandos slash, por guild en desarrollo (propagan en
    /// segundos) o globales en producción.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("🏠 Comandos registrados para guild {guild_id}");
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("🌐 Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for VegaBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
        self.coordinator.note_ready(ready.user.id);

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // Desconexión automática de sesiones inactivas
        self.coordinator.spawn_idle_sweeper();
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }
}
