use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use std::sync::Arc;
use tracing::{error, info};

mod bot;
mod config;
mod ui;
mod voice;

use crate::bot::gateway::GatewayBridge;
use crate::bot::VegaBot;
use crate::config::Config;
use crate::voice::coordinator::VoiceCoordinator;
use crate::voice::node::{AudioNodeConnector, RestNodeClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vega_music=debug".parse()?)
                .add_directive("serenity=info".parse()?),
        )
        .init();

    info!("🎧 Iniciando Vega Music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Cliente del nodo de audio y coordinador de voz
    let node_client = Arc::new(RestNodeClient::new(&config)?);
    let connector = AudioNodeConnector::new(
        node_client,
        config.node_retry_attempts,
        config.node_retry_base(),
    );

    let bridge = Arc::new(GatewayBridge::new());
    let coordinator = Arc::new(VoiceCoordinator::new(
        config.clone(),
        connector,
        bridge.clone(),
    ));
    bridge.attach(coordinator.clone());

    // Si el nodo no está disponible se arranca igual; los comandos lo
    // reportarán hasta que vuelva
    match coordinator.connect_node().await {
        Ok(()) => info!("✅ Nodo de audio disponible"),
        Err(e) => error!("❌ El nodo de audio no respondió al arrancar: {e}"),
    }

    // Intents mínimos: guilds y estados de voz
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = VegaBot::new(config.clone(), coordinator);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .voice_manager_arc(bridge)
        .await?;

    // Shutdown graceful
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        std::process::exit(0);
    });

    info!("🚀 Bot iniciado");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Verifica que el nodo de audio responda, para el healthcheck del contenedor
async fn health_check(config: &Config) -> Result<()> {
    let node = Arc::new(RestNodeClient::new(config)?);
    let connector = AudioNodeConnector::new(node, 1, config.node_retry_base());

    match connector.connect().await {
        Ok(()) => {
            println!("OK");
            Ok(())
        }
        Err(e) => anyhow::bail!("nodo de audio inaccesible: {e}"),
    }
}
