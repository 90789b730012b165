use async_trait::async_trait;
use dashmap::DashMap;
use futures::channel::mpsc::UnboundedSender as Sender;
use serenity::gateway::{ShardRunnerMessage, VoiceGatewayManager};
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::model::voice::VoiceState;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::voice::coordinator::{VoiceCoordinator, VoiceGatewayControl};

/// Puente entre serenity y el coordinador de voz.
///
/// Serenity entrega aquí las dos mitades del handshake (es el mismo
/// enganche de plugin de voz que usaría songbird) y nos presta el canal
/// de cada shard, por el que salen los cambios de estado de voz (op 4).
pub struct GatewayBridge {
    coordinator: OnceLock<Arc<VoiceCoordinator>>,
    shards: DashMap<u32, Sender<ShardRunnerMessage>>,
    shard_count: AtomicU32,
}

impl GatewayBridge {
    pub fn new() -> Self {
        Self {
            coordinator: OnceLock::new(),
            shards: DashMap::new(),
            shard_count: AtomicU32::new(1),
        }
    }

    /// Conecta el puente con el coordinador una vez construidos ambos
    pub fn attach(&self, coordinator: Arc<VoiceCoordinator>) {
        let _ = self.coordinator.set(coordinator);
    }

    fn shard_for(&self, guild_id: GuildId) -> u32 {
        let count = self.shard_count.load(Ordering::Acquire).max(1);
        ((guild_id.get() >> 22) % u64::from(count)) as u32
    }
}

#[async_trait]
impl VoiceGatewayManager for GatewayBridge {
    async fn initialise(&self, shard_count: u32, user_id: UserId) {
        debug!("puente de voz inicializado: {shard_count} shards, bot {user_id}");
        self.shard_count.store(shard_count, Ordering::Release);
        if let Some(coordinator) = self.coordinator.get() {
            coordinator.note_ready(user_id);
        }
    }

    async fn register_shard(&self, shard_id: u32, sender: Sender<ShardRunnerMessage>) {
        debug!("🔗 Shard {shard_id} registrada para mensajes de voz");
        self.shards.insert(shard_id, sender);
    }

    async fn deregister_shard(&self, shard_id: u32) {
        debug!("shard {shard_id} dada de baja");
        self.shards.remove(&shard_id);
    }

    async fn server_update(&self, guild_id: GuildId, endpoint: &Option<String>, token: &str) {
        if let Some(coordinator) = self.coordinator.get() {
            coordinator.handle_voice_server_update(guild_id, endpoint.as_deref(), token);
        }
    }

    async fn state_update(&self, guild_id: GuildId, voice_state: &VoiceState) {
        if let Some(coordinator) = self.coordinator.get() {
            coordinator.handle_voice_state_update(
                guild_id,
                voice_state.user_id,
                &voice_state.session_id,
                voice_state.channel_id,
            );
        }
    }
}

#[async_trait]
impl VoiceGatewayControl for GatewayBridge {
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
    ) -> anyhow::Result<()> {
        let shard_id = self.shard_for(guild_id);
        let payload = serde_json::json!({
            "op": 4,
            "d": {
                "guild_id": guild_id.get(),
                "channel_id": channel_id.map(|c| c.get()),
                "self_mute": false,
                "self_deaf": true,
            }
        });

        let Some(sender) = self.shards.get(&shard_id) else {
            anyhow::bail!("la shard {shard_id} todavía no está registrada");
        };
        sender
            .unbounded_send(ShardRunnerMessage::Message(Message::Text(
                payload.to_string(),
            )))
            .map_err(|e| anyhow::anyhow!("no se pudo hablar con la shard {shard_id}: {e}"))?;

        debug!("op 4 enviado para guild {guild_id} (canal {channel_id:?})");
        Ok(())
    }
}
