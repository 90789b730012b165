use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, UserId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::voice::handshake::CompletedHandshake;
use crate::voice::queue::Track;

/// Intervalo de sondeo mientras se espera un acuse del nodo
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Forma de una pista en el protocolo del nodo (sin atribución de usuario)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub uri: String,
    pub title: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl TrackInfo {
    /// Convierte la forma de protocolo en una pista encolable
    pub fn into_track(self, requested_by: UserId) -> Track {
        Track {
            uri: self.uri,
            title: self.title,
            duration_ms: self.duration_ms,
            requested_by,
            added_at: Utc::now(),
        }
    }
}

impl From<&Track> for TrackInfo {
    fn from(track: &Track) -> Self {
        Self {
            uri: track.uri.clone(),
            title: track.title.clone(),
            duration_ms: track.duration_ms,
        }
    }
}

/// Comandos de reproducción que entiende el nodo
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCommand {
    Play(Track),
    Stop,
    SetPaused(bool),
    #[allow(dead_code)]
    Skip,
    Seek(u64),
    SetVolume(u16),
    #[allow(dead_code)]
    Shuffle,
    SetRepeat(bool),
}

/// Vista de solo lectura del player de una guild en el nodo
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerView {
    pub connected: bool,
    #[serde(default)]
    pub track: Option<TrackInfo>,
    #[serde(default)]
    pub position_ms: u64,
    #[serde(default)]
    pub paused: bool,
    #[serde(default = "default_volume")]
    pub volume: u16,
    #[serde(default)]
    pub repeat: bool,
}

fn default_volume() -> u16 {
    100
}

/// Resultado de resolver una búsqueda o URL contra el nodo
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "load_type", content = "data", rename_all = "snake_case")]
pub enum LoadOutcome {
    Track(TrackInfo),
    Playlist { name: String, tracks: Vec<TrackInfo> },
    Search(Vec<TrackInfo>),
    Empty,
    Failed { message: String },
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("no hay transporte de voz activo en el nodo para esta guild")]
    NotConnected,
    #[error("el nodo de audio no respondió a tiempo")]
    AckTimeout,
    #[error("el nodo de audio no está disponible: {0}")]
    Unavailable(String),
    #[error("respuesta inválida del nodo: {0}")]
    Protocol(String),
}

/// Cliente del nodo de audio externo.
///
/// El coordinador solo conoce este contrato; el transporte concreto vive
/// en un único adaptador ([`RestNodeClient`]).
#[async_trait]
pub trait AudioNodeClient: Send + Sync {
    /// Verifica el enlace con el nodo; seguro de llamar al arrancar
    async fn connect(&self) -> Result<(), NodeError>;

    /// Reenvía el par voice-state/voice-server al nodo para que
    /// establezca su propio transporte de medios para la guild
    async fn send_voice_update(&self, handshake: &CompletedHandshake) -> Result<(), NodeError>;

    async fn send_command(&self, guild_id: GuildId, command: &NodeCommand)
        -> Result<(), NodeError>;

    /// Estado del player de la guild; `None` si el nodo no la conoce
    async fn player(&self, guild_id: GuildId) -> Result<Option<PlayerView>, NodeError>;

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError>;

    /// Resuelve una búsqueda o URL en pistas reproducibles
    async fn load_tracks(&self, identifier: &str) -> Result<LoadOutcome, NodeError>;
}

/// Adaptador REST concreto sobre la API del nodo
pub struct RestNodeClient {
    http: reqwest::Client,
    base: Url,
    password: String,
}

impl RestNodeClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let scheme = if config.node_secure { "https" } else { "http" };
        let base = Url::parse(&format!(
            "{}://{}:{}/",
            scheme, config.node_host, config.node_port
        ))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base,
            password: config.node_password.clone(),
        })
    }

    fn route(&self, path: &str) -> Result<Url, NodeError> {
        self.base
            .join(path)
            .map_err(|e| NodeError::Protocol(e.to_string()))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, self.password.as_str())
    }

    async fn expect_success(
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response, NodeError> {
        let response = response.map_err(|e| NodeError::Unavailable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(NodeError::Unavailable(format!("estado HTTP {status}")))
        }
    }
}

#[async_trait]
impl AudioNodeClient for RestNodeClient {
    async fn connect(&self) -> Result<(), NodeError> {
        let url = self.route("v1/info")?;
        let response = Self::expect_success(
            self.request(reqwest::Method::GET, url).send().await,
        )
        .await?;

        let info: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NodeError::Protocol(e.to_string()))?;
        info!(
            "🎼 Nodo de audio enlazado (versión {})",
            info.get("version").and_then(|v| v.as_str()).unwrap_or("?")
        );
        Ok(())
    }

    async fn send_voice_update(&self, handshake: &CompletedHandshake) -> Result<(), NodeError> {
        let url = self.route(&format!(
            "v1/players/{}/voice",
            handshake.guild_id.get()
        ))?;
        let body = serde_json::json!({
            "channel_id": handshake.channel_id.get(),
            "session_id": handshake.session_id,
            "endpoint": handshake.endpoint,
            "token": handshake.token,
        });

        Self::expect_success(
            self.request(reqwest::Method::PUT, url).json(&body).send().await,
        )
        .await?;
        Ok(())
    }

    async fn send_command(
        &self,
        guild_id: GuildId,
        command: &NodeCommand,
    ) -> Result<(), NodeError> {
        let player = format!("v1/players/{}", guild_id.get());
        let (method, url, body) = match command {
            NodeCommand::Play(track) => (
                reqwest::Method::POST,
                self.route(&format!("{player}/play"))?,
                serde_json::json!({ "track": TrackInfo::from(track) }),
            ),
            NodeCommand::Stop => (
                reqwest::Method::POST,
                self.route(&format!("{player}/stop"))?,
                serde_json::json!({}),
            ),
            NodeCommand::SetPaused(paused) => (
                reqwest::Method::PATCH,
                self.route(&player)?,
                serde_json::json!({ "paused": paused }),
            ),
            NodeCommand::Skip => (
                reqwest::Method::POST,
                self.route(&format!("{player}/skip"))?,
                serde_json::json!({}),
            ),
            NodeCommand::Seek(position_ms) => (
                reqwest::Method::PATCH,
                self.route(&player)?,
                serde_json::json!({ "position_ms": position_ms }),
            ),
            NodeCommand::SetVolume(level) => (
                reqwest::Method::PATCH,
                self.route(&player)?,
                serde_json::json!({ "volume": level }),
            ),
            NodeCommand::Shuffle => (
                reqwest::Method::POST,
                self.route(&format!("{player}/shuffle"))?,
                serde_json::json!({}),
            ),
            NodeCommand::SetRepeat(repeat) => (
                reqwest::Method::PATCH,
                self.route(&player)?,
                serde_json::json!({ "repeat": repeat }),
            ),
        };

        let response = self
            .request(method, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;

        // Un 404 aquí significa que el nodo ya no conoce el player
        if response.status() == StatusCode::NOT_FOUND {
            return Err(NodeError::NotConnected);
        }
        if !response.status().is_success() {
            return Err(NodeError::Unavailable(format!(
                "estado HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn player(&self, guild_id: GuildId) -> Result<Option<PlayerView>, NodeError> {
        let url = self.route(&format!("v1/players/{}", guild_id.get()))?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(NodeError::Unavailable(format!(
                "estado HTTP {}",
                response.status()
            )));
        }

        let view = response
            .json::<PlayerView>()
            .await
            .map_err(|e| NodeError::Protocol(e.to_string()))?;
        Ok(Some(view))
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let url = self.route(&format!("v1/players/{}", guild_id.get()))?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;

        // Un player inexistente ya está destruido
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            Ok(())
        } else {
            Err(NodeError::Unavailable(format!(
                "estado HTTP {}",
                response.status()
            )))
        }
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadOutcome, NodeError> {
        let mut url = self.route("v1/tracks")?;
        url.query_pairs_mut().append_pair("identifier", identifier);

        let response = Self::expect_success(
            self.request(reqwest::Method::GET, url).send().await,
        )
        .await?;
        response
            .json::<LoadOutcome>()
            .await
            .map_err(|e| NodeError::Protocol(e.to_string()))
    }
}

/// Envuelve el cliente del nodo con la política de fallos del bot:
/// reintentos acotados con backoff exponencial para fallos de transporte,
/// sondeo con deadline para los acuses de conexión/desconexión y la
/// guardia de guilds sin transporte activo.
///
/// La conexión al nodo es única y compartida por todas las guilds; cada
/// llamada HTTP es independiente, así que una guild nunca bloquea los
/// comandos en vuelo de otra.
pub struct AudioNodeConnector {
    client: Arc<dyn AudioNodeClient>,
    active: DashMap<GuildId, ()>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl AudioNodeConnector {
    pub fn new(client: Arc<dyn AudioNodeClient>, max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            client,
            active: DashMap::new(),
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Reintenta solo fallos de transporte, nunca timeouts de acuse
    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, NodeError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, NodeError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(NodeError::Unavailable(reason)) if attempt < self.max_attempts => {
                    let delay = self.backoff_base * 2u32.pow((attempt - 1).min(3));
                    warn!(
                        "⚠️ {what} falló ({reason}), reintento {attempt}/{} en {delay:?}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Establece el enlace con el nodo; idempotente
    pub async fn connect(&self) -> Result<(), NodeError> {
        self.with_retry("conexión al nodo", || self.client.connect())
            .await
    }

    /// Reenvía un handshake completado al nodo
    pub async fn forward_handshake(
        &self,
        handshake: &CompletedHandshake,
    ) -> Result<(), NodeError> {
        self.with_retry("reenvío de handshake", || {
            self.client.send_voice_update(handshake)
        })
        .await
    }

    /// Espera a que el nodo confirme el transporte de medios de la guild
    pub async fn await_connection_ready(
        &self,
        guild_id: GuildId,
        timeout: Duration,
    ) -> Result<(), NodeError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.client.player(guild_id).await {
                Ok(Some(view)) if view.connected => {
                    self.active.insert(guild_id, ());
                    debug!("🔊 Transporte de medios listo en guild {guild_id}");
                    return Ok(());
                }
                Ok(_) => {}
                // Transporte caído durante el sondeo: se sigue intentando
                // hasta la deadline
                Err(NodeError::Unavailable(reason)) => {
                    debug!("sondeo de conexión falló en guild {guild_id}: {reason}");
                }
                Err(err) => return Err(err),
            }

            if Instant::now() >= deadline {
                return Err(NodeError::AckTimeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Espera a que el nodo confirme que descartó el player de la guild
    pub async fn await_disconnection_complete(
        &self,
        guild_id: GuildId,
        timeout: Duration,
    ) -> Result<(), NodeError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.client.player(guild_id).await {
                Ok(None) => {
                    self.active.remove(&guild_id);
                    return Ok(());
                }
                Ok(Some(_)) => {}
                Err(NodeError::Unavailable(reason)) => {
                    debug!("sondeo de desconexión falló en guild {guild_id}: {reason}");
                }
                Err(err) => return Err(err),
            }

            if Instant::now() >= deadline {
                return Err(NodeError::AckTimeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Envía un comando de reproducción. Falla con `NotConnected` sin
    /// contactar al nodo si la guild no tiene transporte establecido.
    pub async fn issue_command(
        &self,
        guild_id: GuildId,
        command: &NodeCommand,
    ) -> Result<(), NodeError> {
        if !self.active.contains_key(&guild_id) {
            return Err(NodeError::NotConnected);
        }

        self.with_retry("comando al nodo", || {
            self.client.send_command(guild_id, command)
        })
        .await
    }

    /// Instantánea de solo lectura del player de la guild
    pub async fn query_state(&self, guild_id: GuildId) -> Result<Option<PlayerView>, NodeError> {
        self.with_retry("consulta al nodo", || self.client.player(guild_id))
            .await
    }

    /// Pide al nodo descartar el player de la guild
    pub async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError> {
        self.active.remove(&guild_id);
        self.with_retry("destrucción del player", || {
            self.client.destroy_player(guild_id)
        })
        .await
    }

    /// Resuelve una búsqueda o URL en pistas
    pub async fn resolve_tracks(&self, identifier: &str) -> Result<LoadOutcome, NodeError> {
        self.with_retry("resolución de pistas", || {
            self.client.load_tracks(identifier)
        })
        .await
    }

    /// Olvida el transporte de una guild tras una desconexión no solicitada
    pub fn mark_gone(&self, guild_id: GuildId) {
        self.active.remove(&guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    const GUILD: GuildId = GuildId::new(7007);

    #[derive(Default)]
    struct FakeClient {
        player_exists: AtomicBool,
        player_connected: AtomicBool,
        send_failures_left: AtomicU32,
        send_calls: AtomicU32,
        commands: Mutex<Vec<NodeCommand>>,
    }

    #[async_trait]
    impl AudioNodeClient for FakeClient {
        async fn connect(&self) -> Result<(), NodeError> {
            Ok(())
        }

        async fn send_voice_update(&self, _: &CompletedHandshake) -> Result<(), NodeError> {
            self.player_exists.store(true, Ordering::SeqCst);
            self.player_connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send_command(
            &self,
            _: GuildId,
            command: &NodeCommand,
        ) -> Result<(), NodeError> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            if self.send_failures_left.load(Ordering::SeqCst) > 0 {
                self.send_failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(NodeError::Unavailable("conexión rechazada".into()));
            }
            self.commands.lock().push(command.clone());
            Ok(())
        }

        async fn player(&self, _: GuildId) -> Result<Option<PlayerView>, NodeError> {
            if !self.player_exists.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(PlayerView {
                connected: self.player_connected.load(Ordering::SeqCst),
                track: None,
                position_ms: 0,
                paused: false,
                volume: 100,
                repeat: false,
            }))
        }

        async fn destroy_player(&self, _: GuildId) -> Result<(), NodeError> {
            self.player_exists.store(false, Ordering::SeqCst);
            self.player_connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn load_tracks(&self, _: &str) -> Result<LoadOutcome, NodeError> {
            Ok(LoadOutcome::Empty)
        }
    }

    fn handshake() -> CompletedHandshake {
        CompletedHandshake {
            guild_id: GUILD,
            channel_id: serenity::model::id::ChannelId::new(1),
            session_id: "sess".into(),
            endpoint: "voice.example.gg:443".into(),
            token: "tok".into(),
        }
    }

    fn connector(client: Arc<FakeClient>) -> AudioNodeConnector {
        AudioNodeConnector::new(client, 3, Duration::from_millis(10))
    }

    async fn establish(connector: &AudioNodeConnector) {
        connector.forward_handshake(&handshake()).await.unwrap();
        connector
            .await_connection_ready(GUILD, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn commands_without_transport_fail_without_contacting_node() {
        let client = Arc::new(FakeClient::default());
        let connector = connector(client.clone());

        let result = connector.issue_command(GUILD, &NodeCommand::Stop).await;

        assert!(matches!(result, Err(NodeError::NotConnected)));
        assert_eq!(client.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_transport_failures_are_retried() {
        let client = Arc::new(FakeClient::default());
        client.send_failures_left.store(2, Ordering::SeqCst);
        let connector = connector(client.clone());
        establish(&connector).await;

        connector
            .issue_command(GUILD, &NodeCommand::SetPaused(true))
            .await
            .unwrap();

        assert_eq!(client.send_calls.load(Ordering::SeqCst), 3);
        assert_eq!(*client.commands.lock(), vec![NodeCommand::SetPaused(true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let client = Arc::new(FakeClient::default());
        client.send_failures_left.store(10, Ordering::SeqCst);
        let connector = connector(client.clone());
        establish(&connector).await;

        let result = connector.issue_command(GUILD, &NodeCommand::Stop).await;

        assert!(matches!(result, Err(NodeError::Unavailable(_))));
        assert_eq!(client.send_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_ack_times_out_without_retry() {
        let client = Arc::new(FakeClient::default());
        // El player existe pero nunca llega a connected
        client.player_exists.store(true, Ordering::SeqCst);
        let connector = connector(client.clone());

        let result = connector
            .await_connection_ready(GUILD, Duration::from_millis(350))
            .await;

        assert!(matches!(result, Err(NodeError::AckTimeout)));
        // El timeout de acuse no habilita el transporte
        assert!(matches!(
            connector.issue_command(GUILD, &NodeCommand::Stop).await,
            Err(NodeError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnection_ack_waits_for_removal() {
        let client = Arc::new(FakeClient::default());
        let connector = connector(client.clone());
        establish(&connector).await;

        connector.destroy_player(GUILD).await.unwrap();
        connector
            .await_disconnection_complete(GUILD, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(matches!(
            connector.issue_command(GUILD, &NodeCommand::Stop).await,
            Err(NodeError::NotConnected)
        ));
    }
}
