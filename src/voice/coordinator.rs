use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::voice::handshake::{CompletedHandshake, HandshakeCorrelator};
use crate::voice::node::{AudioNodeConnector, LoadOutcome, NodeCommand, NodeError};
use crate::voice::queue::Track;
use crate::voice::session::{GuildSlot, GuildVoiceSession, SessionRegistry, SessionState};

/// Canal de salida hacia el gateway de Discord: lo único que el
/// coordinador le pide es cambiar el estado de voz del bot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGatewayControl: Send + Sync {
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
    ) -> anyhow::Result<()>;
}

/// Contexto mínimo de un comando: guild, autor y su canal de voz actual
/// (resuelto por el caller contra la caché del gateway).
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub guild_id: Option<GuildId>,
    pub user_id: UserId,
    pub user_channel: Option<ChannelId>,
}

/// Resultado estructurado de un comando; el formato es cosa del caller
#[derive(Debug, Clone)]
pub enum CommandReply {
    Joined { channel_id: ChannelId },
    AlreadyJoined { channel_id: ChannelId },
    Moved { channel_id: ChannelId },
    Left,
    Started { track: Track },
    TrackQueued { track: Track, position: usize },
    PlaylistQueued { name: String, added: usize },
    Resumed,
    Paused,
    Skipped { next: Option<Track> },
    Stopped,
    Shuffled { count: usize },
    RepeatSet { enabled: bool },
    VolumeSet { level: u16 },
    Seeked { position_ms: u64 },
    NowPlaying {
        track: Track,
        position_ms: u64,
        paused: bool,
        volume: u16,
        repeat: bool,
    },
    QueueSnapshot {
        current: Option<Track>,
        upcoming: Vec<Track>,
        repeat: bool,
        paused: bool,
        volume: u16,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// Corregible por el usuario; se muestra tal cual
    #[error("{0}")]
    User(String),
    #[error("la conexión de voz no se estableció a tiempo, intenta de nuevo")]
    ConnectionTimeout,
    #[error("el intento de conexión fue cancelado")]
    Cancelled,
    #[error("no estoy conectado a un canal de voz, conéctame con /connect")]
    NotConnected,
    #[error("el nodo de audio no está disponible, intenta de nuevo en un momento")]
    NodeUnavailable,
    #[error("error interno")]
    Internal(#[source] anyhow::Error),
}

impl From<NodeError> for CommandError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::NotConnected => CommandError::NotConnected,
            NodeError::AckTimeout => CommandError::ConnectionTimeout,
            NodeError::Unavailable(_) => CommandError::NodeUnavailable,
            NodeError::Protocol(detail) => CommandError::Internal(anyhow::anyhow!(detail)),
        }
    }
}

pub type CommandResult = Result<CommandReply, CommandError>;

/// Orquestador de sesiones de voz.
///
/// Recibe los eventos del gateway, serializa los comandos de usuario por
/// guild a través del registro de sesiones y traduce ambos en llamadas al
/// nodo de audio. La correlación de handshakes corre fuera del lock de
/// sesión; todo lo demás adentro.
pub struct VoiceCoordinator {
    config: Arc<Config>,
    registry: SessionRegistry,
    correlator: HandshakeCorrelator,
    connector: AudioNodeConnector,
    gateway: Arc<dyn VoiceGatewayControl>,
    /// Esperas de conexión en vuelo, completadas desde el flujo de eventos
    pending_joins: DashMap<GuildId, oneshot::Sender<CompletedHandshake>>,
    bot_user: OnceLock<UserId>,
}

impl VoiceCoordinator {
    pub fn new(
        config: Arc<Config>,
        connector: AudioNodeConnector,
        gateway: Arc<dyn VoiceGatewayControl>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(config.max_queue_size),
            correlator: HandshakeCorrelator::new(),
            connector,
            gateway,
            pending_joins: DashMap::new(),
            bot_user: OnceLock::new(),
            config,
        }
    }

    /// Identidad del bot, conocida al abrir la conexión al gateway
    pub fn note_ready(&self, user_id: UserId) {
        let _ = self.bot_user.set(user_id);
    }

    /// Verifica el enlace con el nodo de audio; seguro al arrancar
    pub async fn connect_node(&self) -> Result<(), NodeError> {
        self.connector.connect().await
    }

    // ---- entrada de eventos del gateway ----

    /// Mitad voice-state del handshake. Los eventos de otros usuarios se
    /// ignoran. Nunca toma locks de sesión: el dispatch del gateway no
    /// puede quedar bloqueado detrás de una conexión que espera justo
    /// estos eventos.
    pub fn handle_voice_state_update(
        self: &Arc<Self>,
        guild_id: GuildId,
        user_id: UserId,
        session_id: &str,
        channel_id: Option<ChannelId>,
    ) {
        if self.bot_user.get() != Some(&user_id) {
            return;
        }

        if channel_id.is_none() {
            self.correlator.discard(guild_id);
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                coordinator.teardown_unsolicited(guild_id).await;
            });
            return;
        }

        if let Some(handshake) = self
            .correlator
            .submit_state_half(guild_id, session_id, channel_id)
        {
            self.complete_handshake(handshake);
        }
    }

    /// Mitad voice-server del handshake
    pub fn handle_voice_server_update(
        &self,
        guild_id: GuildId,
        endpoint: Option<&str>,
        token: &str,
    ) {
        let Some(endpoint) = endpoint else {
            // Discord manda endpoint nulo mientras reasigna el servidor de
            // voz; llegará otro evento con uno utilizable
            debug!("endpoint de voz nulo para guild {guild_id}, se ignora");
            return;
        };

        if let Some(handshake) = self.correlator.submit_server_half(guild_id, endpoint, token) {
            self.complete_handshake(handshake);
        }
    }

    fn complete_handshake(&self, handshake: CompletedHandshake) {
        let guild_id = handshake.guild_id;
        if let Some((_, waiter)) = self.pending_joins.remove(&guild_id) {
            // Si el que esperaba ya se rindió por timeout, el envío falla
            // y el handshake muere con él
            let _ = waiter.send(handshake);
        } else {
            debug!("handshake completado sin conexión esperándolo en guild {guild_id}");
        }
    }

    /// El gateway nos sacó de voz sin que lo pidiéramos (expulsión,
    /// cierre de canal). Desmonta la sesión; el usuario se entera en su
    /// siguiente comando.
    async fn teardown_unsolicited(&self, guild_id: GuildId) {
        let Some(slot) = self.registry.get(guild_id) else {
            return;
        };
        let mut session = slot.lock().await;
        if session.state != SessionState::Connected {
            return;
        }

        warn!("🔌 Desconexión de voz no solicitada en guild {guild_id}");
        self.connector.mark_gone(guild_id);
        if let Err(e) = self.connector.destroy_player(guild_id).await {
            debug!("no se pudo descartar el player tras la desconexión: {e}");
        }
        session.reset_connection();
        session.queue.clear();
        drop(session);
        self.registry.remove(guild_id);
    }

    // ---- máquina de estados de conexión ----

    /// Flujo completo de conexión, ejecutado con el lock de la guild en
    /// mano: pedir el cambio de estado de voz, esperar el handshake
    /// correlacionado bajo su deadline, reenviarlo al nodo y esperar el
    /// acuse bajo la suya. Cualquier salida en falso deja la sesión en
    /// `Disconnected` lista para reintentar.
    async fn join_locked(
        &self,
        slot: &GuildSlot,
        session: &mut GuildVoiceSession,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<ChannelId, CommandError> {
        let cancel = slot.arm_cancel();
        self.correlator.begin_attempt(guild_id);
        let (waiter, handshake_rx) = oneshot::channel();
        self.pending_joins.insert(guild_id, waiter);

        session.state = SessionState::AwaitingHandshake;
        session.pending_deadline = Some(Instant::now() + self.config.handshake_timeout());
        debug!("📡 Pidiendo voz en canal {channel_id} de guild {guild_id}");

        if let Err(e) = self
            .gateway
            .update_voice_state(guild_id, Some(channel_id))
            .await
        {
            self.abort_join(slot, session, guild_id);
            return Err(CommandError::Internal(e));
        }

        let handshake = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.abort_join(slot, session, guild_id);
                return Err(CommandError::Cancelled);
            }
            received = tokio::time::timeout(self.config.handshake_timeout(), handshake_rx) => {
                match received {
                    Ok(Ok(handshake)) => handshake,
                    Ok(Err(_)) => {
                        self.abort_join(slot, session, guild_id);
                        return Err(CommandError::Internal(anyhow::anyhow!(
                            "el intento de conexión perdió su canal de handshake"
                        )));
                    }
                    Err(_) => {
                        self.abort_join(slot, session, guild_id);
                        self.leave_best_effort(guild_id).await;
                        return Err(CommandError::ConnectionTimeout);
                    }
                }
            }
        };

        session.state = SessionState::Connecting;
        session.apply_handshake(&handshake);

        if let Err(e) = self.connector.forward_handshake(&handshake).await {
            self.abort_join(slot, session, guild_id);
            self.leave_best_effort(guild_id).await;
            return Err(e.into());
        }

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // El nodo ya recibió el handshake; pedirle que lo descarte
                if let Err(e) = self.connector.destroy_player(guild_id).await {
                    debug!("limpieza del player cancelado falló: {e}");
                }
                self.abort_join(slot, session, guild_id);
                return Err(CommandError::Cancelled);
            }
            ready = self
                .connector
                .await_connection_ready(guild_id, self.config.node_ack_timeout()) => ready,
        };

        if let Err(e) = ready {
            self.abort_join(slot, session, guild_id);
            self.leave_best_effort(guild_id).await;
            return Err(e.into());
        }

        slot.disarm_cancel();
        session.state = SessionState::Connected;
        session.pending_deadline = None;
        session.touch();
        info!(
            "🔊 Conectado al canal de voz {} en guild {guild_id}",
            handshake.channel_id
        );
        if let Some((session_id, endpoint)) = session.connection_info() {
            debug!("sesión de voz {session_id} vía {endpoint}");
        }
        Ok(handshake.channel_id)
    }

    fn abort_join(&self, slot: &GuildSlot, session: &mut GuildVoiceSession, guild_id: GuildId) {
        slot.disarm_cancel();
        self.pending_joins.remove(&guild_id);
        self.correlator.discard(guild_id);
        session.reset_connection();
    }

    async fn leave_best_effort(&self, guild_id: GuildId) {
        if let Err(e) = self.gateway.update_voice_state(guild_id, None).await {
            debug!("no se pudo abandonar el canal tras abortar en guild {guild_id}: {e}");
        }
    }

    // ---- comandos de usuario ----

    /// Conecta el bot a un canal de voz. Repetir el comando ya conectado
    /// al mismo canal es un no-op; a otro canal, una mudanza.
    pub async fn connect(&self, ctx: &CommandContext, requested: Option<ChannelId>) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let channel_id = requested.or(ctx.user_channel).ok_or_else(|| {
            CommandError::User(
                "no estás en un canal de voz y no indicaste a cuál conectarme".into(),
            )
        })?;

        let slot = self.registry.get_or_create(guild_id);
        let mut session = slot.lock().await;

        match session.state {
            SessionState::Connected if session.channel_id == Some(channel_id) => {
                Ok(CommandReply::AlreadyJoined { channel_id })
            }
            SessionState::Connected => {
                let joined = self
                    .join_locked(&slot, &mut session, guild_id, channel_id)
                    .await?;
                Ok(CommandReply::Moved { channel_id: joined })
            }
            SessionState::Disconnected => {
                let joined = self
                    .join_locked(&slot, &mut session, guild_id, channel_id)
                    .await?;
                Ok(CommandReply::Joined { channel_id: joined })
            }
            SessionState::Disconnecting => Err(CommandError::User(
                "me estoy desconectando, intenta en un momento".into(),
            )),
            SessionState::AwaitingHandshake | SessionState::Connecting => {
                if let Some(deadline) = session.pending_deadline {
                    debug!(
                        "conexión en curso en guild {guild_id}, vence en {:?}",
                        deadline.saturating_duration_since(Instant::now())
                    );
                }
                Err(CommandError::User("ya hay una conexión en curso".into()))
            }
        }
    }

    /// Se desconecta del canal de voz, cancelando cualquier intento de
    /// conexión todavía en vuelo.
    pub async fn disconnect(&self, ctx: &CommandContext) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let Some(slot) = self.registry.get(guild_id) else {
            return Err(CommandError::User(
                "no estoy conectado a ningún canal de voz".into(),
            ));
        };

        // Interrumpe el intento en vuelo antes de esperar su lock
        let cancelled_join = slot.cancel_pending();
        let mut session = slot.lock().await;

        match session.state {
            SessionState::Connected => {
                session.state = SessionState::Disconnecting;
                if let Err(e) = self.gateway.update_voice_state(guild_id, None).await {
                    session.state = SessionState::Connected;
                    return Err(CommandError::Internal(e));
                }

                if let Err(e) = self.connector.destroy_player(guild_id).await {
                    warn!("el nodo no confirmó destruir el player de guild {guild_id}: {e}");
                } else if let Err(e) = self
                    .connector
                    .await_disconnection_complete(guild_id, self.config.node_ack_timeout())
                    .await
                {
                    warn!("la desconexión del nodo no se confirmó a tiempo en guild {guild_id}: {e}");
                }

                session.reset_connection();
                session.queue.clear();
                drop(session);
                self.registry.remove(guild_id);
                info!("👋 Desconectado del canal de voz en guild {guild_id}");
                Ok(CommandReply::Left)
            }
            SessionState::Disconnected if cancelled_join => {
                // La conexión cancelada ya pidió voz; hay que salir del canal
                self.leave_best_effort(guild_id).await;
                session.reset_connection();
                drop(session);
                self.registry.remove(guild_id);
                Ok(CommandReply::Left)
            }
            SessionState::Disconnected => Err(CommandError::User(
                "no estoy conectado a ningún canal de voz".into(),
            )),
            SessionState::Disconnecting => {
                Err(CommandError::User("ya me estoy desconectando".into()))
            }
            SessionState::AwaitingHandshake | SessionState::Connecting => Err(CommandError::User(
                "hay una conexión en curso, intenta de nuevo".into(),
            )),
        }
    }

    /// Reproduce una búsqueda/URL, o reanuda si no se pasa nada. Si el
    /// bot no está conectado primero se conecta al canal del autor y
    /// luego continúa con la petición original, sin recursión.
    pub async fn play(&self, ctx: &CommandContext, query: Option<&str>) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let slot = self.registry.get_or_create(guild_id);
        let mut session = slot.lock().await;

        let mut joined_channel = None;
        if session.state != SessionState::Connected {
            if session.state != SessionState::Disconnected {
                return Err(CommandError::User(
                    "hay una operación de voz en curso, intenta en un momento".into(),
                ));
            }
            let channel_id = ctx.user_channel.ok_or_else(|| {
                CommandError::User(
                    "entra a un canal de voz primero, o conéctame con /connect".into(),
                )
            })?;
            joined_channel = Some(
                self.join_locked(&slot, &mut session, guild_id, channel_id)
                    .await?,
            );
        }

        let Some(query) = query else {
            // Sin argumento: reanudar lo que haya en cola
            if session.queue.peek_head().is_some() {
                self.issue_checked(&mut session, guild_id, &NodeCommand::SetPaused(false))
                    .await?;
                session.playback.paused = false;
                session.touch();
                return Ok(CommandReply::Resumed);
            }
            return match joined_channel {
                Some(channel_id) => Ok(CommandReply::Joined { channel_id }),
                None => Err(CommandError::User(
                    "no hay nada en la cola para reanudar".into(),
                )),
            };
        };

        let outcome = self
            .connector
            .resolve_tracks(query)
            .await
            .map_err(CommandError::from)?;

        match outcome {
            LoadOutcome::Empty => Err(CommandError::User(format!(
                "sin resultados para «{query}»"
            ))),
            LoadOutcome::Failed { message } => Err(CommandError::User(format!(
                "no se pudo cargar la pista: {message}"
            ))),
            LoadOutcome::Track(info) => {
                let track = info.into_track(ctx.user_id);
                self.enqueue_single(&mut session, guild_id, track).await
            }
            LoadOutcome::Search(results) => {
                let Some(first) = results.into_iter().next() else {
                    return Err(CommandError::User(format!(
                        "sin resultados para «{query}»"
                    )));
                };
                let track = first.into_track(ctx.user_id);
                self.enqueue_single(&mut session, guild_id, track).await
            }
            LoadOutcome::Playlist { name, tracks } => {
                let tracks: Vec<Track> = tracks
                    .into_iter()
                    .map(|info| info.into_track(ctx.user_id))
                    .collect();
                if tracks.is_empty() {
                    return Err(CommandError::User("la playlist está vacía".into()));
                }

                // Las playlists solo se encolan; pero si la cola estaba
                // vacía su primera pista pasa a ser la cabeza y debe sonar
                if session.queue.is_empty() {
                    let head = tracks[0].clone();
                    self.issue_checked(&mut session, guild_id, &NodeCommand::Play(head))
                        .await?;
                    session.playback.paused = false;
                }
                let added = session.queue.enqueue_many(tracks);
                if added == 0 {
                    return Err(CommandError::User("la cola está llena".into()));
                }
                session.touch();
                Ok(CommandReply::PlaylistQueued { name, added })
            }
        }
    }

    /// Encola una pista; si la cola estaba vacía la manda a sonar primero
    /// para que el reintento tras un fallo del nodo no duplique nada.
    async fn enqueue_single(
        &self,
        session: &mut GuildVoiceSession,
        guild_id: GuildId,
        track: Track,
    ) -> CommandResult {
        let was_empty = session.queue.is_empty();
        if was_empty {
            self.issue_checked(session, guild_id, &NodeCommand::Play(track.clone()))
                .await?;
            session.playback.paused = false;
        }

        session
            .queue
            .enqueue(track.clone())
            .map_err(|e| CommandError::User(e.to_string()))?;
        session.touch();

        if was_empty {
            Ok(CommandReply::Started { track })
        } else {
            Ok(CommandReply::TrackQueued {
                position: session.queue.len() - 1,
                track,
            })
        }
    }

    /// Descarta la cabeza y promueve la siguiente pista, o detiene la
    /// reproducción si no queda ninguna.
    pub async fn skip(&self, ctx: &CommandContext) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let slot = self.registry.get(guild_id).ok_or(CommandError::NotConnected)?;
        let mut session = slot.lock().await;
        Self::ensure_connected(&session)?;

        if session.queue.is_empty() {
            return Err(CommandError::User("la cola está vacía".into()));
        }

        if let Some(finished) = session.queue.pop_head() {
            debug!("⏭️ Saltada: {}", finished.title);
        }

        let next = session.queue.peek_head().cloned();
        match next {
            Some(track) => {
                self.issue_checked(&mut session, guild_id, &NodeCommand::Play(track.clone()))
                    .await?;
                session.playback.paused = false;
                session.touch();
                Ok(CommandReply::Skipped { next: Some(track) })
            }
            None => {
                self.issue_checked(&mut session, guild_id, &NodeCommand::Stop)
                    .await?;
                session.touch();
                Ok(CommandReply::Skipped { next: None })
            }
        }
    }

    /// Detiene la reproducción y limpia la cola, sin salir del canal
    pub async fn stop(&self, ctx: &CommandContext) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let slot = self.registry.get(guild_id).ok_or(CommandError::NotConnected)?;
        let mut session = slot.lock().await;
        Self::ensure_connected(&session)?;

        self.issue_checked(&mut session, guild_id, &NodeCommand::Stop)
            .await?;
        session.queue.clear();
        session.playback.paused = false;
        session.touch();
        Ok(CommandReply::Stopped)
    }

    pub async fn pause(&self, ctx: &CommandContext) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let slot = self.registry.get(guild_id).ok_or(CommandError::NotConnected)?;
        let mut session = slot.lock().await;
        Self::ensure_connected(&session)?;

        self.issue_checked(&mut session, guild_id, &NodeCommand::SetPaused(true))
            .await?;
        session.playback.paused = true;
        session.touch();
        Ok(CommandReply::Paused)
    }

    pub async fn seek(&self, ctx: &CommandContext, position_ms: u64) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let slot = self.registry.get(guild_id).ok_or(CommandError::NotConnected)?;
        let mut session = slot.lock().await;
        Self::ensure_connected(&session)?;

        let Some(head) = session.queue.peek_head() else {
            return Err(CommandError::User("no suena nada en este momento".into()));
        };
        if let Some(duration_ms) = head.duration_ms {
            if position_ms > duration_ms {
                return Err(CommandError::User(
                    "la posición está fuera de la duración de la pista".into(),
                ));
            }
        }

        self.issue_checked(&mut session, guild_id, &NodeCommand::Seek(position_ms))
            .await?;
        session.touch();
        Ok(CommandReply::Seeked { position_ms })
    }

    pub async fn volume(&self, ctx: &CommandContext, level: i64) -> CommandResult {
        if !(0..=200).contains(&level) {
            return Err(CommandError::User(
                "el volumen debe estar entre 0 y 200".into(),
            ));
        }
        let level = level as u16;

        let guild_id = Self::require_guild(ctx)?;
        let slot = self.registry.get(guild_id).ok_or(CommandError::NotConnected)?;
        let mut session = slot.lock().await;
        Self::ensure_connected(&session)?;

        self.issue_checked(&mut session, guild_id, &NodeCommand::SetVolume(level))
            .await?;
        session.playback.volume = level;
        session.touch();
        Ok(CommandReply::VolumeSet { level })
    }

    /// Mezcla la cola dejando la cabeza en su lugar; como la pista en
    /// reproducción no cambia, no se reenvía nada al nodo.
    pub async fn shuffle(&self, ctx: &CommandContext) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let slot = self.registry.get(guild_id).ok_or(CommandError::NotConnected)?;
        let mut session = slot.lock().await;
        Self::ensure_connected(&session)?;

        let count = session.queue.len().saturating_sub(1);
        session.queue.shuffle_remainder();
        session.touch();
        Ok(CommandReply::Shuffled { count })
    }

    pub async fn repeat(&self, ctx: &CommandContext, enabled: bool) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let slot = self.registry.get(guild_id).ok_or(CommandError::NotConnected)?;
        let mut session = slot.lock().await;
        Self::ensure_connected(&session)?;

        self.issue_checked(&mut session, guild_id, &NodeCommand::SetRepeat(enabled))
            .await?;
        session.playback.repeat = enabled;
        session.touch();
        Ok(CommandReply::RepeatSet { enabled })
    }

    /// Pista en reproducción con la posición reportada por el nodo
    pub async fn now_playing(&self, ctx: &CommandContext) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;
        let slot = self.registry.get(guild_id).ok_or(CommandError::NotConnected)?;
        let mut session = slot.lock().await;
        Self::ensure_connected(&session)?;

        let Some(track) = session.queue.peek_head().cloned() else {
            return Err(CommandError::User("no suena nada en este momento".into()));
        };

        match self.connector.query_state(guild_id).await {
            Ok(Some(view)) => {
                if let Some(node_track) = &view.track {
                    if node_track.uri != track.uri {
                        debug!(
                            "el nodo reporta otra pista ({}) para guild {guild_id}",
                            node_track.title
                        );
                    }
                }
                Ok(CommandReply::NowPlaying {
                    track,
                    position_ms: view.position_ms,
                    paused: view.paused,
                    volume: view.volume,
                    repeat: view.repeat,
                })
            }
            Ok(None) => {
                self.node_session_lost(&mut session, guild_id);
                Err(CommandError::NotConnected)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Instantánea de la cola: cabeza en reproducción + pendientes
    pub async fn queue(&self, ctx: &CommandContext) -> CommandResult {
        let guild_id = Self::require_guild(ctx)?;

        let snapshot = self
            .registry
            .with_session(guild_id, |session| {
                let mut upcoming = session.queue.snapshot();
                let current = if upcoming.is_empty() {
                    None
                } else {
                    Some(upcoming.remove(0))
                };

                CommandReply::QueueSnapshot {
                    current,
                    upcoming,
                    repeat: session.playback.repeat,
                    paused: session.playback.paused,
                    volume: session.playback.volume,
                }
            })
            .await;

        snapshot.ok_or_else(|| {
            CommandError::User("no estoy conectado, la cola está vacía".into())
        })
    }

    // ---- mantenimiento ----

    /// Barrido periódico: desconecta sesiones conectadas con la cola
    /// vacía que llevan demasiado tiempo sin actividad.
    pub fn spawn_idle_sweeper(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                coordinator.sweep_idle().await;
            }
        });
    }

    async fn sweep_idle(&self) {
        let idle_after = self.config.idle_timeout();
        for guild_id in self.registry.guilds() {
            let Some(slot) = self.registry.get(guild_id) else {
                continue;
            };
            // Nunca esperar detrás de un comando largo
            let Some(mut session) = slot.try_lock() else {
                continue;
            };

            let idle = session.state == SessionState::Connected
                && session.queue.is_empty()
                && session.last_activity.elapsed() >= idle_after;
            if !idle {
                continue;
            }

            info!("💤 Desconexión por inactividad en guild {guild_id}");
            session.state = SessionState::Disconnecting;
            self.leave_best_effort(guild_id).await;
            if let Err(e) = self.connector.destroy_player(guild_id).await {
                debug!("limpieza del player inactivo falló: {e}");
            }
            session.reset_connection();
            drop(session);
            self.registry.remove(guild_id);
        }
    }

    // ---- helpers ----

    fn require_guild(ctx: &CommandContext) -> Result<GuildId, CommandError> {
        ctx.guild_id.ok_or_else(|| {
            CommandError::User("los comandos de música no funcionan por mensaje directo".into())
        })
    }

    fn ensure_connected(session: &GuildVoiceSession) -> Result<(), CommandError> {
        if session.state == SessionState::Connected {
            Ok(())
        } else {
            Err(CommandError::NotConnected)
        }
    }

    /// Envía un comando al nodo; si este ya no conoce la sesión de la
    /// guild, la desmonta y lo reporta como aviso de desconexión.
    async fn issue_checked(
        &self,
        session: &mut GuildVoiceSession,
        guild_id: GuildId,
        command: &NodeCommand,
    ) -> Result<(), CommandError> {
        match self.connector.issue_command(guild_id, command).await {
            Ok(()) => Ok(()),
            Err(NodeError::NotConnected) if session.state == SessionState::Connected => {
                self.node_session_lost(session, guild_id);
                Err(CommandError::NotConnected)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn node_session_lost(&self, session: &mut GuildVoiceSession, guild_id: GuildId) {
        warn!("🔌 El nodo ya no conoce la sesión de voz de guild {guild_id}");
        self.connector.mark_gone(guild_id);
        session.reset_connection();
        session.queue.clear();
        self.registry.remove(guild_id);
    }
}
