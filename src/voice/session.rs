use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::voice::handshake::CompletedHandshake;
use crate::voice::queue::PlaybackQueue;

/// Estados del ciclo de vida de una sesión de voz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    AwaitingHandshake,
    Connecting,
    Connected,
    Disconnecting,
}

/// Estado de reproducción visible al usuario
#[derive(Debug, Clone, Copy)]
pub struct PlaybackSettings {
    pub paused: bool,
    pub volume: u16,
    pub repeat: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            paused: false,
            volume: 100,
            repeat: false,
        }
    }
}

/// Sesión de voz de una guild, propiedad exclusiva del registro.
///
/// Invariante: en `Connected` los cuatro campos del handshake están
/// presentes y provienen del mismo intento de conexión.
#[derive(Debug)]
pub struct GuildVoiceSession {
    pub guild_id: GuildId,
    pub state: SessionState,
    pub channel_id: Option<ChannelId>,
    pub session_id: Option<String>,
    pub endpoint: Option<String>,
    #[allow(dead_code)]
    pub token: Option<String>,
    pub queue: PlaybackQueue,
    pub playback: PlaybackSettings,
    /// Presente solo mientras se espera el handshake
    pub pending_deadline: Option<Instant>,
    pub last_activity: Instant,
}

impl GuildVoiceSession {
    fn new(guild_id: GuildId, max_queue_size: usize) -> Self {
        Self {
            guild_id,
            state: SessionState::Disconnected,
            channel_id: None,
            session_id: None,
            endpoint: None,
            token: None,
            queue: PlaybackQueue::new(max_queue_size),
            playback: PlaybackSettings::default(),
            pending_deadline: None,
            last_activity: Instant::now(),
        }
    }

    /// Copia los campos de un handshake completado a la sesión
    pub fn apply_handshake(&mut self, handshake: &CompletedHandshake) {
        self.channel_id = Some(handshake.channel_id);
        self.session_id = Some(handshake.session_id.clone());
        self.endpoint = Some(handshake.endpoint.clone());
        self.token = Some(handshake.token.clone());
    }

    /// Vuelve a `Disconnected` descartando la identidad de conexión.
    /// La cola no se toca aquí; el que desmonta la sesión decide.
    pub fn reset_connection(&mut self) {
        debug!("sesión de guild {} vuelve a Disconnected", self.guild_id);
        self.state = SessionState::Disconnected;
        self.channel_id = None;
        self.session_id = None;
        self.endpoint = None;
        self.token = None;
        self.pending_deadline = None;
    }

    /// Identidad de la conexión vigente, para diagnósticos
    pub fn connection_info(&self) -> Option<(&str, &str)> {
        Some((self.session_id.as_deref()?, self.endpoint.as_deref()?))
    }

    /// Marca actividad para el temporizador de inactividad
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Ranura de una guild: la sesión tras su punto de serialización más el
/// token que permite cancelar un intento de conexión en vuelo sin tomar
/// el lock de la sesión.
pub struct GuildSlot {
    session: Mutex<GuildVoiceSession>,
    pending_cancel: parking_lot::Mutex<Option<CancellationToken>>,
}

impl GuildSlot {
    fn new(guild_id: GuildId, max_queue_size: usize) -> Self {
        Self {
            session: Mutex::new(GuildVoiceSession::new(guild_id, max_queue_size)),
            pending_cancel: parking_lot::Mutex::new(None),
        }
    }

    /// Acceso exclusivo a la sesión; se mantiene durante todo un comando,
    /// incluidos sus puntos de suspensión
    pub async fn lock(&self) -> MutexGuard<'_, GuildVoiceSession> {
        self.session.lock().await
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, GuildVoiceSession>> {
        self.session.try_lock().ok()
    }

    /// Instala un token fresco para el intento de conexión que comienza
    pub fn arm_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.pending_cancel.lock() = Some(token.clone());
        token
    }

    pub fn disarm_cancel(&self) {
        *self.pending_cancel.lock() = None;
    }

    /// Cancela el intento de conexión en vuelo, si lo hay
    pub fn cancel_pending(&self) -> bool {
        match self.pending_cancel.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Dueño del mapa `guild → sesión`.
///
/// Toda mutación de la sesión de una guild pasa por el lock de su ranura,
/// así que los comandos sobre una misma guild quedan totalmente ordenados
/// mientras guilds distintas avanzan en paralelo.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<GuildSlot>>,
    max_queue_size: usize,
}

impl SessionRegistry {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_queue_size,
        }
    }

    /// Crea la sesión en `Disconnected` si no existe
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildSlot> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 Sesión creada para guild {guild_id}");
                Arc::new(GuildSlot::new(guild_id, self.max_queue_size))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSlot>> {
        self.sessions.get(&guild_id).map(|slot| slot.clone())
    }

    /// Ejecuta `f` con acceso exclusivo a la sesión de la guild, si existe
    pub async fn with_session<T>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&mut GuildVoiceSession) -> T,
    ) -> Option<T> {
        let slot = self.get(guild_id)?;
        let mut session = slot.lock().await;
        Some(f(&mut session))
    }

    /// Destruye la sesión. Solo debe llamarse una vez que su dueño la
    /// dejó en `Disconnected`.
    pub fn remove(&self, guild_id: GuildId) {
        if self.sessions.remove(&guild_id).is_some() {
            debug!("🗑️ Sesión destruida para guild {guild_id}");
        } else {
            warn!("se pidió destruir una sesión inexistente para guild {guild_id}");
        }
    }

    /// Guilds con sesión viva, para el barrido de inactividad
    pub fn guilds(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const GUILD: GuildId = GuildId::new(3003);

    #[tokio::test]
    async fn get_or_create_returns_single_session_per_guild() {
        let registry = SessionRegistry::new(100);

        let first = registry.get_or_create(GUILD);
        let second = registry.get_or_create(GUILD);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.guilds(), vec![GUILD]);
    }

    #[tokio::test]
    async fn new_sessions_start_disconnected_with_defaults() {
        let registry = SessionRegistry::new(100);
        let slot = registry.get_or_create(GUILD);
        let session = slot.lock().await;

        assert_eq!(session.state, SessionState::Disconnected);
        assert!(!session.playback.paused);
        assert_eq!(session.playback.volume, 100);
        assert!(!session.playback.repeat);
        assert!(session.queue.is_empty());
        assert!(session.pending_deadline.is_none());
    }

    #[tokio::test]
    async fn guild_commands_are_totally_ordered() {
        let registry = Arc::new(SessionRegistry::new(100));
        registry.get_or_create(GUILD);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let slot = registry.get_or_create(GUILD);
                let mut session = slot.lock().await;
                // Sección crítica con un punto de suspensión adentro: si
                // la exclusión fallara, dos tareas verían el mismo volumen
                let seen = session.playback.volume;
                tokio::time::sleep(Duration::from_millis(5)).await;
                session.playback.volume = seen + 1;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let volume = registry
            .with_session(GUILD, |session| session.playback.volume)
            .await
            .unwrap();
        assert_eq!(volume, 108);
    }

    #[tokio::test]
    async fn cancel_pending_consumes_the_token() {
        let registry = SessionRegistry::new(100);
        let slot = registry.get_or_create(GUILD);

        let token = slot.arm_cancel();
        assert!(!token.is_cancelled());

        assert!(slot.cancel_pending());
        assert!(token.is_cancelled());
        // El segundo cancel no encuentra intento en vuelo
        assert!(!slot.cancel_pending());
    }

    #[tokio::test]
    async fn remove_frees_the_guild() {
        let registry = SessionRegistry::new(100);
        registry.get_or_create(GUILD);

        registry.remove(GUILD);

        assert!(registry.get(GUILD).is_none());
        assert!(registry.guilds().is_empty());
    }
}
