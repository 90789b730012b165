use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use tracing::debug;

/// Las dos mitades del handshake de voz ya emparejadas, listas para
/// reenviarse al nodo de audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedHandshake {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub session_id: String,
    pub endpoint: String,
    pub token: String,
}

#[derive(Debug, Default)]
struct PendingHandshake {
    channel_id: Option<ChannelId>,
    session_id: Option<String>,
    endpoint: Option<String>,
    token: Option<String>,
}

impl PendingHandshake {
    fn is_complete(&self) -> bool {
        self.channel_id.is_some()
            && self.session_id.is_some()
            && self.endpoint.is_some()
            && self.token.is_some()
    }

    fn into_handshake(self, guild_id: GuildId) -> Option<CompletedHandshake> {
        Some(CompletedHandshake {
            guild_id,
            channel_id: self.channel_id?,
            session_id: self.session_id?,
            endpoint: self.endpoint?,
            token: self.token?,
        })
    }
}

/// Empareja los dos eventos del gateway que forman un handshake de voz.
///
/// Los eventos llegan en cualquier orden y desde fuera de la
/// serialización por guild, así que cada mitad se guarda bajo el lock de
/// entrada de la DashMap (atómico por guild). Al completarse ambas
/// mitades del intento vigente se emite el handshake exactamente una vez
/// y se descarta el estado pendiente. Los timeouts no viven aquí; son
/// responsabilidad del que espera la conexión.
#[derive(Debug, Default)]
pub struct HandshakeCorrelator {
    pending: DashMap<GuildId, PendingHandshake>,
}

impl HandshakeCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalida cualquier mitad sobrante de un intento anterior.
    /// Debe llamarse al iniciar cada intento de conexión.
    pub fn begin_attempt(&self, guild_id: GuildId) {
        if self.pending.remove(&guild_id).is_some() {
            debug!("🧹 Mitades de handshake obsoletas descartadas en guild {guild_id}");
        }
    }

    /// Descarta el estado pendiente de una guild
    pub fn discard(&self, guild_id: GuildId) {
        self.pending.remove(&guild_id);
    }

    /// Mitad de voice-state: identidad de sesión y canal.
    /// Un `channel_id` nulo significa que salimos de voz; descarta todo.
    pub fn submit_state_half(
        &self,
        guild_id: GuildId,
        session_id: &str,
        channel_id: Option<ChannelId>,
    ) -> Option<CompletedHandshake> {
        let Some(channel_id) = channel_id else {
            self.pending.remove(&guild_id);
            return None;
        };

        match self.pending.entry(guild_id) {
            Entry::Occupied(mut occupied) => {
                let half = occupied.get_mut();
                half.session_id = Some(session_id.to_owned());
                half.channel_id = Some(channel_id);
                if half.is_complete() {
                    occupied.remove().into_handshake(guild_id)
                } else {
                    None
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingHandshake {
                    channel_id: Some(channel_id),
                    session_id: Some(session_id.to_owned()),
                    ..PendingHandshake::default()
                });
                None
            }
        }
    }

    /// Mitad de voice-server: endpoint y token del servidor de voz
    pub fn submit_server_half(
        &self,
        guild_id: GuildId,
        endpoint: &str,
        token: &str,
    ) -> Option<CompletedHandshake> {
        match self.pending.entry(guild_id) {
            Entry::Occupied(mut occupied) => {
                let half = occupied.get_mut();
                half.endpoint = Some(endpoint.to_owned());
                half.token = Some(token.to_owned());
                if half.is_complete() {
                    occupied.remove().into_handshake(guild_id)
                } else {
                    None
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingHandshake {
                    endpoint: Some(endpoint.to_owned()),
                    token: Some(token.to_owned()),
                    ..PendingHandshake::default()
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId::new(1001);
    const CHANNEL: ChannelId = ChannelId::new(2002);

    #[test]
    fn pairs_state_then_server() {
        let correlator = HandshakeCorrelator::new();
        correlator.begin_attempt(GUILD);

        assert!(correlator
            .submit_state_half(GUILD, "sess-1", Some(CHANNEL))
            .is_none());
        let handshake = correlator
            .submit_server_half(GUILD, "voice.example.gg:443", "tok")
            .expect("ambas mitades presentes");

        assert_eq!(handshake.guild_id, GUILD);
        assert_eq!(handshake.channel_id, CHANNEL);
        assert_eq!(handshake.session_id, "sess-1");
        assert_eq!(handshake.endpoint, "voice.example.gg:443");
        assert_eq!(handshake.token, "tok");
    }

    #[test]
    fn pairs_server_then_state() {
        let correlator = HandshakeCorrelator::new();
        correlator.begin_attempt(GUILD);

        assert!(correlator
            .submit_server_half(GUILD, "voice.example.gg:443", "tok")
            .is_none());
        let handshake = correlator
            .submit_state_half(GUILD, "sess-1", Some(CHANNEL))
            .expect("ambas mitades presentes");

        assert_eq!(handshake.session_id, "sess-1");
        assert_eq!(handshake.token, "tok");
    }

    #[test]
    fn emits_exactly_once() {
        let correlator = HandshakeCorrelator::new();
        correlator.submit_state_half(GUILD, "sess-1", Some(CHANNEL));
        assert!(correlator
            .submit_server_half(GUILD, "voice.example.gg:443", "tok")
            .is_some());

        // El estado pendiente se consumió con la emisión
        assert!(correlator
            .submit_server_half(GUILD, "voice.example.gg:443", "tok")
            .is_none());
    }

    #[test]
    fn null_channel_discards_pending() {
        let correlator = HandshakeCorrelator::new();
        correlator.submit_server_half(GUILD, "voice.example.gg:443", "tok");

        assert!(correlator.submit_state_half(GUILD, "sess-1", None).is_none());

        // La mitad de server quedó descartada; una mitad de state fresca
        // no puede emparejarse con ella
        assert!(correlator
            .submit_state_half(GUILD, "sess-2", Some(CHANNEL))
            .is_none());
    }

    #[test]
    fn new_attempt_invalidates_stale_half() {
        let correlator = HandshakeCorrelator::new();
        correlator.submit_server_half(GUILD, "stale.example.gg:443", "stale-tok");

        correlator.begin_attempt(GUILD);

        // La mitad vieja nunca se empareja con la nueva
        assert!(correlator
            .submit_state_half(GUILD, "sess-2", Some(CHANNEL))
            .is_none());
        let handshake = correlator
            .submit_server_half(GUILD, "fresh.example.gg:443", "fresh-tok")
            .expect("intento nuevo completo");
        assert_eq!(handshake.endpoint, "fresh.example.gg:443");
        assert_eq!(handshake.token, "fresh-tok");
    }

    #[test]
    fn guilds_are_isolated() {
        let other = GuildId::new(9009);
        let correlator = HandshakeCorrelator::new();

        correlator.submit_state_half(GUILD, "sess-a", Some(CHANNEL));
        assert!(correlator
            .submit_server_half(other, "voice.example.gg:443", "tok")
            .is_none());
        assert!(correlator
            .submit_server_half(GUILD, "voice.example.gg:443", "tok")
            .is_some());
    }
}
