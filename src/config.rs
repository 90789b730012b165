use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Nodo de audio
    pub node_host: String,
    pub node_port: u16,
    pub node_password: String,
    pub node_secure: bool,

    // Tiempos de la máquina de conexión
    pub handshake_timeout_ms: u64,
    pub node_ack_timeout_ms: u64,
    pub node_retry_attempts: u32,
    pub node_retry_base_ms: u64,

    // Límites
    pub max_queue_size: usize,
    pub idle_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Nodo de audio
            node_host: std::env::var("NODE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            node_port: std::env::var("NODE_PORT")
                .unwrap_or_else(|_| "2333".to_string())
                .parse()?,
            node_password: std::env::var("NODE_PASSWORD")?,
            node_secure: std::env::var("NODE_SECURE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            // Tiempos (el handshake debería resolverse en pocos segundos)
            handshake_timeout_ms: std::env::var("HANDSHAKE_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            node_ack_timeout_ms: std::env::var("NODE_ACK_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            node_retry_attempts: std::env::var("NODE_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            node_retry_base_ms: std::env::var("NODE_RETRY_BASE_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()?,

            // Límites
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            idle_timeout_secs: std::env::var("IDLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Sanidad básica de los valores antes de arrancar
    pub fn validate(&self) -> Result<()> {
        if self.node_port == 0 {
            anyhow::bail!("NODE_PORT no puede ser 0");
        }

        if self.handshake_timeout_ms == 0 || self.node_ack_timeout_ms == 0 {
            anyhow::bail!("los timeouts de conexión deben ser mayores a 0");
        }

        if self.node_retry_attempts == 0 {
            anyhow::bail!("NODE_RETRY_ATTEMPTS debe ser al menos 1");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("MAX_QUEUE_SIZE debe ser mayor a 0");
        }

        if self.idle_timeout_secs == 0 {
            anyhow::bail!("IDLE_TIMEOUT_SECS debe ser mayor a 0");
        }

        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn node_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.node_ack_timeout_ms)
    }

    pub fn node_retry_base(&self) -> Duration {
        Duration::from_millis(self.node_retry_base_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Valores por defecto, usados como base en pruebas y como referencia de
/// los fallbacks de `load`.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin defaults reales - deben proveerse)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Nodo de audio
            node_host: "localhost".into(),
            node_port: 2333,
            node_password: String::new(),
            node_secure: false,

            // Tiempos
            handshake_timeout_ms: 5000,
            node_ack_timeout_ms: 5000,
            node_retry_attempts: 3,
            node_retry_base_ms: 250,

            // Límites
            max_queue_size: 1000,
            idle_timeout_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zeroed_limits_are_rejected() {
        let mut config = Config::default();
        config.max_queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.handshake_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.node_retry_attempts = 0;
        assert!(config.validate().is_err());
    }
}
