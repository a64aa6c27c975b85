use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: u8,
    pub max_queue_size: usize,

    // Tiempos (segundos)
    pub inactivity_timeout_secs: u64,
    pub backend_timeout_secs: u64,
    pub search_timeout_secs: u64,

    // Dependencias externas
    pub ytdlp_path: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Construye la configuración a partir de una fuente de variables
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            discord_token: lookup("DISCORD_TOKEN")
                .filter(|token| !token.trim().is_empty())
                .context("DISCORD_TOKEN no está definido")?,
            guild_id: lookup("GUILD_ID")
                .and_then(|s| s.trim().parse().ok())
                .filter(|id| *id != 0),

            default_volume: parse_or(&lookup, "DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: parse_or(&lookup, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,

            inactivity_timeout_secs: parse_or(
                &lookup,
                "INACTIVITY_TIMEOUT_SECS",
                defaults.inactivity_timeout_secs,
            )?,
            backend_timeout_secs: parse_or(&lookup, "BACKEND_TIMEOUT_SECS", defaults.backend_timeout_secs)?,
            search_timeout_secs: parse_or(&lookup, "SEARCH_TIMEOUT_SECS", defaults.search_timeout_secs)?,

            ytdlp_path: lookup("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Volume must be between 0 and 100
    /// - Queue size and every timeout must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.inactivity_timeout_secs == 0 {
            anyhow::bail!("Inactivity timeout must be greater than 0");
        }

        if self.backend_timeout_secs == 0 || self.search_timeout_secs == 0 {
            anyhow::bail!("Backend and search timeouts must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: Guild {}\n  \
            Audio: {}% vol, {} max queue\n  \
            Timeouts: {}s inactivity, {}s backend, {}s search\n  \
            yt-dlp: {}",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.max_queue_size,
            self.inactivity_timeout_secs,
            self.backend_timeout_secs,
            self.search_timeout_secs,
            self.ytdlp_path
        )
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            default_volume: 50,
            max_queue_size: 1000,

            inactivity_timeout_secs: 300, // 5 minutos
            backend_timeout_secs: 15,
            search_timeout_secs: 30,

            ytdlp_path: "yt-dlp".to_string(),
        }
    }
}
