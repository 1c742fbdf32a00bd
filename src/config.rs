use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::{
    audio::{encoder::DEFAULT_BITRATE, player::DEFAULT_SEND_TIMEOUT, queue::DEFAULT_MAX_HISTORY, session::DEFAULT_VOLUME},
    sources::youtube::DEFAULT_COMMAND_TIMEOUT,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Audio
    pub default_volume: u8,
    pub opus_bitrate: u32,
    pub send_timeout: Duration,
    pub frame_buffer: usize,
    pub max_history: usize,

    // Herramientas externas
    pub ffmpeg_path: PathBuf,
    pub ytdlp_path: PathBuf,
    pub command_timeout: Duration,
    pub stream_url_ttl: Duration,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("No se pudo crear {}", config.data_dir.display()))?;

        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let number = |key: &str, default: String| var(key).unwrap_or(default);

        let duration = |key: &str, default: Duration| -> Result<Duration> {
            match var(key) {
                Some(raw) => humantime::parse_duration(raw.trim())
                    .with_context(|| format!("{} no es una duración válida: {}", key, raw)),
                None => Ok(default),
            }
        };

        let config = Self {
            // Audio
            default_volume: number("DEFAULT_VOLUME", defaults.default_volume.to_string())
                .parse()
                .context("DEFAULT_VOLUME debe ser un entero entre 0 y 100")?,
            opus_bitrate: number("OPUS_BITRATE", defaults.opus_bitrate.to_string())
                .parse()
                .context("OPUS_BITRATE inválido")?,
            send_timeout: duration("SEND_TIMEOUT", defaults.send_timeout)?,
            frame_buffer: number("FRAME_BUFFER", defaults.frame_buffer.to_string())
                .parse()
                .context("FRAME_BUFFER inválido")?,
            max_history: number("MAX_HISTORY", defaults.max_history.to_string())
                .parse()
                .context("MAX_HISTORY inválido")?,

            // Herramientas externas
            ffmpeg_path: var("FFMPEG_PATH").map(PathBuf::from).unwrap_or(defaults.ffmpeg_path),
            ytdlp_path: var("YTDLP_PATH").map(PathBuf::from).unwrap_or(defaults.ytdlp_path),
            command_timeout: duration("COMMAND_TIMEOUT", defaults.command_timeout)?,
            stream_url_ttl: duration("STREAM_URL_TTL", defaults.stream_url_ttl)?,

            // Paths
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 100
    /// - Opus bitrate must be between 8kbps and 510kbps
    /// - Timeouts and buffers must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.send_timeout.is_zero() {
            anyhow::bail!("Send timeout must be greater than 0");
        }

        if self.command_timeout.is_zero() {
            anyhow::bail!("Command timeout must be greater than 0");
        }

        if self.frame_buffer == 0 {
            anyhow::bail!("Frame buffer must be greater than 0");
        }

        if self.max_history == 0 {
            anyhow::bail!("Max history must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Audio: {}% vol, {}kbps, {} send timeout, {} frame buffer\n  \
            Queue: {} history entries\n  \
            Tools: ffmpeg={}, yt-dlp={} ({} timeout)\n  \
            Cache: stream URLs for {}\n  \
            Data: {}",
            self.default_volume,
            self.opus_bitrate / 1000,
            humantime::format_duration(self.send_timeout),
            self.frame_buffer,
            self.max_history,
            self.ffmpeg_path.display(),
            self.ytdlp_path.display(),
            humantime::format_duration(self.command_timeout),
            humantime::format_duration(self.stream_url_ttl),
            self.data_dir.display(),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Audio defaults
            default_volume: DEFAULT_VOLUME,
            opus_bitrate: DEFAULT_BITRATE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            frame_buffer: 50, // 1s de audio
            max_history: DEFAULT_MAX_HISTORY,

            // Tool defaults
            ffmpeg_path: "ffmpeg".into(),
            ytdlp_path: "yt-dlp".into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            stream_url_ttl: Duration::from_secs(30 * 60),

            // Path defaults
            data_dir: "./data".into(),
        }
    }
}
