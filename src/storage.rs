use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, warn};

/// Preferencias persistentes por servidor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Volumen inicial configurado para el servidor, si existe
    async fn default_volume(&self, guild_id: GuildId) -> Result<Option<u8>>;

    /// Guarda el volumen inicial del servidor
    async fn set_default_volume(&self, guild_id: GuildId, volume: u8) -> Result<()>;
}

/// Configuración de servidor almacenada en JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub default_volume: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GuildSettings {
    pub fn new(guild_id: u64, default_volume: u8) -> Self {
        let now = Utc::now();
        Self {
            guild_id,
            default_volume: default_volume.min(100),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Manager de almacenamiento basado en archivos JSON
pub struct JsonStorage {
    data_dir: PathBuf,
    servers_cache: DashMap<u64, GuildSettings>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        let servers_dir = data_dir.join("servers");
        fs::create_dir_all(&servers_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", servers_dir.display()))?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let storage = Self {
            data_dir,
            servers_cache: DashMap::new(),
        };

        // Cargar configuraciones existentes
        storage.load_all_servers().await?;

        Ok(storage)
    }

    /// Obtiene la configuración de un servidor, si fue guardada alguna vez
    pub async fn get_settings(&self, guild_id: u64) -> Result<Option<GuildSettings>> {
        if let Some(settings) = self.servers_cache.get(&guild_id) {
            return Ok(Some(settings.clone()));
        }

        let path = self.get_server_file_path(guild_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let settings = self.load_server_settings(guild_id).await?;
        self.servers_cache.insert(guild_id, settings.clone());
        Ok(Some(settings))
    }

    /// Actualiza la configuración de un servidor
    pub async fn update_settings(&self, mut settings: GuildSettings) -> Result<()> {
        settings.default_volume = settings.default_volume.min(100);
        settings.updated_at = Utc::now();

        self.save_server_settings(&settings).await?;
        info!("💾 Configuración actualizada para guild {}", settings.guild_id);
        self.servers_cache.insert(settings.guild_id, settings);
        Ok(())
    }

    /// Lista los servidores con configuración guardada
    pub fn list_servers(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.servers_cache.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Limpia configuraciones de servidores que ya no existen
    pub async fn cleanup_old_configs(&self, active_guilds: &[u64]) -> Result<usize> {
        let mut removed_count = 0;

        for guild_id in self.list_servers() {
            if active_guilds.contains(&guild_id) {
                continue;
            }

            match fs::remove_file(self.get_server_file_path(guild_id)).await {
                Ok(_) => {
                    self.servers_cache.remove(&guild_id);
                    removed_count += 1;
                    info!("🗑️ Configuración eliminada para guild inactiva: {}", guild_id);
                }
                Err(e) => {
                    error!("Error eliminando configuración para guild {}: {}", guild_id, e);
                }
            }
        }

        Ok(removed_count)
    }

    // Métodos privados

    async fn load_server_settings(&self, guild_id: u64) -> Result<GuildSettings> {
        let file_path = self.get_server_file_path(guild_id);
        let content = fs::read_to_string(&file_path).await?;
        let settings: GuildSettings = serde_json::from_str(&content)
            .with_context(|| format!("JSON inválido en {}", file_path.display()))?;
        Ok(settings)
    }

    async fn save_server_settings(&self, settings: &GuildSettings) -> Result<()> {
        let file_path = self.get_server_file_path(settings.guild_id);
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&file_path, content).await?;
        Ok(())
    }

    async fn load_all_servers(&self) -> Result<()> {
        let servers_dir = self.data_dir.join("servers");
        let mut files = fs::read_dir(&servers_dir).await?;
        let mut loaded_count = 0;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let guild_id = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok());

            let Some(guild_id) = guild_id else {
                continue;
            };

            match self.load_server_settings(guild_id).await {
                Ok(settings) => {
                    self.servers_cache.insert(guild_id, settings);
                    loaded_count += 1;
                }
                Err(e) => {
                    warn!("Error cargando configuración para guild {}: {:#}", guild_id, e);
                }
            }
        }

        if loaded_count > 0 {
            info!("📂 Cargadas {} configuraciones de servidor", loaded_count);
        }

        Ok(())
    }

    fn get_server_file_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir
            .join("servers")
            .join(format!("guild_{}.json", guild_id))
    }
}

#[async_trait]
impl SettingsStore for JsonStorage {
    async fn default_volume(&self, guild_id: GuildId) -> Result<Option<u8>> {
        Ok(self
            .get_settings(guild_id.get())
            .await?
            .map(|s| s.default_volume))
    }

    async fn set_default_volume(&self, guild_id: GuildId, volume: u8) -> Result<()> {
        let settings = match self.get_settings(guild_id.get()).await? {
            Some(mut settings) => {
                settings.default_volume = volume;
                settings
            }
            None => GuildSettings::new(guild_id.get(), volume),
        };
        self.update_settings(settings).await
    }
}
