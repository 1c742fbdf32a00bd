use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        queue::DEFAULT_MAX_HISTORY,
        session::{Session, SessionHooks, DEFAULT_VOLUME},
    },
    storage::SettingsStore,
};

/// Construye los hooks de una sesión nueva a partir de su guild
pub type HooksFactory = Arc<dyn Fn(GuildId) -> SessionHooks + Send + Sync>;

/// Tabla de sesiones activas por servidor.
///
/// Es el único estado compartido entre servidores: cada sesión se crea
/// bajo demanda con el volumen guardado del servidor y se descarta cuando
/// el canal de voz queda vacío.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<Session>>,
    settings: Option<Arc<dyn SettingsStore>>,
    hooks: Option<HooksFactory>,
    default_volume: u8,
    max_history: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            settings: None,
            hooks: None,
            default_volume: DEFAULT_VOLUME,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_hooks<F>(mut self, factory: F) -> Self
    where
        F: Fn(GuildId) -> SessionHooks + Send + Sync + 'static,
    {
        self.hooks = Some(Arc::new(factory));
        self
    }

    pub fn with_default_volume(mut self, volume: u8) -> Self {
        self.default_volume = volume.min(100);
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    /// Devuelve la sesión del servidor o crea una nueva
    pub async fn get_or_create(&self, guild_id: GuildId) -> Arc<Session> {
        if let Some(session) = self.get(guild_id) {
            return session;
        }

        // el volumen se consulta fuera del mapa para no retener el shard durante el await
        let volume = self.initial_volume(guild_id).await;

        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                let hooks = self
                    .hooks
                    .as_ref()
                    .map(|factory| factory(guild_id))
                    .unwrap_or_default();

                info!("🆕 Sesión creada para guild {} (volumen {}%)", guild_id, volume);
                Arc::new(
                    Session::new(guild_id, volume)
                        .with_max_history(self.max_history)
                        .with_hooks(hooks),
                )
            })
            .clone()
    }

    async fn initial_volume(&self, guild_id: GuildId) -> u8 {
        let Some(settings) = &self.settings else {
            return self.default_volume;
        };

        match settings.default_volume(guild_id).await {
            Ok(Some(volume)) => volume.min(100),
            Ok(None) => self.default_volume,
            Err(e) => {
                warn!("⚠️ No se pudo leer la configuración de guild {}: {:#}", guild_id, e);
                self.default_volume
            }
        }
    }

    /// Detiene y descarta la sesión del servidor
    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(&guild_id)?;
        session.stop();
        session.detach_transport();
        info!("👋 Sesión eliminada para guild {}", guild_id);
        Some(session)
    }

    /// Cambio de oyentes en el canal de voz; sin oyentes se libera la sesión
    pub fn on_listeners_changed(&self, guild_id: GuildId, listeners: usize) -> bool {
        debug!("👥 {} oyentes en guild {}", listeners, guild_id);
        if listeners > 0 {
            return false;
        }
        self.remove(guild_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    /// Detiene todas las sesiones
    pub fn shutdown(&self) {
        let guilds = self.guilds();
        for guild_id in &guilds {
            self.remove(*guild_id);
        }
        if !guilds.is_empty() {
            info!("⏹️ {} sesiones detenidas", guilds.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{session::PlayState, transport::ChannelTransport},
        storage::MockSettingsStore,
    };
    use mockall::predicate::eq;
    use serenity::model::id::ChannelId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_get_or_create_returns_same_session() {
        let registry = SessionRegistry::new();
        assert!(registry.get(GuildId::new(1)).is_none());

        let a = registry.get_or_create(GuildId::new(1)).await;
        let b = registry.get_or_create(GuildId::new(1)).await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.volume(), DEFAULT_VOLUME);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_volume_comes_from_settings() {
        let mut store = MockSettingsStore::new();
        store
            .expect_default_volume()
            .with(eq(GuildId::new(5)))
            .times(1)
            .returning(|_| Ok(Some(80)));
        store
            .expect_default_volume()
            .with(eq(GuildId::new(6)))
            .returning(|_| Ok(None));
        store
            .expect_default_volume()
            .with(eq(GuildId::new(7)))
            .returning(|_| Err(anyhow::anyhow!("disco lleno")));

        let registry = SessionRegistry::new()
            .with_settings(Arc::new(store))
            .with_default_volume(40);

        assert_eq!(registry.get_or_create(GuildId::new(5)).await.volume(), 80);
        assert_eq!(registry.get_or_create(GuildId::new(5)).await.volume(), 80);
        assert_eq!(registry.get_or_create(GuildId::new(6)).await.volume(), 40);
        assert_eq!(registry.get_or_create(GuildId::new(7)).await.volume(), 40);
    }

    #[tokio::test]
    async fn test_hooks_factory_is_used() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let registry = SessionRegistry::new().with_hooks(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            SessionHooks::default()
        });

        registry.get_or_create(GuildId::new(1)).await;
        registry.get_or_create(GuildId::new(1)).await;
        registry.get_or_create(GuildId::new(2)).await;

        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_channel_removes_session() {
        let registry = SessionRegistry::new();
        let session = registry.get_or_create(GuildId::new(1)).await;
        let (transport, _frames) = ChannelTransport::new(ChannelId::new(2), 4);
        session.attach_transport(Arc::new(transport));

        assert!(!registry.on_listeners_changed(GuildId::new(1), 3));
        assert!(registry.get(GuildId::new(1)).is_some());

        assert!(registry.on_listeners_changed(GuildId::new(1), 0));
        assert!(registry.get(GuildId::new(1)).is_none());
        assert_eq!(session.state(), PlayState::Stopped);
        assert!(session.transport().is_none());

        assert!(!registry.on_listeners_changed(GuildId::new(1), 0));
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let registry = SessionRegistry::new();
        registry.get_or_create(GuildId::new(1)).await;
        registry.get_or_create(GuildId::new(2)).await;

        registry.shutdown();
        assert!(registry.is_empty());
    }
}
