pub mod direct_url;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::UserId;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

pub use direct_url::DirectUrlResolver;
pub use youtube::YtDlpResolver;

use crate::{
    audio::{
        player::StreamResolver,
        track::{SourceKind, Track},
    },
    cache::{StreamUrlCache, STREAM_URL_CAPACITY},
    config::Config,
};

/// Trait común para todas las fuentes de música
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Verifica si la URL es válida para esta fuente
    fn handles(&self, url: &str) -> bool;

    /// Convierte una URL o búsqueda en uno o más tracks
    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>>;

    /// Obtiene la URL de audio reproducible de un track
    async fn resolve_stream_url(&self, track: &Track) -> Result<String>;

    /// Nombre de la fuente
    fn source_name(&self) -> &'static str;
}

/// Manager para todas las fuentes de música.
///
/// Elige el resolver por URL (o busca si la entrada no es una URL) y
/// guarda las URLs de stream resueltas durante un tiempo limitado.
pub struct SourceManager {
    resolvers: Vec<Arc<dyn TrackResolver>>,
    search: Arc<dyn TrackResolver>,
    stream_urls: StreamUrlCache,
}

impl SourceManager {
    pub fn new(config: &Config) -> Self {
        let youtube: Arc<dyn TrackResolver> = Arc::new(
            YtDlpResolver::new(&config.ytdlp_path).with_timeout(config.command_timeout),
        );

        Self::with_resolvers(
            vec![youtube.clone(), Arc::new(DirectUrlResolver::new())],
            youtube,
            config.stream_url_ttl,
        )
    }

    /// `resolvers` se prueban en orden; `search` atiende entradas que no son URL
    pub fn with_resolvers(
        resolvers: Vec<Arc<dyn TrackResolver>>,
        search: Arc<dyn TrackResolver>,
        stream_url_ttl: Duration,
    ) -> Self {
        Self {
            resolvers,
            search,
            stream_urls: StreamUrlCache::new(STREAM_URL_CAPACITY, Some(stream_url_ttl)),
        }
    }

    /// Clasifica una URL por plataforma
    pub fn classify(url: &str) -> SourceKind {
        if YtDlpResolver::is_youtube_url(url) {
            return SourceKind::YouTube;
        }

        match url::Url::parse(url) {
            Ok(parsed) => match parsed.host_str() {
                Some(host) if host == "open.spotify.com" || host.ends_with(".spotify.com") => {
                    SourceKind::Spotify
                }
                Some(_) if matches!(parsed.scheme(), "http" | "https") => SourceKind::Direct,
                _ => SourceKind::Unknown,
            },
            Err(_) => SourceKind::Unknown,
        }
    }

    fn is_url(query: &str) -> bool {
        url::Url::parse(query).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
    }

    fn resolver_for(&self, url: &str) -> Option<&Arc<dyn TrackResolver>> {
        self.resolvers.iter().find(|r| r.handles(url))
    }

    /// Resuelve una URL o texto de búsqueda en tracks listos para encolar
    pub async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() {
            anyhow::bail!("Búsqueda vacía");
        }

        let resolver = if Self::is_url(query) {
            match Self::classify(query) {
                SourceKind::Spotify => anyhow::bail!("Los enlaces de Spotify no están soportados"),
                _ => match self.resolver_for(query) {
                    Some(resolver) => resolver,
                    None => anyhow::bail!("URL no soportada: {}", query),
                },
            }
        } else {
            &self.search
        };

        debug!("🔎 Resolviendo '{}' con {}", query, resolver.source_name());
        let tracks = resolver.resolve(query, requested_by).await?;

        for track in &tracks {
            if let Some(stream_url) = track.stream_url() {
                self.stream_urls
                    .insert(track.url().to_string(), stream_url.to_string());
            }
        }

        info!("✅ {} track(s) resueltos con {}", tracks.len(), resolver.source_name());
        Ok(tracks)
    }

    /// URL de stream de un track, desde cache si no venció
    pub async fn stream_url(&self, track: &Track) -> Result<String> {
        if let Some(cached) = self.stream_urls.get(&track.url().to_string()) {
            debug!("💾 URL de stream en cache para: {}", track.title());
            return Ok(cached);
        }

        let resolver = match self.resolver_for(track.url()) {
            Some(resolver) => resolver,
            None if track.source() == SourceKind::YouTube => &self.search,
            None => anyhow::bail!("Ninguna fuente puede resolver: {}", track.url()),
        };

        let stream_url = resolver.resolve_stream_url(track).await?;
        self.stream_urls
            .insert(track.url().to_string(), stream_url.clone());
        Ok(stream_url)
    }

    pub fn stream_url_cache(&self) -> &StreamUrlCache {
        &self.stream_urls
    }
}

#[async_trait]
impl StreamResolver for SourceManager {
    async fn resolve_stream(&self, track: &Track) -> Result<Track> {
        let stream_url = self.stream_url(track).await?;
        Ok(track.clone().with_stream_url(stream_url))
    }
}
