use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::UserId;
use url::Url;

use super::TrackResolver;
use crate::audio::track::{SourceKind, Track};

const AUDIO_EXTENSIONS: [&str; 7] = [".mp3", ".wav", ".ogg", ".flac", ".m4a", ".opus", ".aac"];

/// Resolver de enlaces HTTP a archivos de audio: la URL es su propio stream
#[derive(Debug, Clone, Default)]
pub struct DirectUrlResolver;

impl DirectUrlResolver {
    pub fn new() -> Self {
        Self
    }

    fn parse(url: &str) -> Option<Url> {
        Url::parse(url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
    }

    fn has_audio_extension(url: &Url) -> bool {
        let path = url.path().to_lowercase();
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    /// Nombre del archivo sin extensión, o el host si no hay ruta
    fn title_for(url: &Url) -> String {
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(|name| match name.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => stem.to_string(),
                _ => name.to_string(),
            })
            .unwrap_or_else(|| url.host_str().unwrap_or("stream").to_string())
    }
}

#[async_trait]
impl TrackResolver for DirectUrlResolver {
    fn handles(&self, url: &str) -> bool {
        Self::parse(url).is_some_and(|u| Self::has_audio_extension(&u))
    }

    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>> {
        let Some(url) = Self::parse(query) else {
            anyhow::bail!("URL directa inválida: {}", query);
        };

        let track = Track::new(
            url.as_str(),
            Self::title_for(&url),
            url.as_str(),
            SourceKind::Direct,
            requested_by,
        )
        .with_stream_url(url.as_str());

        Ok(vec![track])
    }

    async fn resolve_stream_url(&self, track: &Track) -> Result<String> {
        match Self::parse(track.url()) {
            Some(url) => Ok(url.to_string()),
            None => anyhow::bail!("URL directa inválida: {}", track.url()),
        }
    }

    fn source_name(&self) -> &'static str {
        "direct"
    }
}
