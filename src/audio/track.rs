use serenity::model::id::UserId;
use std::time::Duration;

/// Origen de un track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    YouTube,
    Spotify,
    Direct,
    Unknown,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::Spotify => "spotify",
            SourceKind::Direct => "direct",
            SourceKind::Unknown => "unknown",
        }
    }
}

/// Representa un track reproducible.
///
/// Los campos quedan congelados una vez construido. Para completar metadatos
/// (stream URL, duración, miniatura) se construye un valor nuevo con los
/// métodos `with_*` y se sustituye la entrada de la cola con
/// [`Queue::replace`](super::queue::Queue::replace).
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: String,
    title: String,
    artist: Option<String>,
    album: Option<String>,
    duration: Option<Duration>,
    url: String,
    stream_url: Option<String>,
    thumbnail: Option<String>,
    source: SourceKind,
    requested_by: UserId,
    playlist_id: Option<String>,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        source: SourceKind,
        requested_by: UserId,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            album: None,
            duration: None,
            url: url.into(),
            stream_url: None,
            thumbnail: None,
            source,
            requested_by,
            playlist_id: None,
        }
    }

    // Getters
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }
    pub fn album(&self) -> Option<&str> {
        self.album.as_deref()
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn stream_url(&self) -> Option<&str> {
        self.stream_url.as_deref().filter(|s| !s.is_empty())
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn source(&self) -> SourceKind {
        self.source
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }
    pub fn playlist_id(&self) -> Option<&str> {
        self.playlist_id.as_deref()
    }

    /// Indica si el track ya tiene una URL de stream utilizable
    pub fn is_resolved(&self) -> bool {
        self.stream_url().is_some()
    }

    // Builders
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = Some(stream_url.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_playlist_id(mut self, playlist_id: impl Into<String>) -> Self {
        self.playlist_id = Some(playlist_id.into());
        self
    }

    pub fn with_requested_by(mut self, user_id: UserId) -> Self {
        self.requested_by = user_id;
        self
    }

    /// Formatea la duración como `mm:ss` o `hh:mm:ss`; "Live" si es desconocida
    pub fn format_duration(&self) -> String {
        let total = match self.duration {
            Some(d) if !d.is_zero() => d.as_secs(),
            _ => return "Live".to_string(),
        };

        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }
}
