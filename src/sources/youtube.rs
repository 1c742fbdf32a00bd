use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serenity::model::id::UserId;
use std::{path::PathBuf, sync::LazyLock, time::Duration};
use tracing::{debug, info, warn};

use super::TrackResolver;
use crate::audio::track::{SourceKind, Track};

/// Formato de audio preferido: m4a primero, luego el mejor disponible
const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio/best";

/// Límite por defecto para cada invocación de yt-dlp
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

static YOUTUBE_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|playlist\?list=|embed/|v/|shorts/)|youtu\.be/|music\.youtube\.com/)",
    )
    .ok()
});

static PLAYLIST_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[?&]list=([a-zA-Z0-9_-]+)").ok());

/// Información extraída de yt-dlp
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct YtDlpInfo {
    id: String,
    title: String,
    track: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    /// URL directa del formato elegido (solo en extracciones completas)
    url: Option<String>,
}

impl YtDlpInfo {
    fn watch_url(&self) -> String {
        match &self.webpage_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!("https://www.youtube.com/watch?v={}", self.id),
        }
    }

    /// Convierte la salida completa de `-j` en un track
    fn into_track(self, requested_by: UserId, with_stream: bool) -> Track {
        let url = self.watch_url();
        let title = non_empty(self.track).unwrap_or(self.title);
        let artist = non_empty(self.artist)
            .or(non_empty(self.uploader))
            .or(non_empty(self.channel));

        let mut track = Track::new(self.id, title, url, SourceKind::YouTube, requested_by);

        if let Some(artist) = artist {
            track = track.with_artist(artist);
        }
        if let Some(album) = non_empty(self.album) {
            track = track.with_album(album);
        }
        if let Some(secs) = self.duration.filter(|d| *d > 0.0) {
            track = track.with_duration(Duration::from_secs_f64(secs));
        }
        if let Some(thumbnail) = non_empty(self.thumbnail) {
            track = track.with_thumbnail(thumbnail);
        }
        if with_stream {
            if let Some(stream_url) = non_empty(self.url) {
                track = track.with_stream_url(stream_url);
            }
        }

        track
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolver respaldado por el binario `yt-dlp`
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    ytdlp_path: PathBuf,
    timeout: Duration,
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpResolver {
    pub fn new(ytdlp_path: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Verifica si una URL es válida para YouTube
    pub fn is_youtube_url(url: &str) -> bool {
        YOUTUBE_URL.as_ref().is_some_and(|re| re.is_match(url))
    }

    pub fn is_playlist(url: &str) -> bool {
        PLAYLIST_PARAM.as_ref().is_some_and(|re| re.is_match(url))
    }

    /// Argumentos para extraer un único video
    fn single_args(url: &str) -> Vec<String> {
        to_args(&["-j", "-f", AUDIO_FORMAT, "--no-playlist", url])
    }

    /// Argumentos para listar una playlist sin extraer cada video
    fn playlist_args(url: &str) -> Vec<String> {
        to_args(&["-j", "--flat-playlist", url])
    }

    /// Argumentos de búsqueda: primer resultado que no sea en vivo
    fn search_args(query: &str) -> Vec<String> {
        to_args(&[
            "-j",
            "-f",
            AUDIO_FORMAT,
            "--no-playlist",
            "--default-search",
            "ytsearch",
            "--match-filter",
            "!is_live",
            query,
        ])
    }

    fn stream_args(url: &str) -> Vec<String> {
        to_args(&["-f", AUDIO_FORMAT, "-g", "--no-playlist", url])
    }

    /// Ejecuta yt-dlp con timeout y devuelve su stdout
    async fn run(&self, args: Vec<String>) -> Result<String> {
        debug!("🔧 yt-dlp {}", args.join(" "));

        let output = Command::new(&self.ytdlp_path)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(output) => output.context("Error al ejecutar yt-dlp")?,
            Err(_) => anyhow::bail!("yt-dlp no respondió en {:?}", self.timeout),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                anyhow::bail!("yt-dlp falló: {}", output.status);
            }
            anyhow::bail!("yt-dlp falló: {}", stderr);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn extract_single(&self, url: &str, requested_by: UserId) -> Result<Track> {
        let stdout = self.run(Self::single_args(url)).await?;
        let info: YtDlpInfo =
            serde_json::from_str(stdout.trim()).context("Error al parsear respuesta de yt-dlp")?;
        Ok(info.into_track(requested_by, true))
    }

    async fn extract_playlist(&self, url: &str, requested_by: UserId) -> Result<Vec<Track>> {
        info!("📋 Obteniendo playlist: {}", url);
        let stdout = self.run(Self::playlist_args(url)).await?;
        let playlist_id = PLAYLIST_PARAM
            .as_ref()
            .and_then(|re| re.captures(url))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        let tracks = parse_playlist(&stdout, requested_by, playlist_id.as_deref());
        if tracks.is_empty() {
            anyhow::bail!("No se encontraron tracks en la playlist");
        }

        info!("📋 {} tracks en la playlist", tracks.len());
        Ok(tracks)
    }

    async fn search(&self, query: &str, requested_by: UserId) -> Result<Track> {
        info!("🔍 Buscando en YouTube: {}", query);
        let stdout = self.run(Self::search_args(query)).await?;
        let info: YtDlpInfo =
            serde_json::from_str(stdout.trim()).context("Error al parsear resultado de búsqueda")?;
        let track = info.into_track(requested_by, true);
        info!("✅ Encontrado: {}", track.title());
        Ok(track)
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Una línea JSON por entrada; las líneas ilegibles se ignoran
fn parse_playlist(stdout: &str, requested_by: UserId, playlist_id: Option<&str>) -> Vec<Track> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<YtDlpInfo>(line) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Entrada de playlist ignorada: {}", e);
                None
            }
        })
        .map(|info| {
            // en modo plano `url` apunta a la página, no al stream
            let track = info.into_track(requested_by, false);
            match playlist_id {
                Some(id) => track.with_playlist_id(id),
                None => track,
            }
        })
        .collect()
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    fn handles(&self, url: &str) -> bool {
        Self::is_youtube_url(url)
    }

    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Vec<Track>> {
        if !Self::is_youtube_url(query) {
            return Ok(vec![self.search(query, requested_by).await?]);
        }

        if Self::is_playlist(query) {
            return self.extract_playlist(query, requested_by).await;
        }

        Ok(vec![self.extract_single(query, requested_by).await?])
    }

    async fn resolve_stream_url(&self, track: &Track) -> Result<String> {
        let url = if track.url().is_empty() {
            format!("https://www.youtube.com/watch?v={}", track.id())
        } else {
            track.url().to_string()
        };

        debug!("🎵 Obteniendo URL de stream para: {}", url);
        let stdout = self.run(Self::stream_args(&url)).await?;

        // -g puede imprimir varias URLs (video + audio); la primera es la del formato pedido
        let stream_url = stdout.lines().map(str::trim).find(|l| !l.is_empty());
        match stream_url {
            Some(stream_url) => Ok(stream_url.to_string()),
            None => anyhow::bail!("No se pudo obtener URL de stream"),
        }
    }

    fn source_name(&self) -> &'static str {
        "YouTube"
    }
}
