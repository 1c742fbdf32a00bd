use anyhow::Result;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use guildcast::{
    audio::{
        decoder::FRAME_SAMPLES,
        player::{Player, StreamResolver},
        session::SessionHooks,
        transport::{ChannelTransport, FrameReceiver},
    },
    config::Config,
    registry::SessionRegistry,
    sources::SourceManager,
    storage::JsonStorage,
};

/// Guild y usuario ficticios del modo local
const LOCAL_GUILD: GuildId = GuildId::new(1);
const LOCAL_CHANNEL: ChannelId = ChannelId::new(1);
const LOCAL_USER: UserId = UserId::new(1);

const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guildcast=debug".parse()?)
                .add_directive("serenity=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando guildcast v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let queries: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| !arg.starts_with("--"))
        .collect();
    if queries.is_empty() {
        anyhow::bail!("Uso: guildcast <url o búsqueda>... | --health-check");
    }

    // Inicializar almacenamiento JSON
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);

    let registry = SessionRegistry::new()
        .with_settings(storage)
        .with_default_volume(config.default_volume)
        .with_max_history(config.max_history)
        .with_hooks(|guild_id| {
            SessionHooks::default()
                .on_track_change(move |track| {
                    info!(
                        "🎶 [{}] Ahora suena: {} [{}]",
                        guild_id,
                        track.title(),
                        track.format_duration()
                    )
                })
                .on_track_end(move || info!("🏁 [{}] Reproducción finalizada", guild_id))
        });

    let sources = Arc::new(SourceManager::new(&config));
    let player = Player::from_config(&config).with_resolver(sources.clone());

    // Limpieza periódica de URLs de stream vencidas
    let cleanup_sources = sources.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            cleanup_sources.stream_url_cache().cleanup_old_entries();
        }
    });

    let session = registry.get_or_create(LOCAL_GUILD).await;
    let (transport, frames) = ChannelTransport::new(LOCAL_CHANNEL, config.frame_buffer);
    session.attach_transport(Arc::new(transport));
    let sink = tokio::spawn(drain_frames(frames));

    for query in &queries {
        match sources.resolve(query, LOCAL_USER).await {
            Ok(tracks) => {
                let added = session.queue().add(tracks.into_iter().map(Arc::new));
                info!("➕ {} track(s) agregados desde '{}'", added, query);
            }
            Err(e) => warn!("❌ No se pudo resolver '{}': {:#}", query, e),
        }
    }

    // El primer track debe tener URL de stream antes de play
    if let Some(current) = session.queue().current() {
        if !current.is_resolved() {
            let resolved = sources.resolve_stream(&current).await?;
            session.queue().replace(&current, Arc::new(resolved));
        }
    }

    let mut handle = match player.play(&session) {
        Ok(handle) => handle,
        Err(e) => {
            error!("❌ No se pudo iniciar la reproducción: {}", e);
            return Err(e.into());
        }
    };

    // Manejar shutdown graceful
    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        result = &mut handle => {
            if let Err(e) = result {
                error!("Error en el loop de streaming: {:?}", e);
            }
            false
        }
    };

    registry.shutdown();
    if interrupted {
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            warn!("⏰ El loop de streaming no terminó a tiempo");
        }
    }

    sink.abort();
    info!("👋 guildcast terminado");
    Ok(())
}

/// Consume frames a ritmo de tiempo real, como lo haría un driver de voz
async fn drain_frames(frames: FrameReceiver) {
    let mut interval = tokio::time::interval(Duration::from_millis(20));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut received: u64 = 0;

    loop {
        interval.tick().await;
        match frames.recv_async().await {
            Ok(_) => {
                received += 1;
                // cada 10 segundos de audio
                if received % 500 == 0 {
                    info!(
                        "📡 {} frames enviados ({}s de audio)",
                        received,
                        received * FRAME_SAMPLES as u64 / 48_000
                    );
                }
            }
            Err(_) => break,
        }
    }
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
