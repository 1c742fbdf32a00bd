use anyhow::Result;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    decoder::{DecoderFactory, FfmpegDecoder, FrameRead, PcmStream, CHANNELS, FRAME_BYTES, FRAME_SAMPLES},
    encoder::{pcm_from_le_bytes, EncoderFactory, FrameEncoder, OpusEncoderFactory},
    queue::Advance,
    session::Session,
    track::Track,
    transport::VoiceTransport,
};
use crate::{
    config::Config,
    error::{PlayError, StreamError},
};

/// Espera máxima para entregar un frame al transporte
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Completa la URL de stream de un track encolado sin resolver
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve_stream(&self, track: &Track) -> Result<Track>;
}

/// Cómo terminó la reproducción de un track
#[derive(Debug)]
enum TrackEnd {
    Stopped,
    Skipped,
    Completed { frames: u64 },
    Failed(StreamError),
}

/// Limpia el indicador de "hablando" en cualquier salida del loop
struct SpeakingGuard(Arc<dyn VoiceTransport>);

impl SpeakingGuard {
    fn new(transport: Arc<dyn VoiceTransport>) -> Self {
        transport.set_speaking(true);
        Self(transport)
    }
}

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        self.0.set_speaking(false);
    }
}

/// Motor de streaming.
///
/// No guarda estado por servidor: todo vive en la [`Session`] que recibe.
/// Cada `play` lanza una tarea que recorre la cola track a track
/// (decodificar → codificar → transporte) hasta que se detiene o la cola
/// se agota.
#[derive(Clone)]
pub struct Player {
    decoders: Arc<dyn DecoderFactory>,
    encoders: Arc<dyn EncoderFactory>,
    resolver: Option<Arc<dyn StreamResolver>>,
    send_timeout: Duration,
}

impl Player {
    pub fn new(decoders: Arc<dyn DecoderFactory>, encoders: Arc<dyn EncoderFactory>) -> Self {
        Self {
            decoders,
            encoders,
            resolver: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Player con ffmpeg + Opus según la configuración
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(FfmpegDecoder::new(&config.ffmpeg_path)),
            Arc::new(OpusEncoderFactory::new(config.opus_bitrate)),
        )
        .with_send_timeout(config.send_timeout)
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn StreamResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Inicia la reproducción del track actual de la sesión.
    ///
    /// Requiere transporte conectado y un track actual con URL de stream
    /// resuelta; si falta algo no se toca el estado. Debe llamarse dentro
    /// de un runtime de tokio. El handle devuelto puede descartarse.
    pub fn play(&self, session: &Arc<Session>) -> Result<JoinHandle<()>, PlayError> {
        if session.transport().is_none() {
            return Err(PlayError::NotConnected);
        }

        let (key, track) = session.queue().current_entry().ok_or(PlayError::EmptyQueue)?;

        if !track.is_resolved() {
            return Err(PlayError::Unresolved(track.title().to_string()));
        }

        // Si ningún loop es dueño de la sesión, las señales pendientes son viejas
        let generation = session.stop_generation();
        let lease = session.stream_lease();
        let guard = lease.clone().try_lock_owned().ok();
        if guard.is_some() {
            session.drain_signals();
        }

        session.start_playback();
        info!("🎵 Reproduciendo en guild {}: {}", session.guild_id(), track.title());
        session.notify_track_changed(&track);

        let engine = self.clone();
        let session = session.clone();
        Ok(tokio::spawn(async move {
            let _lease = match guard {
                Some(guard) => guard,
                None => {
                    debug!("⏳ Esperando a que termine el loop anterior en guild {}", session.guild_id());
                    let guard = lease.lock_owned().await;

                    // un stop o un cambio de cabeza mientras esperaba anula esta reproducción
                    let head = session.queue().current_entry().map(|(k, _)| k);
                    if session.stop_generation() != generation || head != Some(key) {
                        debug!("🚫 Reproducción descartada en guild {}: la sesión cambió", session.guild_id());
                        return;
                    }
                    session.start_playback();
                    guard
                }
            };
            engine.run(session, key, track).await;
        }))
    }

    /// Vuelve al track anterior del historial.
    ///
    /// La rotación de la cola y el cambio de audio son dos pasos: aquí se
    /// rota la cola y se emite un skip, y el loop de streaming reproduce la
    /// nueva cabeza.
    pub fn play_previous(&self, session: &Session) -> Result<Arc<Track>, PlayError> {
        let previous = session.queue().previous().ok_or(PlayError::NoPrevious)?;
        session.skip();
        info!("⏮️ Volviendo a: {}", previous.title());
        Ok(previous)
    }

    /// Loop principal: un track por iteración, encadenando con la cola
    async fn run(&self, session: Arc<Session>, mut key: u64, mut track: Arc<Track>) {
        let guild_id = session.guild_id();

        loop {
            let end = match session.transport() {
                Some(transport) => self.stream_track(&session, transport, &track).await,
                None => TrackEnd::Failed(StreamError::NoTransport),
            };

            match end {
                TrackEnd::Stopped => {
                    Self::halt(&session);
                    break;
                }
                TrackEnd::Failed(e) if e.is_setup() => {
                    session.finish();
                    error!("❌ Error al iniciar '{}' en guild {}: {}", track.title(), guild_id, e);
                    break;
                }
                TrackEnd::Failed(e) => {
                    session.finish();
                    error!("❌ Error de stream en '{}' (guild {}): {}", track.title(), guild_id, e);
                    session.notify_track_ended();
                    break;
                }
                TrackEnd::Skipped => {
                    info!("⏭️ Track saltado en guild {}: {}", guild_id, track.title());
                }
                TrackEnd::Completed { frames } => {
                    info!(
                        "🏁 Track terminado en guild {}: {} ({} frames)",
                        guild_id,
                        track.title(),
                        frames
                    );
                }
            }

            let (next_key, next) = match session.queue().advance_from(key) {
                Advance::Next(k, t) | Advance::Rotated(k, t) => (k, t),
                Advance::Exhausted => {
                    session.finish();
                    info!("📭 Cola terminada en guild {}", guild_id);
                    session.notify_track_ended();
                    break;
                }
            };

            // un stop durante la resolución no debe revivir la sesión
            let resolved = tokio::select! {
                biased;
                _ = session.signals().stop.wait() => {
                    Self::halt(&session);
                    break;
                }
                resolved = self.ensure_resolved(&session, next) => resolved,
            };

            let next = match resolved {
                Ok(next) => next,
                Err(e) => {
                    session.finish();
                    error!("❌ Error al iniciar siguiente track en guild {}: {}", guild_id, e);
                    break;
                }
            };

            key = next_key;
            track = next;
            session.start_playback();
            info!("🎵 Reproduciendo en guild {}: {}", guild_id, track.title());
            session.notify_track_changed(&track);
        }

        // lo que quede pendiente iba dirigido a este loop
        session.drain_signals();
    }

    /// Stop consumido: vacía la cola completa y notifica el fin
    fn halt(session: &Session) {
        session.queue().clear_all();
        session.finish();
        info!("⏹️ Reproducción detenida en guild {}", session.guild_id());
        session.notify_track_ended();
    }

    /// Resuelve la URL de stream de un track encolado y sustituye la entrada
    async fn ensure_resolved(&self, session: &Session, track: Arc<Track>) -> Result<Arc<Track>, StreamError> {
        if track.is_resolved() {
            return Ok(track);
        }

        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| StreamError::Resolve(anyhow::anyhow!("sin resolver configurado")))?;

        debug!("🔗 Resolviendo URL de stream para: {}", track.title());
        let resolved = resolver
            .resolve_stream(&track)
            .await
            .map_err(StreamError::Resolve)?;

        if !resolved.is_resolved() {
            return Err(StreamError::Resolve(anyhow::anyhow!(
                "el resolver no devolvió URL para '{}'",
                track.title()
            )));
        }

        let resolved = Arc::new(resolved);
        session.queue().replace(&track, resolved.clone());
        Ok(resolved)
    }

    /// Reproduce un track hasta que termina, se salta, se detiene o falla
    async fn stream_track(&self, session: &Session, transport: Arc<dyn VoiceTransport>, track: &Track) -> TrackEnd {
        let _speaking = SpeakingGuard::new(transport.clone());

        let Some(stream_url) = track.stream_url() else {
            return TrackEnd::Failed(StreamError::Resolve(anyhow::anyhow!("track sin URL de stream")));
        };

        // el volumen se lee una vez por track
        let volume = session.volume();
        let mut pcm = match self.decoders.spawn(stream_url, volume).await {
            Ok(pcm) => pcm,
            Err(e) => return TrackEnd::Failed(StreamError::Launch(e)),
        };

        let mut encoder = match self.encoders.create() {
            Ok(encoder) => encoder,
            Err(e) => {
                pcm.terminate().await;
                return TrackEnd::Failed(StreamError::Encoder(e));
            }
        };

        let end = self
            .pump(session, transport.as_ref(), pcm.as_mut(), encoder.as_mut())
            .await;

        match end {
            TrackEnd::Completed { frames } => {
                let exit = pcm.finish().await;
                if !exit.success && frames == 0 {
                    return TrackEnd::Failed(StreamError::DecoderExited(exit.diagnostic));
                }
                if !exit.success {
                    warn!(
                        "⚠️ El decodificador terminó con error tras {} frames: {}",
                        frames,
                        exit.diagnostic.as_deref().unwrap_or("sin diagnóstico")
                    );
                }
                TrackEnd::Completed { frames }
            }
            other => {
                pcm.terminate().await;
                other
            }
        }
    }

    /// Bombea frames revisando señales con prioridad stop > skip > pause
    async fn pump(
        &self,
        session: &Session,
        transport: &dyn VoiceTransport,
        pcm: &mut dyn PcmStream,
        encoder: &mut dyn FrameEncoder,
    ) -> TrackEnd {
        let signals = session.signals();
        let guild_id = session.guild_id();
        let mut buf = [0u8; FRAME_BYTES];
        let mut samples = [0i16; FRAME_SAMPLES * CHANNELS];
        let mut frames: u64 = 0;
        let mut dropped: u64 = 0;

        // skip cede ante un stop que llegue a la vez
        let skip_or_stop = || {
            if signals.stop.take() {
                TrackEnd::Stopped
            } else {
                TrackEnd::Skipped
            }
        };

        loop {
            if signals.stop.take() {
                return TrackEnd::Stopped;
            }
            if signals.skip.take() {
                return skip_or_stop();
            }
            if signals.pause.take() {
                session.enter_paused();
                debug!("⏸️ Loop en pausa en guild {}", guild_id);

                // sin leer del decodificador: el proceso sigue vivo y se retoma sin reconectar
                loop {
                    tokio::select! {
                        biased;
                        _ = signals.stop.wait() => return TrackEnd::Stopped,
                        _ = signals.skip.wait() => return skip_or_stop(),
                        _ = signals.resume.wait() => {}
                    }
                    // un resume anterior a la última pausa no saca de ella
                    if !session.is_paused() {
                        break;
                    }
                }
                debug!("▶️ Loop reanudado en guild {}", guild_id);
                continue;
            }

            let read = tokio::select! {
                biased;
                _ = signals.stop.wait() => return TrackEnd::Stopped,
                _ = signals.skip.wait() => return skip_or_stop(),
                read = pcm.read_frame(&mut buf) => read,
            };

            match read {
                Ok(FrameRead::Frame) => frames += 1,
                Ok(FrameRead::EndOfStream) => {
                    if dropped > 0 {
                        debug!("🗑️ {} frames descartados en guild {}", dropped, guild_id);
                    }
                    return TrackEnd::Completed { frames };
                }
                Err(e) => return TrackEnd::Failed(StreamError::Read(e)),
            }

            pcm_from_le_bytes(&buf, &mut samples);
            let packet = match encoder.encode(&samples) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Error codificando frame Opus: {:#}", e);
                    continue;
                }
            };

            if !transport.is_ready() {
                dropped += 1;
                continue;
            }

            match tokio::time::timeout(self.send_timeout, transport.send_frame(packet)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    dropped += 1;
                    debug!("Frame descartado: {:#}", e);
                }
                Err(_) => {
                    dropped += 1;
                    debug!("⏰ Transporte saturado, frame descartado en guild {}", guild_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        decoder::{DecodeExit, PcmFrame},
        session::{PlayState, SessionHooks},
        track::SourceKind,
        transport::{ChannelTransport, FrameReceiver},
    };
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serenity::model::id::{ChannelId, GuildId, UserId};
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Cómo se comporta un stream falso
    #[derive(Clone, Copy)]
    enum Script {
        /// N frames y luego fin limpio
        Frames(usize),
        /// Nunca termina: un frame cada 20 ms
        Endless,
        /// Sale con error sin producir audio
        ExitWithError,
        /// Falla la lectura tras N frames
        ReadErrorAfter(usize),
    }

    struct FakeStream {
        script: Script,
        produced: usize,
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PcmStream for FakeStream {
        async fn read_frame(&mut self, buf: &mut PcmFrame) -> io::Result<FrameRead> {
            match self.script {
                Script::Frames(n) if self.produced >= n => return Ok(FrameRead::EndOfStream),
                Script::ExitWithError => return Ok(FrameRead::EndOfStream),
                Script::ReadErrorAfter(n) if self.produced >= n => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe roto"))
                }
                Script::Endless => tokio::time::sleep(Duration::from_millis(20)).await,
                _ => {}
            }
            self.produced += 1;
            buf.fill(1);
            Ok(FrameRead::Frame)
        }

        async fn finish(&mut self) -> DecodeExit {
            DecodeExit {
                success: !matches!(self.script, Script::ExitWithError),
                diagnostic: Some("Server returned 403 Forbidden".to_string()),
            }
        }

        async fn terminate(&mut self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeDecoders {
        scripts: Mutex<Vec<Script>>,
        spawned: Mutex<Vec<(String, u8)>>,
        terminated: Arc<AtomicUsize>,
    }

    impl FakeDecoders {
        fn with(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts),
                ..Default::default()
            })
        }

        fn spawned_urls(&self) -> Vec<String> {
            self.spawned.lock().iter().map(|(url, _)| url.clone()).collect()
        }
    }

    #[async_trait]
    impl DecoderFactory for FakeDecoders {
        async fn spawn(&self, stream_url: &str, volume: u8) -> Result<Box<dyn PcmStream>> {
            self.spawned.lock().push((stream_url.to_string(), volume));
            let script = {
                let mut scripts = self.scripts.lock();
                if scripts.is_empty() {
                    Script::Frames(3)
                } else {
                    scripts.remove(0)
                }
            };
            Ok(Box::new(FakeStream {
                script,
                produced: 0,
                terminated: self.terminated.clone(),
            }))
        }
    }

    struct FakeEncoder;

    impl FrameEncoder for FakeEncoder {
        fn encode(&mut self, pcm: &[i16]) -> Result<Bytes> {
            assert_eq!(pcm.len(), FRAME_SAMPLES * CHANNELS);
            Ok(Bytes::from_static(b"opus"))
        }
    }

    struct FakeEncoders;

    impl EncoderFactory for FakeEncoders {
        fn create(&self) -> Result<Box<dyn FrameEncoder>> {
            Ok(Box::new(FakeEncoder))
        }
    }

    struct FailingEncoders;

    impl EncoderFactory for FailingEncoders {
        fn create(&self) -> Result<Box<dyn FrameEncoder>> {
            anyhow::bail!("libopus no disponible")
        }
    }

    struct SuffixResolver;

    #[async_trait]
    impl StreamResolver for SuffixResolver {
        async fn resolve_stream(&self, track: &Track) -> Result<Track> {
            Ok(track.clone().with_stream_url(format!("{}/stream", track.url())))
        }
    }

    /// Avisa al entrar y nunca termina de resolver
    #[derive(Default)]
    struct StuckResolver {
        entered: tokio::sync::Notify,
    }

    #[async_trait]
    impl StreamResolver for StuckResolver {
        async fn resolve_stream(&self, _track: &Track) -> Result<Track> {
            self.entered.notify_one();
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct Counters {
        changed: Mutex<Vec<String>>,
        ended: AtomicUsize,
    }

    struct Harness {
        session: Arc<Session>,
        transport: Arc<ChannelTransport>,
        frames: FrameReceiver,
        counters: Arc<Counters>,
    }

    fn harness() -> Harness {
        let counters = Arc::new(Counters::default());
        let (c, e) = (counters.clone(), counters.clone());
        let hooks = SessionHooks::default()
            .on_track_change(move |t| c.changed.lock().push(t.title().to_string()))
            .on_track_end(move || {
                e.ended.fetch_add(1, Ordering::SeqCst);
            });

        let session = Arc::new(Session::new(GuildId::new(1), 50).with_hooks(hooks));
        let (transport, frames) = ChannelTransport::new(ChannelId::new(2), 1024);
        let transport = Arc::new(transport);
        session.attach_transport(transport.clone());

        Harness {
            session,
            transport,
            frames,
            counters,
        }
    }

    fn resolved(title: &str) -> Arc<Track> {
        Arc::new(unresolved_track(title).with_stream_url(format!("https://cdn/{}", title)))
    }

    fn unresolved_track(title: &str) -> Track {
        Track::new(
            title,
            title,
            format!("https://example.com/{}", title),
            SourceKind::Direct,
            UserId::new(9),
        )
    }

    fn player(decoders: Arc<FakeDecoders>) -> Player {
        Player::new(decoders, Arc::new(FakeEncoders))
    }

    #[tokio::test]
    async fn test_play_preconditions() {
        let decoders = FakeDecoders::with(vec![]);
        let player = player(decoders.clone());

        let session = Arc::new(Session::new(GuildId::new(1), 50));
        session.queue().add([resolved("A")]);
        assert!(matches!(player.play(&session), Err(PlayError::NotConnected)));

        let h = harness();
        assert!(matches!(player.play(&h.session), Err(PlayError::EmptyQueue)));

        h.session.queue().add([Arc::new(unresolved_track("A"))]);
        assert!(matches!(player.play(&h.session), Err(PlayError::Unresolved(_))));

        assert_eq!(h.session.state(), PlayState::Stopped);
        assert!(h.counters.changed.lock().is_empty());
        assert!(decoders.spawned_urls().is_empty());
    }

    #[tokio::test]
    async fn test_plays_queue_to_completion() {
        let decoders = FakeDecoders::with(vec![Script::Frames(3), Script::Frames(2)]);
        let h = harness();
        h.session.queue().add([resolved("A"), resolved("B")]);

        let handle = player(decoders.clone()).play(&h.session).unwrap();
        assert_eq!(h.session.state(), PlayState::Playing);
        handle.await.unwrap();

        assert_eq!(h.frames.len(), 5);
        assert_eq!(*h.counters.changed.lock(), vec!["A", "B"]);
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.state(), PlayState::Stopped);
        assert!(h.session.queue().is_empty());
        assert_eq!(h.session.queue().history().len(), 2);
        assert!(!h.transport.is_speaking());
        assert_eq!(decoders.spawned_urls(), vec!["https://cdn/A", "https://cdn/B"]);
    }

    #[tokio::test]
    async fn test_volume_is_read_at_track_start() {
        let decoders = FakeDecoders::with(vec![Script::Frames(1)]);
        let h = harness();
        h.session.set_volume(30);
        h.session.queue().add([resolved("A")]);

        player(decoders.clone()).play(&h.session).unwrap().await.unwrap();
        assert_eq!(decoders.spawned.lock()[0].1, 30);
    }

    #[tokio::test]
    async fn test_stop_clears_everything() {
        let decoders = FakeDecoders::with(vec![Script::Endless]);
        let h = harness();
        h.session.queue().add([resolved("A"), resolved("B")]);

        let handle = player(decoders.clone()).play(&h.session).unwrap();
        h.frames.recv_async().await.unwrap();

        h.session.stop();
        handle.await.unwrap();

        assert_eq!(h.session.state(), PlayState::Stopped);
        assert!(h.session.queue().is_empty());
        assert!(!h.session.queue().has_previous());
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 1);
        assert_eq!(decoders.terminated.load(Ordering::SeqCst), 1);
        assert!(!h.transport.is_speaking());
    }

    #[tokio::test]
    async fn test_stop_wins_over_pending_skip() {
        let decoders = FakeDecoders::with(vec![Script::Endless, Script::Endless]);
        let h = harness();
        h.session.queue().add([resolved("A"), resolved("B")]);

        let handle = player(decoders.clone()).play(&h.session).unwrap();
        h.frames.recv_async().await.unwrap();

        // ambas señales pendientes antes del siguiente sondeo
        h.session.skip();
        h.session.stop();
        handle.await.unwrap();

        assert_eq!(*h.counters.changed.lock(), vec!["A"]);
        assert_eq!(h.session.state(), PlayState::Stopped);
        assert!(h.session.queue().is_empty());
        assert_eq!(decoders.spawned_urls().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_chains_without_track_ended() {
        let decoders = FakeDecoders::with(vec![Script::Endless, Script::Frames(1)]);
        let h = harness();
        h.session.queue().add([resolved("A"), resolved("B")]);

        let handle = player(decoders.clone()).play(&h.session).unwrap();
        h.frames.recv_async().await.unwrap();

        h.session.skip();
        h.session.skip();
        handle.await.unwrap();

        assert_eq!(*h.counters.changed.lock(), vec!["A", "B"]);
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 1);
        assert_eq!(decoders.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skip_on_last_track_stops() {
        let decoders = FakeDecoders::with(vec![Script::Endless]);
        let h = harness();
        h.session.queue().add([resolved("A")]);

        let handle = player(decoders.clone()).play(&h.session).unwrap();
        h.frames.recv_async().await.unwrap();
        h.session.skip();
        handle.await.unwrap();

        assert_eq!(h.session.state(), PlayState::Stopped);
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.queue().history().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_suspends_reading_and_resume_continues() {
        let decoders = FakeDecoders::with(vec![Script::Endless]);
        let h = harness();
        h.session.queue().add([resolved("A")]);

        let handle = player(decoders.clone()).play(&h.session).unwrap();
        h.frames.recv_async().await.unwrap();

        assert!(h.session.pause());
        assert_eq!(h.session.state(), PlayState::Paused);

        // dejar que el loop entre en pausa y vaciar lo que ya se envió
        tokio::time::sleep(Duration::from_millis(100)).await;
        while h.frames.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.frames.is_empty());

        assert!(h.session.resume());
        h.frames.recv_async().await.unwrap();
        assert_eq!(h.session.state(), PlayState::Playing);
        assert_eq!(decoders.spawned_urls().len(), 1);

        h.session.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_resume_pause_burst_stays_paused() {
        let decoders = FakeDecoders::with(vec![Script::Endless]);
        let h = harness();
        h.session.queue().add([resolved("A")]);

        let handle = player(decoders.clone()).play(&h.session).unwrap();
        h.frames.recv_async().await.unwrap();

        // las dos pausas se funden en una y el resume queda pendiente
        assert!(h.session.pause());
        assert!(h.session.resume());
        assert!(h.session.pause());

        tokio::time::sleep(Duration::from_millis(100)).await;
        while h.frames.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.session.state(), PlayState::Paused);
        assert!(h.frames.is_empty());

        assert!(h.session.resume());
        h.frames.recv_async().await.unwrap();

        // la siguiente pausa también detiene el flujo
        assert!(h.session.pause());
        tokio::time::sleep(Duration::from_millis(100)).await;
        while h.frames.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.frames.is_empty());

        h.session.stop();
        handle.await.unwrap();
        assert_eq!(decoders.spawned_urls().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_play_waiting_for_running_loop() {
        let decoders = FakeDecoders::with(vec![Script::Endless, Script::Endless]);
        let h = harness();
        h.session.queue().add([resolved("A"), resolved("B")]);
        let player = player(decoders.clone());

        let first = player.play(&h.session).unwrap();
        h.frames.recv_async().await.unwrap();
        let second = player.play(&h.session).unwrap();

        h.session.stop();
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(decoders.spawned_urls(), vec!["https://cdn/A"]);
        assert_eq!(decoders.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.state(), PlayState::Stopped);
        assert!(h.session.queue().is_empty());
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 1);
        assert!(!h.transport.is_speaking());
    }

    #[tokio::test]
    async fn test_stop_during_stream_resolution() {
        let decoders = FakeDecoders::with(vec![Script::Frames(1)]);
        let resolver = Arc::new(StuckResolver::default());
        let h = harness();
        h.session.queue().add([resolved("A"), Arc::new(unresolved_track("B"))]);

        let handle = player(decoders.clone())
            .with_resolver(resolver.clone())
            .play(&h.session)
            .unwrap();

        resolver.entered.notified().await;
        h.session.stop();
        handle.await.unwrap();

        assert_eq!(*h.counters.changed.lock(), vec!["A"]);
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.state(), PlayState::Stopped);
        assert!(h.session.queue().is_empty());
        assert_eq!(decoders.spawned_urls(), vec!["https://cdn/A"]);
    }

    #[tokio::test]
    async fn test_stop_while_paused() {
        let decoders = FakeDecoders::with(vec![Script::Endless]);
        let h = harness();
        h.session.queue().add([resolved("A"), resolved("B")]);

        let handle = player(decoders.clone()).play(&h.session).unwrap();
        h.frames.recv_async().await.unwrap();
        h.session.pause();
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.session.stop();
        handle.await.unwrap();

        assert_eq!(h.session.state(), PlayState::Stopped);
        assert!(h.session.queue().is_empty());
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_does_not_chain_or_end() {
        let decoders = FakeDecoders::with(vec![Script::ExitWithError]);
        let h = harness();
        h.session.queue().add([resolved("A"), resolved("B")]);

        player(decoders.clone()).play(&h.session).unwrap().await.unwrap();

        assert_eq!(h.session.state(), PlayState::Stopped);
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 0);
        assert_eq!(decoders.spawned_urls().len(), 1);
        assert_eq!(h.session.queue().len(), 2);
        assert!(!h.transport.is_speaking());
    }

    #[tokio::test]
    async fn test_encoder_failure_terminates_decoder() {
        let decoders = FakeDecoders::with(vec![Script::Frames(3)]);
        let h = harness();
        h.session.queue().add([resolved("A")]);

        Player::new(decoders.clone(), Arc::new(FailingEncoders))
            .play(&h.session)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(h.session.state(), PlayState::Stopped);
        assert_eq!(decoders.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_error_stops_without_chaining() {
        let decoders = FakeDecoders::with(vec![Script::ReadErrorAfter(2)]);
        let h = harness();
        h.session.queue().add([resolved("A"), resolved("B")]);

        player(decoders.clone()).play(&h.session).unwrap().await.unwrap();

        assert_eq!(h.frames.len(), 2);
        assert_eq!(h.session.state(), PlayState::Stopped);
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 1);
        assert_eq!(decoders.spawned_urls().len(), 1);
        assert_eq!(h.session.queue().current().unwrap().title(), "A");
    }

    #[tokio::test]
    async fn test_play_previous_replays_previous_track() {
        let decoders = FakeDecoders::with(vec![Script::Frames(1), Script::Endless, Script::Frames(1), Script::Frames(1)]);
        let h = harness();
        h.session.queue().add([resolved("A"), resolved("B")]);
        let player = player(decoders.clone());

        assert!(matches!(player.play_previous(&h.session), Err(PlayError::NoPrevious)));

        let handle = player.play(&h.session).unwrap();
        // A termina, B empieza y envía su primer frame
        h.frames.recv_async().await.unwrap();
        h.frames.recv_async().await.unwrap();

        assert_eq!(player.play_previous(&h.session).unwrap().title(), "A");
        handle.await.unwrap();

        assert_eq!(*h.counters.changed.lock(), vec!["A", "B", "A", "B"]);
        assert_eq!(
            decoders.spawned_urls(),
            vec!["https://cdn/A", "https://cdn/B", "https://cdn/A", "https://cdn/B"]
        );
    }

    #[tokio::test]
    async fn test_resolves_queued_tracks_when_chaining() {
        let decoders = FakeDecoders::with(vec![Script::Frames(1), Script::Frames(1)]);
        let h = harness();
        h.session.queue().add([resolved("A"), Arc::new(unresolved_track("B"))]);

        player(decoders.clone())
            .with_resolver(Arc::new(SuffixResolver))
            .play(&h.session)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            decoders.spawned_urls(),
            vec!["https://cdn/A", "https://example.com/B/stream"]
        );
        assert!(h.session.queue().history()[1].is_resolved());
    }

    #[tokio::test]
    async fn test_unresolvable_next_track_is_setup_failure() {
        let decoders = FakeDecoders::with(vec![Script::Frames(1)]);
        let h = harness();
        h.session.queue().add([resolved("A"), Arc::new(unresolved_track("B"))]);

        player(decoders.clone()).play(&h.session).unwrap().await.unwrap();

        assert_eq!(h.session.state(), PlayState::Stopped);
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 0);
        assert_eq!(decoders.spawned_urls().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_signals_are_drained_on_play() {
        let decoders = FakeDecoders::with(vec![Script::Frames(2)]);
        let h = harness();
        h.session.stop();
        h.session.skip();
        h.session.queue().add([resolved("A")]);

        player(decoders.clone()).play(&h.session).unwrap().await.unwrap();

        assert_eq!(h.frames.len(), 2);
        assert_eq!(h.session.queue().history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backed_up_transport_drops_frames() {
        let decoders = FakeDecoders::with(vec![Script::Frames(4)]);
        let session = Arc::new(Session::new(GuildId::new(1), 50));
        let (transport, frames) = ChannelTransport::new(ChannelId::new(2), 1);
        session.attach_transport(Arc::new(transport));
        session.queue().add([resolved("A")]);

        player(decoders)
            .with_send_timeout(Duration::from_millis(5))
            .play(&session)
            .unwrap()
            .await
            .unwrap();

        // solo cabe uno; el resto se descarta tras el timeout
        assert_eq!(frames.len(), 1);
        assert_eq!(session.state(), PlayState::Stopped);
    }

    #[tokio::test]
    async fn test_not_ready_transport_drops_frames() {
        let decoders = FakeDecoders::with(vec![Script::Frames(3)]);
        let h = harness();
        h.transport.set_ready(false);
        h.session.queue().add([resolved("A")]);

        player(decoders).play(&h.session).unwrap().await.unwrap();
        assert!(h.frames.is_empty());
        assert_eq!(h.counters.ended.load(Ordering::SeqCst), 1);
    }
}
