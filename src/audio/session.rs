use parking_lot::RwLock;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use super::{
    queue::{Queue, DEFAULT_MAX_HISTORY},
    track::Track,
    transport::VoiceTransport,
};

/// Volumen por defecto cuando no hay configuración del servidor
pub const DEFAULT_VOLUME: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
}

/// Señales de control para el loop de streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Stop,
    Pause,
    Resume,
    Skip,
}

/// Slot de capacidad uno: una señal pendiente del mismo tipo no se duplica
#[derive(Debug)]
pub(crate) struct SignalSlot {
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
}

impl SignalSlot {
    fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self { tx, rx }
    }

    /// Envío no bloqueante; devuelve false si ya había una pendiente
    pub(crate) fn raise(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }

    pub(crate) fn take(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    pub(crate) fn is_pending(&self) -> bool {
        !self.rx.is_empty()
    }

    pub(crate) async fn wait(&self) {
        // el sender vive en el mismo slot, recv_async no puede desconectarse
        let _ = self.rx.recv_async().await;
    }

    fn drain(&self) {
        while self.take() {}
    }
}

#[derive(Debug)]
pub(crate) struct ControlSignals {
    pub(crate) stop: SignalSlot,
    pub(crate) pause: SignalSlot,
    pub(crate) resume: SignalSlot,
    pub(crate) skip: SignalSlot,
}

impl ControlSignals {
    fn new() -> Self {
        Self {
            stop: SignalSlot::new(),
            pause: SignalSlot::new(),
            resume: SignalSlot::new(),
            skip: SignalSlot::new(),
        }
    }

    fn slot(&self, signal: ControlSignal) -> &SignalSlot {
        match signal {
            ControlSignal::Stop => &self.stop,
            ControlSignal::Pause => &self.pause,
            ControlSignal::Resume => &self.resume,
            ControlSignal::Skip => &self.skip,
        }
    }
}

pub type TrackChangeHook = Arc<dyn Fn(&Arc<Track>) + Send + Sync>;
pub type TrackEndHook = Arc<dyn Fn() + Send + Sync>;

/// Callbacks de notificación inyectados al crear la sesión
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub on_track_change: Option<TrackChangeHook>,
    pub on_track_end: Option<TrackEndHook>,
}

impl SessionHooks {
    pub fn on_track_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Track>) + Send + Sync + 'static,
    {
        self.on_track_change = Some(Arc::new(f));
        self
    }

    pub fn on_track_end<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_track_end = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("on_track_change", &self.on_track_change.is_some())
            .field("on_track_end", &self.on_track_end.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct SessionState {
    state: PlayState,
    volume: u8,
    channel_id: Option<ChannelId>,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused_duration: Duration,
}

/// Sesión de reproducción de un servidor.
///
/// Agrupa la cola, el estado de reproducción, el volumen, la contabilidad
/// de tiempo transcurrido y las cuatro señales de control que consume el
/// loop de streaming. Cada llamada es corta y síncrona; la atomicidad no
/// se extiende entre llamadas distintas.
pub struct Session {
    guild_id: GuildId,
    queue: Queue,
    inner: RwLock<SessionState>,
    transport: RwLock<Option<Arc<dyn VoiceTransport>>>,
    signals: ControlSignals,
    hooks: SessionHooks,
    stream_lease: Arc<Mutex<()>>,
    stop_generation: AtomicU64,
}

impl Session {
    pub fn new(guild_id: GuildId, default_volume: u8) -> Self {
        Self {
            guild_id,
            queue: Queue::with_max_history(DEFAULT_MAX_HISTORY),
            inner: RwLock::new(SessionState {
                state: PlayState::Stopped,
                volume: default_volume.min(100),
                channel_id: None,
                started_at: None,
                paused_at: None,
                paused_duration: Duration::ZERO,
            }),
            transport: RwLock::new(None),
            signals: ControlSignals::new(),
            hooks: SessionHooks::default(),
            stream_lease: Arc::new(Mutex::new(())),
            stop_generation: AtomicU64::new(0),
        }
    }

    pub fn with_hooks(mut self, hooks: SessionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.queue = Queue::with_max_history(max_history);
        self
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Conecta (o reemplaza) el transporte de voz
    pub fn attach_transport(&self, transport: Arc<dyn VoiceTransport>) {
        let channel_id = transport.channel_id();
        *self.transport.write() = Some(transport);
        self.inner.write().channel_id = Some(channel_id);
        debug!("🔌 Transporte conectado en guild {} (canal {})", self.guild_id, channel_id);
    }

    pub fn detach_transport(&self) -> Option<Arc<dyn VoiceTransport>> {
        self.inner.write().channel_id = None;
        self.transport.write().take()
    }

    pub fn transport(&self) -> Option<Arc<dyn VoiceTransport>> {
        self.transport.read().clone()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.inner.read().channel_id
    }

    pub fn state(&self) -> PlayState {
        self.inner.read().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlayState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlayState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PlayState::Stopped
    }

    pub fn volume(&self) -> u8 {
        self.inner.read().volume
    }

    /// Ajusta el volumen, limitado a [0, 100]. Se aplica al iniciar el próximo track.
    pub fn set_volume(&self, volume: i32) -> u8 {
        let clamped = volume.clamp(0, 100) as u8;
        self.inner.write().volume = clamped;
        info!("🔊 Volumen ajustado a {}% en guild {}", clamped, self.guild_id);
        clamped
    }

    /// Tiempo reproducido del track actual, sin contar pausas
    pub fn elapsed(&self) -> Duration {
        let s = self.inner.read();
        let Some(started_at) = s.started_at else {
            return Duration::ZERO;
        };

        let until = match (s.state, s.paused_at) {
            (PlayState::Paused, Some(paused_at)) => paused_at,
            _ => Instant::now(),
        };

        until
            .saturating_duration_since(started_at)
            .saturating_sub(s.paused_duration)
    }

    /// Pausa si está reproduciendo; no hace nada en otro estado
    pub fn pause(&self) -> bool {
        {
            let mut s = self.inner.write();
            if s.state != PlayState::Playing {
                return false;
            }
            s.state = PlayState::Paused;
            s.paused_at = Some(Instant::now());
        }

        self.signals.pause.raise();
        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        true
    }

    /// Reanuda si está en pausa; no hace nada en otro estado
    pub fn resume(&self) -> bool {
        {
            let mut s = self.inner.write();
            if s.state != PlayState::Paused {
                return false;
            }
            if let Some(paused_at) = s.paused_at.take() {
                s.paused_duration += paused_at.elapsed();
            }
            s.state = PlayState::Playing;
        }

        self.signals.resume.raise();
        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        true
    }

    /// Pide al loop de streaming saltar al siguiente track
    pub fn skip(&self) {
        self.signals.skip.raise();
        debug!("⏭️ Skip solicitado en guild {}", self.guild_id);
    }

    /// Detiene la reproducción; siempre gana sobre cualquier otra señal
    pub fn stop(&self) {
        {
            let mut s = self.inner.write();
            s.state = PlayState::Stopped;
            s.started_at = None;
            s.paused_at = None;
            s.paused_duration = Duration::ZERO;
        }

        self.stop_generation.fetch_add(1, Ordering::SeqCst);
        self.signals.stop.raise();
        info!("⏹️ Stop solicitado en guild {}", self.guild_id);
    }

    pub fn has_pending(&self, signal: ControlSignal) -> bool {
        self.signals.slot(signal).is_pending()
    }

    /// Descarta señales que quedaron sin consumir
    pub fn drain_signals(&self) {
        self.signals.stop.drain();
        self.signals.pause.drain();
        self.signals.resume.drain();
        self.signals.skip.drain();
    }

    // Operaciones usadas por el loop de streaming

    pub(crate) fn signals(&self) -> &ControlSignals {
        &self.signals
    }

    pub(crate) fn stream_lease(&self) -> Arc<Mutex<()>> {
        self.stream_lease.clone()
    }

    /// Cuenta los stops emitidos; permite descartar reproducciones que esperaban turno
    pub(crate) fn stop_generation(&self) -> u64 {
        self.stop_generation.load(Ordering::SeqCst)
    }

    /// Stopped/Paused -> Playing, reinicia el reloj del track
    pub(crate) fn start_playback(&self) {
        let mut s = self.inner.write();
        s.state = PlayState::Playing;
        s.started_at = Some(Instant::now());
        s.paused_at = None;
        s.paused_duration = Duration::ZERO;
    }

    /// Marca Paused desde el loop si nadie reanudó mientras tanto
    pub(crate) fn enter_paused(&self) {
        let mut s = self.inner.write();
        if s.state == PlayState::Playing && !self.signals.resume.is_pending() {
            s.state = PlayState::Paused;
            s.paused_at = Some(Instant::now());
        }
    }

    /// Fin de reproducción sin más tracks
    pub(crate) fn finish(&self) {
        let mut s = self.inner.write();
        s.state = PlayState::Stopped;
        s.started_at = None;
        s.paused_at = None;
        s.paused_duration = Duration::ZERO;
    }

    pub(crate) fn notify_track_changed(&self, track: &Arc<Track>) {
        // el hook se clona para no invocarlo con ningún lock tomado
        if let Some(hook) = self.hooks.on_track_change.clone() {
            hook(track);
        }
    }

    pub(crate) fn notify_track_ended(&self) {
        if let Some(hook) = self.hooks.on_track_end.clone() {
            hook();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("guild_id", &self.guild_id)
            .field("state", &self.state())
            .field("volume", &self.volume())
            .field("queue_len", &self.queue.len())
            .field("hooks", &self.hooks)
            .finish()
    }
}
