use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::ChannelId;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Destino de los frames Opus de una sesión.
///
/// `send_frame` puede esperar mientras el destino está lleno; el player
/// aplica su propio timeout y descarta el frame si no entra a tiempo.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Canal de voz al que está ligada la sesión
    fn channel_id(&self) -> ChannelId;

    /// Indica si el transporte acepta frames
    fn is_ready(&self) -> bool;

    /// Activa o desactiva el indicador de "hablando"
    fn set_speaking(&self, speaking: bool);

    /// Entrega un frame Opus comprimido
    async fn send_frame(&self, frame: Bytes) -> Result<()>;
}

/// Transporte basado en un canal acotado.
///
/// El driver del gateway consume el [`FrameReceiver`] a ritmo de 20 ms; la
/// capacidad del canal marca cuánta contrapresión soporta el loop de
/// streaming antes de empezar a descartar frames.
pub struct ChannelTransport {
    channel_id: ChannelId,
    frames: flume::Sender<Bytes>,
    ready: AtomicBool,
    speaking: AtomicBool,
}

/// Extremo receptor de un [`ChannelTransport`]
pub type FrameReceiver = flume::Receiver<Bytes>;

impl ChannelTransport {
    pub fn new(channel_id: ChannelId, capacity: usize) -> (Self, FrameReceiver) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        let transport = Self {
            channel_id,
            frames: tx,
            ready: AtomicBool::new(true),
            speaking: AtomicBool::new(false),
        };
        (transport, rx)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for ChannelTransport {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.frames.is_disconnected()
    }

    fn set_speaking(&self, speaking: bool) {
        if self.speaking.swap(speaking, Ordering::SeqCst) != speaking {
            debug!("🗣️ Speaking={} en canal {}", speaking, self.channel_id);
        }
    }

    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.frames
            .send_async(frame)
            .await
            .map_err(|_| anyhow::anyhow!("El receptor de frames se cerró"))
    }
}
