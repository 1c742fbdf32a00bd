use anyhow::{Context, Result};
use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;

use super::decoder::{CHANNELS, FRAME_SAMPLES};

/// Bitrate Opus por defecto (128 kbps)
pub const DEFAULT_BITRATE: u32 = 128_000;

/// Tamaño máximo de un paquete Opus de salida
const MAX_PACKET: usize = 4000;

/// Codificador con estado que comprime un frame PCM de 20 ms por llamada
pub trait FrameEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes>;
}

/// Construye un codificador nuevo por cada track
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn FrameEncoder>>;
}

/// Convierte bytes s16le intercalados a muestras
pub fn pcm_from_le_bytes(bytes: &[u8], out: &mut [i16]) {
    for (sample, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
    }
}

/// Fábrica de codificadores Opus (48 kHz, estéreo, modo Audio)
#[derive(Debug, Clone, Copy)]
pub struct OpusEncoderFactory {
    bitrate: u32,
}

impl Default for OpusEncoderFactory {
    fn default() -> Self {
        Self::new(DEFAULT_BITRATE)
    }
}

impl OpusEncoderFactory {
    pub fn new(bitrate: u32) -> Self {
        Self { bitrate }
    }
}

impl EncoderFactory for OpusEncoderFactory {
    fn create(&self) -> Result<Box<dyn FrameEncoder>> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .context("No se pudo crear el encoder Opus")?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(self.bitrate as i32))
            .context("Bitrate Opus inválido")?;

        Ok(Box::new(OpusFrameEncoder {
            encoder,
            packet: vec![0u8; MAX_PACKET],
        }))
    }
}

struct OpusFrameEncoder {
    encoder: Encoder,
    packet: Vec<u8>,
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes> {
        if pcm.len() != FRAME_SAMPLES * CHANNELS {
            anyhow::bail!(
                "Frame PCM de tamaño inválido: {} muestras (esperado {})",
                pcm.len(),
                FRAME_SAMPLES * CHANNELS
            );
        }

        let len = self.encoder.encode(pcm, &mut self.packet)?;
        Ok(Bytes::copy_from_slice(&self.packet[..len]))
    }
}
