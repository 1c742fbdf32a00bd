use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{io, path::PathBuf, process::Stdio, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    task::JoinHandle,
};
use tracing::{debug, warn};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// 20 ms a 48 kHz
pub const FRAME_SAMPLES: usize = 960;
/// 960 muestras x 2 canales x 2 bytes
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * 2;

/// Cuánto esperar a que el proceso salga por sí mismo tras fin de stream
const EXIT_GRACE: Duration = Duration::from_secs(2);

pub type PcmFrame = [u8; FRAME_BYTES];

/// Resultado de leer un frame del decodificador
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
    /// Frame completo en el buffer
    Frame,
    /// Lectura corta seguida de fin limpio: el track terminó
    EndOfStream,
}

/// Cómo terminó el proceso de decodificación
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeExit {
    pub success: bool,
    /// Última línea de diagnóstico del proceso, si la hubo
    pub diagnostic: Option<String>,
}

/// Salida PCM s16le intercalada de un proceso de decodificación
#[async_trait]
pub trait PcmStream: Send {
    /// Lee exactamente un frame en `buf`
    async fn read_frame(&mut self, buf: &mut PcmFrame) -> io::Result<FrameRead>;

    /// Espera la salida natural del proceso (tras fin de stream) y la recoge
    async fn finish(&mut self) -> DecodeExit;

    /// Mata el proceso y espera su salida
    async fn terminate(&mut self);
}

/// Lanza procesos de decodificación ligados a una URL de stream
#[async_trait]
pub trait DecoderFactory: Send + Sync {
    async fn spawn(&self, stream_url: &str, volume: u8) -> Result<Box<dyn PcmStream>>;
}

/// Decodificador basado en un proceso `ffmpeg`
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg_path: PathBuf,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegDecoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Argumentos para emitir PCM crudo con reconexión ante cortes de red
    pub fn args(stream_url: &str, volume: u8) -> Vec<String> {
        let volume = f32::from(volume.min(100)) / 100.0;

        let mut args: Vec<String> = ["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend([
            "-i".to_string(),
            stream_url.to_string(),
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            CHANNELS.to_string(),
            "-af".to_string(),
            format!("volume={:.2}", volume),
            "-loglevel".to_string(),
            "warning".to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }
}

#[async_trait]
impl DecoderFactory for FfmpegDecoder {
    async fn spawn(&self, stream_url: &str, volume: u8) -> Result<Box<dyn PcmStream>> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(Self::args(stream_url, volume))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("No se pudo lanzar {}", self.ffmpeg_path.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg sin stdout"))?;

        let last_line = Arc::new(Mutex::new(None));
        let stderr_task = child.stderr.take().map(|stderr| {
            let last_line = last_line.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("ffmpeg: {}", line);
                    *last_line.lock() = Some(line);
                }
            })
        });

        debug!("🎛️ ffmpeg lanzado (pid {:?})", child.id());

        Ok(Box::new(FfmpegStream {
            child,
            stdout,
            last_line,
            stderr_task,
        }))
    }
}

struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    last_line: Arc<Mutex<Option<String>>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl FfmpegStream {
    async fn collect_diagnostic(&mut self) -> Option<String> {
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(EXIT_GRACE, task).await;
        }
        self.last_line.lock().take()
    }
}

#[async_trait]
impl PcmStream for FfmpegStream {
    async fn read_frame(&mut self, buf: &mut PcmFrame) -> io::Result<FrameRead> {
        match self.stdout.read_exact(buf).await {
            Ok(_) => Ok(FrameRead::Frame),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(FrameRead::EndOfStream),
            Err(e) => Err(e),
        }
    }

    async fn finish(&mut self) -> DecodeExit {
        let status = match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                warn!("⏰ ffmpeg no terminó tras fin de stream, forzando salida");
                let _ = self.child.kill().await;
                None
            }
        };

        DecodeExit {
            success: status.map(|s| s.success()).unwrap_or(false),
            diagnostic: self.collect_diagnostic().await,
        }
    }

    async fn terminate(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("ffmpeg ya había terminado: {}", e);
        }
        let _ = self.collect_diagnostic().await;
    }
}
