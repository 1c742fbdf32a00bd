use thiserror::Error;

/// Errores de precondición de `Player::play` / `Player::play_previous`.
///
/// Se devuelven de forma síncrona y nunca cambian el estado de la sesión.
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("No hay conexión de voz para este servidor")]
    NotConnected,

    #[error("No hay ningún track en la cola")]
    EmptyQueue,

    #[error("El track '{0}' no tiene URL de stream resuelta")]
    Unresolved(String),

    #[error("No hay track anterior")]
    NoPrevious,
}

/// Fallos internos del loop de streaming.
///
/// Nunca llegan al llamador: se registran y se reflejan como transición
/// de estado de la sesión.
#[derive(Debug, Error)]
pub(crate) enum StreamError {
    #[error("No se pudo lanzar el decodificador: {0:#}")]
    Launch(anyhow::Error),

    #[error("No se pudo crear el encoder: {0:#}")]
    Encoder(anyhow::Error),

    #[error("No se pudo resolver la URL de stream: {0:#}")]
    Resolve(anyhow::Error),

    #[error("El decodificador terminó sin producir audio: {}", .0.as_deref().unwrap_or("sin diagnóstico"))]
    DecoderExited(Option<String>),

    #[error("Error leyendo del decodificador: {0}")]
    Read(#[source] std::io::Error),

    #[error("No hay transporte de voz conectado")]
    NoTransport,
}

impl StreamError {
    /// Fallos antes del primer frame: no se dispara track-ended ni se encadena
    pub(crate) fn is_setup(&self) -> bool {
        !matches!(self, StreamError::Read(_))
    }
}
