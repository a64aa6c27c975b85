use thiserror::Error;

/// Errores de dominio devueltos por el gestor de sesiones.
///
/// Todas las operaciones de comando terminan en `Result<CommandReply, PlayerError>`;
/// ninguna variante destruye la sesión ni tumba el proceso.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error("Debes estar en un canal de voz")]
    NoVoiceChannel,

    #[error("No pude conectarme al canal de voz: {0}")]
    ConnectFailed(String),

    #[error("No pude moverme a tu canal de voz: {0}")]
    MoveFailed(String),

    #[error("No se encontraron resultados para: {0}")]
    NotFound(String),

    #[error("El backend de audio no está disponible")]
    BackendUnavailable,

    #[error("No se pudo cargar la pista: {0}")]
    LoadFailed(String),

    #[error("No hay nada reproduciéndose")]
    NothingPlaying,

    #[error("La reproducción no está en pausa")]
    NothingPaused,

    #[error("Índice {index} fuera de rango (la cola tiene {len} canciones)")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Operación no válida: {0}")]
    InvalidState(&'static str),

    #[error("Volumen inválido: {0} (debe estar entre 0 y 100)")]
    InvalidVolume(i64),

    #[error("No estoy conectado a ningún canal de voz")]
    NotConnected,

    #[error("La cola está llena (máximo {0} canciones)")]
    QueueFull(usize),
}
