//! Resolución de texto libre o URLs a un [`Track`] reproducible.

pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;

use crate::audio::Track;

pub use ytdlp::YtDlpResolver;

/// Trait común para los resolvedores de búsqueda
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Devuelve el mejor resultado para `query`, o `None` si no hubo ninguno
    async fn search(&self, query: &str) -> Result<Option<Track>>;
}

/// Verifica si la consulta ya es una URL reproducible
pub fn is_url(query: &str) -> bool {
    let query = query.trim();
    query.starts_with("http://") || query.starts_with("https://")
}
