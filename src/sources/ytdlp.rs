use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{is_url, TrackResolver};
use crate::audio::Track;

/// Resolvedor que consulta `yt-dlp -j` y toma el primer resultado.
pub struct YtDlpResolver {
    binary: String,
    timeout: Duration,
}

/// Campos que nos interesan de la salida JSON de yt-dlp
#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
    id: Option<String>,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn verify(&self) -> Result<String> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                info!("✅ yt-dlp versión: {}", version);
                Ok(version)
            }
            _ => {
                error!("❌ yt-dlp no encontrado. Instala con: pip install yt-dlp");
                anyhow::bail!("yt-dlp no disponible en {}", self.binary);
            }
        }
    }

    fn target(query: &str) -> String {
        let query = query.trim();
        if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn search(&self, query: &str) -> Result<Option<Track>> {
        let target = Self::target(query);
        debug!("🔍 yt-dlp: {}", target);

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(["-j", "--flat-playlist", "--no-playlist", "--no-warnings"])
            .arg(&target)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .with_context(|| format!("yt-dlp tardó más de {}s", self.timeout.as_secs()))?
            .context("No se pudo ejecutar yt-dlp")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló para {}: {}", target, stderr.trim());
            anyhow::bail!("yt-dlp falló: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let track = parse_first_entry(&stdout)?;
        match &track {
            Some(track) => info!("🎵 Encontrado: {} ({})", track.title(), track.source_ref()),
            None => info!("🔍 Sin resultados para: {}", query),
        }
        Ok(track)
    }
}

/// Convierte la primera línea JSON de yt-dlp en un [`Track`].
fn parse_first_entry(stdout: &str) -> Result<Option<Track>> {
    let Some(line) = stdout.lines().map(str::trim).find(|line| !line.is_empty()) else {
        return Ok(None);
    };

    let info: VideoInfo = serde_json::from_str(line).context("JSON inválido de yt-dlp")?;

    let source_ref = info
        .webpage_url
        .or(info.url)
        .or_else(|| info.id.map(|id| format!("https://www.youtube.com/watch?v={}", id)));
    let Some(source_ref) = source_ref else {
        return Ok(None);
    };

    let author = info
        .uploader
        .or(info.channel)
        .unwrap_or_else(|| "Desconocido".to_string());
    let mut track = Track::new(
        info.title.unwrap_or_else(|| "Sin título".to_string()),
        author,
        source_ref,
    );
    if let Some(secs) = info.duration.filter(|secs| secs.is_finite() && *secs >= 0.0) {
        track = track.with_duration(Duration::from_secs_f64(secs));
    }
    Ok(Some(track))
}
