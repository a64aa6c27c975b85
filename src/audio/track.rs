use serenity::model::id::UserId;
use std::time::Duration;

/// Pista inmutable: metadatos para mostrar más la referencia reproducible.
///
/// `source_ref` es opaca para el núcleo; solo el backend sabe resolverla
/// (con Songbird es la URL que se entrega a yt-dlp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    title: String,
    author: String,
    source_ref: String,
    duration: Option<Duration>,
    requested_by: Option<UserId>,
}

impl Track {
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        source_ref: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            source_ref: source_ref.into(),
            duration: None,
            requested_by: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn requested_by(mut self, user_id: UserId) -> Self {
        self.requested_by = Some(user_id);
        self
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn author(&self) -> &str {
        &self.author
    }
    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn requester(&self) -> Option<UserId> {
        self.requested_by
    }
}
