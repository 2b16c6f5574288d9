use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

/// MIME type some browsers report for every file during a drag event.
/// The real type is only known after drop, so it bypasses the accept check.
pub const LEGACY_DRAG_PLACEHOLDER_TYPE: &str = "application/x-moz-file";

/// A user-selected file: attributes plus its immutable byte content.
#[derive(Clone)]
pub struct RawFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    content: Arc<[u8]>,
}

impl RawFile {
    /// Create a file from in-memory content. Size is taken from the content.
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Arc<[u8]>>,
    ) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            size: content.len() as u64,
            mime_type: mime_type.into(),
            last_modified: None,
            content,
        }
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// Read a file from disk, guessing its MIME type from the extension
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let content = fs::read(path).await?;
        let metadata = fs::metadata(path).await?;
        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mime_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(mime_from_extension)
            .unwrap_or("application/octet-stream");

        Ok(Self {
            name,
            size: content.len() as u64,
            mime_type: mime_type.to_string(),
            last_modified,
            content: content.into(),
        })
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn shared_content(&self) -> Arc<[u8]> {
        self.content.clone()
    }

    /// Extension of the file name, lowercased, without the dot
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }
}

impl fmt::Debug for RawFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("last_modified", &self.last_modified)
            .finish()
    }
}

fn mime_from_extension(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" | "log" | "cue" => "text/plain",
        _ => "application/octet-stream",
    }
}
