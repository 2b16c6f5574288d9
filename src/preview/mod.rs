// # Preview Module
//
// Best-effort descriptive metadata for accepted files:
//
// - **raster**: pixel dimensions of images
// - **audio**: duration of audio files (symphonia probe)
// - **video**: duration and dimensions of MP4/QuickTime files
// - **store**: `preview://` handles that expose file bytes for display
//
// Extraction never decides a file's status. Failures only leave fields empty.

mod audio;
mod raster;
mod store;
mod video;

pub use audio::audio_duration;
pub use raster::image_dimensions;
pub use store::{PreviewGuard, PreviewStore};
pub use video::{video_info, VideoInfo};

use crate::file::RawFile;
use crate::record::FileMeta;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Symphonia error: {0}")]
    Audio(#[from] symphonia::core::errors::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No playable tracks found")]
    NoTracks,
    #[error("Duration is not recorded in the stream header")]
    UnknownDuration,
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Kinds of media the extractor can inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewKind {
    Image,
    Audio,
    Video,
}

impl PreviewKind {
    pub const ALL: [PreviewKind; 3] = [PreviewKind::Image, PreviewKind::Audio, PreviewKind::Video];

    /// Kind implied by a MIME type's major part
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let major = mime_type.split('/').next()?.trim().to_lowercase();
        match major.as_str() {
            "image" => Some(PreviewKind::Image),
            "audio" => Some(PreviewKind::Audio),
            "video" => Some(PreviewKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for PreviewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviewKind::Image => f.write_str("image"),
            PreviewKind::Audio => f.write_str("audio"),
            PreviewKind::Video => f.write_str("video"),
        }
    }
}

impl FromStr for PreviewKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" => Ok(PreviewKind::Image),
            "audio" => Ok(PreviewKind::Audio),
            "video" => Ok(PreviewKind::Video),
            other => Err(format!("unknown preview type '{}'", other)),
        }
    }
}

/// Fields contributed by the extractor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewMetadata {
    pub preview_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
}

impl PreviewMetadata {
    /// Copy the populated fields onto a file's metadata
    pub fn apply_to(&self, meta: &mut FileMeta) {
        if self.preview_url.is_some() {
            meta.preview_url = self.preview_url.clone();
        }
        meta.width = self.width.or(meta.width);
        meta.height = self.height.or(meta.height);
        meta.duration = self.duration.or(meta.duration);
        meta.video_width = self.video_width.or(meta.video_width);
        meta.video_height = self.video_height.or(meta.video_height);
    }
}

/// Derives preview metadata for the enabled media kinds
#[derive(Clone)]
pub struct MetadataExtractor {
    kinds: HashSet<PreviewKind>,
    store: PreviewStore,
}

impl MetadataExtractor {
    pub fn new(kinds: impl IntoIterator<Item = PreviewKind>, store: PreviewStore) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            store,
        }
    }

    /// Kind to extract for a file, if its type is recognized and enabled
    pub fn kind_for(&self, file: &RawFile) -> Option<PreviewKind> {
        PreviewKind::from_mime(&file.mime_type).filter(|kind| self.kinds.contains(kind))
    }

    /// Inspect a file. Blocking: call from a blocking context.
    ///
    /// Images keep their preview handle in the result; the caller owns it.
    /// Audio and video handles only live for the duration of the decode.
    pub fn extract(&self, file: &RawFile) -> Result<PreviewMetadata, PreviewError> {
        let Some(kind) = self.kind_for(file) else {
            return Ok(PreviewMetadata::default());
        };

        let guard = self.store.register(file.shared_content());
        let content = self
            .store
            .resolve(guard.url())
            .ok_or_else(|| PreviewError::Task("preview handle vanished".to_string()))?;

        debug!("Extracting {} metadata for {}", kind, file.name);

        match kind {
            PreviewKind::Image => {
                let (width, height) = image_dimensions(&content)?;
                Ok(PreviewMetadata {
                    preview_url: Some(guard.keep()),
                    width: Some(width),
                    height: Some(height),
                    ..Default::default()
                })
            }
            PreviewKind::Audio => {
                let extension = file.extension();
                let duration = audio_duration(content.to_vec(), extension.as_deref())?;
                Ok(PreviewMetadata {
                    duration: Some(duration),
                    ..Default::default()
                })
            }
            PreviewKind::Video => {
                let info = video_info(&content)?;
                Ok(PreviewMetadata {
                    duration: info.duration,
                    video_width: info.width,
                    video_height: info.height,
                    ..Default::default()
                })
            }
        }
    }

    /// Run `extract` on the blocking pool
    pub async fn extract_async(&self, file: RawFile) -> Result<PreviewMetadata, PreviewError> {
        if self.kind_for(&file).is_none() {
            return Ok(PreviewMetadata::default());
        }

        let extractor = self.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&file))
            .await
            .map_err(|e| PreviewError::Task(e.to_string()))?
    }
}
