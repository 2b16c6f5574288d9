use crate::file::RawFile;
use crate::status::FileStatus;
use crate::transport::TransportId;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Metadata fields merged from hooks or upload params.
pub type MetaPatch = Map<String, Value>;

/// Keys a patch may never overwrite: the manager owns status and identity.
const PROTECTED_KEYS: [&str; 2] = ["status", "id"];

/// Identifier of a retained file, unique for the lifetime of its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutable descriptive state of a file.
///
/// Serializes with the field names collaborators see (`type`, `previewUrl`,
/// `videoWidth`, ...). Unknown fields land in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub id: FileId,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date: Option<String>,
    pub uploaded_date: String,
    pub percent: f64,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_height: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileMeta {
    /// Snapshot the attributes of a freshly selected file.
    pub fn from_file(id: FileId, file: &RawFile) -> Self {
        Self {
            id,
            name: file.name.clone(),
            size: file.size,
            mime_type: file.mime_type.clone(),
            last_modified_date: file
                .last_modified
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            uploaded_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            percent: 0.0,
            status: FileStatus::Preparing,
            preview_url: None,
            width: None,
            height: None,
            duration: None,
            video_width: None,
            video_height: None,
            extra: Map::new(),
        }
    }

    /// Merge a patch over this metadata. `status` and `id` keys are ignored.
    ///
    /// Known fields are replaced by value (a `null` clears an optional field),
    /// anything else is stored in `extra`. On a type mismatch nothing changes.
    pub fn merge_patch(&mut self, patch: &MetaPatch) -> Result<(), serde_json::Error> {
        let mut value = serde_json::to_value(&*self)?;
        if let Value::Object(fields) = &mut value {
            for (key, field) in patch {
                if PROTECTED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                fields.insert(key.clone(), field.clone());
            }
        }

        *self = serde_json::from_value(value)?;
        Ok(())
    }
}

/// Read-only snapshot of a tracked file handed to collaborators
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub file: RawFile,
    pub meta: FileMeta,
    /// Identity of the current transport, if an upload was started
    pub transport_id: Option<TransportId>,
    /// A deferred upload trigger is waiting to be fired
    pub upload_pending: bool,
}

impl FileRecord {
    pub fn id(&self) -> FileId {
        self.meta.id
    }

    pub fn status(&self) -> FileStatus {
        self.meta.status
    }
}
