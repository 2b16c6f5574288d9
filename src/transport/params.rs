use crate::record::{FileRecord, MetaPatch};
use serde::{Deserialize, Serialize};

/// Where and how to upload one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadParams {
    pub url: String,
    /// HTTP method, `POST` when absent
    #[serde(default)]
    pub method: Option<String>,
    /// Form fields sent ahead of the file part
    #[serde(default)]
    pub fields: Vec<(String, String)>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Merged onto the record's metadata before the request is sent
    #[serde(default)]
    pub meta: MetaPatch,
}

impl UploadParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// Supplies upload destinations (allows mocking for tests).
///
/// Returning `None` marks the file `error_upload_params` without sending
/// a request.
#[async_trait::async_trait]
pub trait UploadParamsProvider: Send + Sync {
    async fn get_upload_params(&self, record: &FileRecord) -> Option<UploadParams>;
}

/// Provider that sends every file to the same destination
#[derive(Debug, Clone)]
pub struct StaticUploadParams(pub UploadParams);

#[async_trait::async_trait]
impl UploadParamsProvider for StaticUploadParams {
    async fn get_upload_params(&self, _record: &FileRecord) -> Option<UploadParams> {
        if self.0.url.trim().is_empty() {
            return None;
        }
        Some(self.0.clone())
    }
}
