use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a tracked file. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Type did not match the accept pattern. Never retained.
    RejectedFileType,
    /// Capacity was already reached. Never retained.
    RejectedMaxFiles,
    Preparing,
    ErrorFileSize,
    GettingUploadParams,
    ErrorUploadParams,
    Uploading,
    HeadersReceived,
    Done,
    ErrorUpload,
    Aborted,
    /// Connection-level failure, no HTTP status was received
    ExceptionUpload,
    /// Waiting at the ready gate for an external trigger
    Ready,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::RejectedFileType => "rejected_file_type",
            FileStatus::RejectedMaxFiles => "rejected_max_files",
            FileStatus::Preparing => "preparing",
            FileStatus::ErrorFileSize => "error_file_size",
            FileStatus::GettingUploadParams => "getting_upload_params",
            FileStatus::ErrorUploadParams => "error_upload_params",
            FileStatus::Uploading => "uploading",
            FileStatus::HeadersReceived => "headers_received",
            FileStatus::Done => "done",
            FileStatus::ErrorUpload => "error_upload",
            FileStatus::Aborted => "aborted",
            FileStatus::ExceptionUpload => "exception_upload",
            FileStatus::Ready => "ready",
        }
    }

    /// Rejected files are reported once and then dropped.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            FileStatus::RejectedFileType | FileStatus::RejectedMaxFiles
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            FileStatus::ErrorFileSize
                | FileStatus::ErrorUploadParams
                | FileStatus::ErrorUpload
                | FileStatus::ExceptionUpload
        )
    }

    /// Statuses counted as a successful upload by `submit`.
    pub fn is_uploaded(&self) -> bool {
        matches!(self, FileStatus::HeadersReceived | FileStatus::Done)
    }

    /// A transport may still change this record's status.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            FileStatus::GettingUploadParams | FileStatus::Uploading | FileStatus::HeadersReceived
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
