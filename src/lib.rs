// Library exports for the dropzone binary and integration tests

pub mod accept;
pub mod config;
pub mod file;
pub mod manager;
pub mod preview;
pub mod record;
pub mod status;
pub mod transport;

// Re-export the manager surface at crate root for easier access
pub use config::DropzoneConfig;
pub use file::RawFile;
pub use manager::{
    Dropzone, DropzoneBuilder, DropzoneError, DropzoneEvent, DropzoneHandle, DropzoneHooks,
    ReadyDecision, UploadTrigger,
};
pub use record::{FileId, FileMeta, FileRecord, MetaPatch};
pub use status::FileStatus;
pub use transport::{StaticUploadParams, UploadParams, UploadParamsProvider};
