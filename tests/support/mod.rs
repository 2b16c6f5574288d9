#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    routing::any,
    Router,
};
use dropzone::record::{FileRecord, MetaPatch};
use dropzone::{
    Dropzone, DropzoneHooks, FileId, FileStatus, RawFile, ReadyDecision, UploadTrigger,
};
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A request seen by the test server
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub path: String,
    pub method: Method,
    pub requested_with: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ReceivedUpload {
    pub fn body_contains(&self, needle: &[u8]) -> bool {
        self.body.windows(needle.len()).any(|w| w == needle)
    }
}

#[derive(Clone, Default)]
struct ServerState {
    received: Arc<Mutex<Vec<ReceivedUpload>>>,
}

impl ServerState {
    fn record(&self, path: &str, method: Method, headers: &HeaderMap, body: Bytes) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.received.lock().unwrap().push(ReceivedUpload {
            path: path.to_string(),
            method,
            requested_with: header("x-requested-with"),
            content_type: header("content-type"),
            body,
        });
    }
}

/// In-process upload endpoint:
/// - `/ok` answers 200
/// - `/fail` answers 500
/// - `/slow` never answers within a test's lifetime
pub struct TestServer {
    pub base_url: String,
    state: ServerState,
}

impl TestServer {
    pub async fn start() -> Self {
        let state = ServerState::default();

        let app = Router::new()
            .route("/ok", any(ok_handler))
            .route("/fail", any(fail_handler))
            .route("/slow", any(slow_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn received(&self) -> Vec<ReceivedUpload> {
        self.state.received.lock().unwrap().clone()
    }
}

async fn ok_handler(
    State(state): State<ServerState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.record("/ok", method, &headers, body);
    StatusCode::OK
}

async fn fail_handler(
    State(state): State<ServerState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.record("/fail", method, &headers, body);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn slow_handler() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(60)).await;
    StatusCode::OK
}

/// A URL nothing listens on
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/upload", addr)
}

/// Hooks that record every callback, optionally delaying uploads or
/// answering status changes with a metadata patch
#[derive(Default)]
pub struct RecordingHooks {
    pub transitions: Mutex<Vec<(FileId, Option<FileStatus>, FileStatus)>>,
    pub triggers: Mutex<Vec<UploadTrigger>>,
    pub cancelled: Mutex<Vec<FileId>>,
    pub removed: Mutex<Vec<FileId>>,
    pub restarted: Mutex<Vec<FileId>>,
    pub submitted: Mutex<Vec<(Vec<FileId>, Vec<FileId>)>>,
    pub delay_uploads: bool,
    pub status_patch: Option<MetaPatch>,
}

impl RecordingHooks {
    pub fn delaying() -> Self {
        Self {
            delay_uploads: true,
            ..Default::default()
        }
    }

    pub fn patching(patch: MetaPatch) -> Self {
        Self {
            status_patch: Some(patch),
            ..Default::default()
        }
    }

    /// Statuses reported for one file, in order
    pub fn statuses(&self, id: FileId) -> Vec<FileStatus> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(file_id, _, _)| *file_id == id)
            .map(|(_, _, status)| *status)
            .collect()
    }

    pub fn trigger(&self, id: FileId) -> Option<UploadTrigger> {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.file_id() == id)
            .cloned()
    }
}

impl DropzoneHooks for RecordingHooks {
    fn on_change_status(
        &self,
        record: &FileRecord,
        previous: Option<FileStatus>,
    ) -> Option<MetaPatch> {
        self.transitions
            .lock()
            .unwrap()
            .push((record.id(), previous, record.status()));
        self.status_patch.clone()
    }

    fn on_upload_ready(&self, _record: &FileRecord, trigger: &UploadTrigger) -> ReadyDecision {
        self.triggers.lock().unwrap().push(trigger.clone());
        if self.delay_uploads {
            ReadyDecision::Delay
        } else {
            ReadyDecision::Proceed
        }
    }

    fn on_cancel(&self, record: &FileRecord) {
        self.cancelled.lock().unwrap().push(record.id());
    }

    fn on_remove(&self, record: &FileRecord) {
        self.removed.lock().unwrap().push(record.id());
    }

    fn on_restart(&self, record: &FileRecord) {
        self.restarted.lock().unwrap().push(record.id());
    }

    fn on_submit(&self, uploaded: &[FileRecord], all: &[FileRecord]) {
        self.submitted.lock().unwrap().push((
            uploaded.iter().map(FileRecord::id).collect(),
            all.iter().map(FileRecord::id).collect(),
        ));
    }
}

/// Poll until a file reaches `status`, or panic after five seconds
pub async fn wait_for_status(dropzone: &Dropzone, id: FileId, status: FileStatus) -> FileRecord {
    wait_for(dropzone, id, |r| r.status() == status)
        .await
        .unwrap_or_else(|last| {
            panic!(
                "file {} never reached {}, last seen {:?}",
                id,
                status,
                last.map(|r| r.status())
            )
        })
}

/// Poll until a file satisfies `predicate`. On timeout returns the last
/// record seen.
pub async fn wait_for<F>(
    dropzone: &Dropzone,
    id: FileId,
    predicate: F,
) -> Result<FileRecord, Option<FileRecord>>
where
    F: Fn(&FileRecord) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = dropzone.file(id);
        if let Some(record) = current.as_ref().filter(|r| predicate(r)) {
            return Ok(record.clone());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(current);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Encode a solid PNG
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// A real PNG padded with trailing bytes to an exact size
pub fn png_file(name: &str, width: u32, height: u32, size: usize) -> RawFile {
    let mut bytes = png_bytes(width, height);
    assert!(bytes.len() <= size, "png larger than {} bytes", size);
    bytes.resize(size, 0);
    RawFile::new(name, "image/png", bytes)
}

pub fn text_file(name: &str, content: &str) -> RawFile {
    RawFile::new(name, "text/plain", content.as_bytes().to_vec())
}
