// # Upload Transport
//
// One multipart HTTP upload for one file:
//
// 1. Ask the params provider where to send the file
// 2. Build the multipart request (fields, then the file as the last part)
// 3. Stream the body, reporting progress
// 4. Report the outcome as a status on the record
//
// The transport never touches records directly. Every change goes through a
// `TransportReporter`, which the manager ties to one record and one handle.

mod body;
mod params;

pub use body::calculate_percent;
pub use params::{StaticUploadParams, UploadParams, UploadParamsProvider};

use crate::record::{FileRecord, MetaPatch};
use crate::status::FileStatus;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Request};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Header sent with every upload so servers can identify the client
pub const IDENTIFICATION_HEADER: (&str, &str) = ("X-Requested-With", "dropzone");

/// Form part name carrying the file content
pub const FILE_FIELD: &str = "file";

/// Content type for file parts whose own type does not parse
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),
}

/// Identity of one transport run. A restart always gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(pub u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Narrow write access to the record being uploaded
pub trait TransportReporter: Send + Sync {
    fn set_status(&self, status: FileStatus);
    fn set_progress(&self, percent: f64);
    fn merge_meta(&self, patch: MetaPatch);
}

/// Live upload. Owns the ability to abort it.
pub struct TransportHandle {
    id: TransportId,
    abort: Arc<Notify>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Ask the upload to stop. The transport reports `aborted` once it
    /// observes the signal, unless it already finished.
    pub fn abort(&self) {
        self.abort.notify_one();
    }

    /// Stop the task without reporting anything
    pub fn terminate(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Starts uploads against destinations supplied by a params provider
#[derive(Clone)]
pub struct UploadTransport {
    client: Client,
    provider: Arc<dyn UploadParamsProvider>,
}

impl UploadTransport {
    pub fn new(provider: Arc<dyn UploadParamsProvider>) -> Self {
        Self::with_client(Client::new(), provider)
    }

    pub fn with_client(client: Client, provider: Arc<dyn UploadParamsProvider>) -> Self {
        Self { client, provider }
    }

    /// Start uploading a file. Returns immediately; every outcome arrives
    /// through the reporter.
    pub fn start(
        &self,
        id: TransportId,
        record: FileRecord,
        reporter: Arc<dyn TransportReporter>,
        runtime_handle: &tokio::runtime::Handle,
    ) -> TransportHandle {
        let abort = Arc::new(Notify::new());
        let task = runtime_handle.spawn(run_upload(
            self.client.clone(),
            self.provider.clone(),
            record,
            reporter,
            abort.clone(),
        ));

        TransportHandle { id, abort, task }
    }
}

async fn run_upload(
    client: Client,
    provider: Arc<dyn UploadParamsProvider>,
    record: FileRecord,
    reporter: Arc<dyn TransportReporter>,
    abort: Arc<Notify>,
) {
    let file_id = record.id();

    let params = tokio::select! {
        biased;
        _ = abort.notified() => {
            info!("Upload of file {} aborted before params were resolved", file_id);
            reporter.set_status(FileStatus::Aborted);
            return;
        }
        params = provider.get_upload_params(&record) => params,
    };

    let Some(params) = params else {
        warn!("No upload params for file {}", file_id);
        reporter.set_status(FileStatus::ErrorUploadParams);
        return;
    };

    if !params.meta.is_empty() {
        reporter.merge_meta(params.meta.clone());
    }

    let request = match build_request(&client, &record, &params, reporter.clone()) {
        Ok(request) => request,
        Err(e) => {
            warn!("Unusable upload params for file {}: {}", file_id, e);
            reporter.set_status(FileStatus::ErrorUploadParams);
            return;
        }
    };

    debug!(
        "Uploading file {} ({} bytes) with {} {}",
        file_id,
        record.file.size,
        request.method(),
        request.url()
    );

    tokio::select! {
        biased;
        _ = abort.notified() => {
            info!("Upload of file {} aborted", file_id);
            reporter.set_status(FileStatus::Aborted);
        }
        _ = send_request(&client, request, file_id, reporter.as_ref()) => {}
    }
}

/// Assemble the multipart request described by the params
fn build_request(
    client: &Client,
    record: &FileRecord,
    params: &UploadParams,
    reporter: Arc<dyn TransportReporter>,
) -> Result<Request, TransportError> {
    let method = match &params.method {
        Some(method) => Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|_| TransportError::InvalidMethod(method.clone()))?,
        None => Method::POST,
    };

    let mut form = Form::new();
    for (name, value) in &params.fields {
        form = form.text(name.clone(), value.clone());
    }

    let file = &record.file;
    if file.size == 0 {
        reporter.set_progress(calculate_percent(0, 0));
    }

    let file_part = || {
        let body = body::progress_body(file.shared_content(), reporter.clone());
        Part::stream_with_length(body, file.size).file_name(file.name.clone())
    };
    let part = if file.mime_type.is_empty() {
        file_part()
    } else {
        match file_part().mime_str(&file.mime_type) {
            Ok(part) => part,
            Err(e) => {
                warn!(
                    "File {} has unusable type '{}' ({}), sending as {}",
                    record.id(),
                    file.mime_type,
                    e,
                    FALLBACK_CONTENT_TYPE
                );
                file_part().mime_str(FALLBACK_CONTENT_TYPE)?
            }
        }
    };
    form = form.part(FILE_FIELD, part);

    let mut builder = client
        .request(method, &params.url)
        .header(IDENTIFICATION_HEADER.0, IDENTIFICATION_HEADER.1);
    for (name, value) in &params.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    Ok(builder.multipart(form).build()?)
}

/// Send the request and map each response stage to a status
async fn send_request(
    client: &Client,
    request: Request,
    file_id: crate::record::FileId,
    reporter: &dyn TransportReporter,
) {
    let response = match client.execute(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Upload of file {} failed before a response: {}", file_id, e);
            reporter.set_status(FileStatus::ExceptionUpload);
            return;
        }
    };

    let status = response.status();
    if status.as_u16() >= 400 {
        warn!("Upload of file {} rejected with {}", file_id, status);
        reporter.set_status(FileStatus::ErrorUpload);
        return;
    }

    reporter.set_status(FileStatus::HeadersReceived);

    match response.bytes().await {
        Ok(body) => {
            info!(
                "Upload of file {} complete ({}, {} byte response)",
                file_id,
                status,
                body.len()
            );
            reporter.set_status(FileStatus::Done);
        }
        Err(e) => {
            warn!("Upload of file {} lost its response body: {}", file_id, e);
            reporter.set_status(FileStatus::ExceptionUpload);
        }
    }
}
