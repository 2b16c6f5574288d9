use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use dropzone::record::{FileRecord, MetaPatch};
use dropzone::{
    Dropzone, DropzoneConfig, DropzoneHooks, FileStatus, RawFile, StaticUploadParams,
    UploadParams,
};

/// Upload destination for the CLI, read from `DROPZONE_UPLOAD_URL` and
/// `DROPZONE_UPLOAD_METHOD` unless given on the command line
struct UploaderConfig {
    url: Option<String>,
    method: Option<String>,
}

impl UploaderConfig {
    fn from_env() -> Self {
        Self {
            url: env::var("DROPZONE_UPLOAD_URL").ok().filter(|s| !s.is_empty()),
            method: env::var("DROPZONE_UPLOAD_METHOD").ok().filter(|s| !s.is_empty()),
        }
    }

    fn into_params(self) -> Option<UploadParams> {
        let url = self.url?;
        let params = UploadParams::new(url);
        Some(match self.method {
            Some(method) => params.method(method),
            None => params,
        })
    }
}

/// Logs every transition
struct LoggingHooks;

impl DropzoneHooks for LoggingHooks {
    fn on_change_status(
        &self,
        record: &FileRecord,
        previous: Option<FileStatus>,
    ) -> Option<MetaPatch> {
        let meta = &record.meta;
        match previous {
            Some(previous) => info!("{} [{}]: {} -> {}", meta.name, meta.id, previous, meta.status),
            None => info!("{} [{}]: {}", meta.name, meta.id, meta.status),
        }
        None
    }

    fn on_submit(&self, uploaded: &[FileRecord], all: &[FileRecord]) {
        info!("Uploaded {} of {} files", uploaded.len(), all.len());
    }
}

fn is_settled(status: FileStatus) -> bool {
    !matches!(
        status,
        FileStatus::Preparing
            | FileStatus::GettingUploadParams
            | FileStatus::Uploading
            | FileStatus::HeadersReceived
    )
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let mut uploader = UploaderConfig::from_env();
    let mut paths: Vec<PathBuf> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--url" | "--method" => {
                if i + 1 >= args.len() {
                    error!("{} requires a value", args[i]);
                    print_usage(&args[0]);
                    std::process::exit(1);
                }
                let value = args[i + 1].clone();
                if args[i] == "--url" {
                    uploader.url = Some(value);
                } else {
                    uploader.method = Some(value);
                }
                i += 2;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                return;
            }
            path => {
                paths.push(PathBuf::from(path));
                i += 1;
            }
        }
    }

    let config = match DropzoneConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut builder = Dropzone::builder(config).hooks(Arc::new(LoggingHooks));
    match uploader.into_params() {
        Some(params) => {
            info!("Uploading to {}", params.url);
            builder = builder.upload_params(Arc::new(StaticUploadParams(params)));
        }
        None => warn!("No upload URL configured, files will only be validated"),
    }

    let dropzone = match builder.start(tokio::runtime::Handle::current()) {
        Ok(dropzone) => dropzone,
        Err(e) => {
            error!("Failed to start dropzone: {}", e);
            std::process::exit(1);
        }
    };

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        match RawFile::from_path(path).await {
            Ok(file) => files.push(file),
            Err(e) => error!("Failed to read {}: {}", path.display(), e),
        }
    }

    let mut events = dropzone.subscribe_all();
    let rejected = match dropzone.accept(files).await {
        Ok(records) => records
            .iter()
            .filter(|r| r.status().is_rejection())
            .count(),
        Err(e) => {
            error!("Failed to accept files: {}", e);
            std::process::exit(1);
        }
    };

    while !dropzone.files().iter().all(|r| is_settled(r.status())) {
        if events.recv().await.is_none() {
            break;
        }
    }

    let failed = rejected
        + dropzone
            .files()
            .iter()
            .filter(|r| r.status().is_error() || r.status() == FileStatus::Aborted)
            .count();

    if let Err(e) = dropzone.submit().await {
        error!("Failed to submit: {}", e);
    }
    if let Err(e) = dropzone.shutdown().await {
        error!("Failed to shut down cleanly: {}", e);
    }

    if failed > 0 {
        error!("{} files failed", failed);
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} [--url <url>] [--method <method>] <file>...", program);
    eprintln!();
    eprintln!("Upload files through the dropzone lifecycle. Without a URL the");
    eprintln!("files are only checked against the DROPZONE_* limits.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  DROPZONE_UPLOAD_URL, DROPZONE_UPLOAD_METHOD");
    eprintln!("  DROPZONE_MIN_SIZE_BYTES, DROPZONE_MAX_SIZE_BYTES, DROPZONE_MAX_FILES");
    eprintln!("  DROPZONE_ACCEPT, DROPZONE_PREVIEW_TYPES");
}
