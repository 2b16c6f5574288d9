mod support;
use std::sync::Arc;

use crate::support::{
    closed_port_url, text_file, tracing_init, wait_for, wait_for_status, RecordingHooks,
    TestServer,
};
use dropzone::record::FileRecord;
use dropzone::{
    Dropzone, DropzoneConfig, DropzoneError, DropzoneEvent, FileId, FileStatus, RawFile,
    StaticUploadParams, UploadParams, UploadParamsProvider,
};
use serde_json::json;

fn start_with(
    provider: Arc<dyn UploadParamsProvider>,
    hooks: Arc<RecordingHooks>,
) -> Dropzone {
    tracing_init();
    Dropzone::builder(DropzoneConfig::default())
        .hooks(hooks)
        .upload_params(provider)
        .start(tokio::runtime::Handle::current())
        .expect("Failed to start dropzone")
}

fn start(params: UploadParams, hooks: Arc<RecordingHooks>) -> Dropzone {
    start_with(Arc::new(StaticUploadParams(params)), hooks)
}

async fn accept_one(dropzone: &Dropzone, file: RawFile) -> FileId {
    dropzone.accept(vec![file]).await.unwrap()[0].id()
}

#[tokio::test]
async fn test_successful_upload() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let params = UploadParams::new(server.url("/ok"))
        .field("token", "s3cr3t")
        .header("X-Album", "42");
    let dropzone = start(params, hooks.clone());

    let id = accept_one(&dropzone, text_file("notes.txt", "dropzone payload")).await;
    let record = wait_for_status(&dropzone, id, FileStatus::Done).await;

    assert_eq!(record.meta.percent, 100.0);
    assert!(record.transport_id.is_some());
    assert_eq!(
        hooks.statuses(id),
        vec![
            FileStatus::Preparing,
            FileStatus::Uploading,
            FileStatus::HeadersReceived,
            FileStatus::Done
        ]
    );

    let received = server.received();
    assert_eq!(received.len(), 1);
    let upload = &received[0];
    assert_eq!(upload.method, axum::http::Method::POST);
    assert_eq!(upload.requested_with.as_deref(), Some("dropzone"));
    assert!(upload
        .content_type
        .as_deref()
        .unwrap_or_default()
        .starts_with("multipart/form-data"));
    assert!(upload.body_contains(b"name=\"token\""));
    assert!(upload.body_contains(b"s3cr3t"));
    assert!(upload.body_contains(b"name=\"file\"; filename=\"notes.txt\""));
    assert!(upload.body_contains(b"dropzone payload"));
}

#[tokio::test]
async fn test_method_from_params() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/ok")).method("put"), hooks);

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::Done).await;

    assert_eq!(server.received()[0].method, axum::http::Method::PUT);
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/ok")), hooks);
    let mut events = dropzone.subscribe_all();

    let content = vec![b'x'; 200 * 1024];
    let id = accept_one(&dropzone, RawFile::new("big.bin", "", content)).await;

    let mut progress = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            DropzoneEvent::Progress { id: file, percent } if file == id => progress.push(percent),
            DropzoneEvent::StatusChanged {
                id: file,
                status: FileStatus::Done,
                ..
            } if file == id => break,
            _ => {}
        }
    }

    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| (0.0..=100.0).contains(p)));
    assert_eq!(dropzone.file(id).unwrap().meta.percent, 100.0);
}

#[tokio::test]
async fn test_server_error_is_error_upload() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/fail")), hooks.clone());

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::ErrorUpload).await;

    assert_eq!(server.received().len(), 1);
    assert!(!hooks.statuses(id).contains(&FileStatus::HeadersReceived));
}

#[tokio::test]
async fn test_missing_destination_sends_nothing() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(""), hooks);

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    let record = wait_for_status(&dropzone, id, FileStatus::ErrorUploadParams).await;

    assert!(record.meta.percent < 100.0);
    assert!(server.received().is_empty());
}

#[tokio::test]
async fn test_connection_failure_is_exception_upload() {
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(closed_port_url().await), hooks);

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::ExceptionUpload).await;
}

#[tokio::test]
async fn test_cancel_aborts_upload() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/slow")), hooks.clone());

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::Uploading).await;

    assert!(dropzone.cancel(id).await.unwrap());
    let record = wait_for_status(&dropzone, id, FileStatus::Aborted).await;

    assert!(record.transport_id.is_some());
    assert_eq!(*hooks.cancelled.lock().unwrap(), vec![id]);
}

#[tokio::test]
async fn test_restart_replaces_transport() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/fail")), hooks.clone());

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    let failed = wait_for_status(&dropzone, id, FileStatus::ErrorUpload).await;
    let first_transport = failed.transport_id.expect("first transport");

    assert!(dropzone.restart(id).await.unwrap());

    let restarted = dropzone.file(id).unwrap();
    assert_eq!(restarted.status(), FileStatus::Uploading);
    assert_eq!(restarted.meta.percent, 0.0);
    let second_transport = restarted.transport_id.expect("second transport");
    assert_ne!(first_transport, second_transport);
    assert_eq!(*hooks.restarted.lock().unwrap(), vec![id]);

    wait_for(&dropzone, id, |r| {
        r.status() == FileStatus::ErrorUpload && r.transport_id == Some(second_transport)
    })
    .await
    .expect("restarted upload finished");
    assert_eq!(server.received().len(), 2);
}

#[tokio::test]
async fn test_restart_after_cancel() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/slow")), hooks);

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::Uploading).await;
    assert!(dropzone.cancel(id).await.unwrap());
    wait_for_status(&dropzone, id, FileStatus::Aborted).await;

    assert!(dropzone.restart(id).await.unwrap());
    assert_eq!(dropzone.file(id).unwrap().status(), FileStatus::Uploading);
    assert_eq!(dropzone.shutdown().await.unwrap(), 1);
}

#[tokio::test]
async fn test_restart_while_uploading_ignores_old_transport() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/slow")), hooks.clone());

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::Uploading).await;

    assert!(dropzone.restart(id).await.unwrap());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // The replaced transport was terminated without reporting `aborted`
    assert_eq!(dropzone.file(id).unwrap().status(), FileStatus::Uploading);
    assert!(!hooks.statuses(id).contains(&FileStatus::Aborted));
}

#[tokio::test]
async fn test_provider_meta_is_merged() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let params = UploadParams::new(server.url("/ok"))
        .meta("bucket", json!("photos"))
        .meta("status", json!("done"));
    let dropzone = start(params, hooks.clone());

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    let record = wait_for_status(&dropzone, id, FileStatus::Done).await;

    assert_eq!(record.meta.extra.get("bucket"), Some(&json!("photos")));
    assert!(!record.meta.extra.contains_key("status"));
    // The status key did not skip any step
    assert_eq!(
        hooks.statuses(id),
        vec![
            FileStatus::Preparing,
            FileStatus::Uploading,
            FileStatus::HeadersReceived,
            FileStatus::Done
        ]
    );
}

/// Routes files by name, refusing anything that is not text
struct ByNameProvider {
    base_url: String,
}

#[async_trait::async_trait]
impl UploadParamsProvider for ByNameProvider {
    async fn get_upload_params(&self, record: &FileRecord) -> Option<UploadParams> {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        if !record.meta.name.ends_with(".txt") {
            return None;
        }
        Some(UploadParams::new(format!("{}/ok", self.base_url)).field("name", &record.meta.name))
    }
}

#[tokio::test]
async fn test_async_provider_per_file() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let provider = Arc::new(ByNameProvider {
        base_url: server.base_url.clone(),
    });
    let dropzone = start_with(provider, hooks);

    let records = dropzone
        .accept(vec![
            text_file("a.txt", "a"),
            RawFile::new("b.bin", "application/octet-stream", vec![1u8; 3]),
        ])
        .await
        .unwrap();

    wait_for_status(&dropzone, records[0].id(), FileStatus::Done).await;
    wait_for_status(&dropzone, records[1].id(), FileStatus::ErrorUploadParams).await;

    let received = server.received();
    assert_eq!(received.len(), 1);
    assert!(received[0].body_contains(b"a.txt"));
}

#[tokio::test]
async fn test_delayed_upload_starts_on_trigger() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::delaying());
    let dropzone = start(UploadParams::new(server.url("/ok")), hooks.clone());

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::Ready).await;
    assert!(server.received().is_empty());

    assert!(hooks.trigger(id).unwrap().fire());
    wait_for_status(&dropzone, id, FileStatus::Done).await;
    assert_eq!(server.received().len(), 1);
}

#[tokio::test]
async fn test_remove_during_upload() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/slow")), hooks.clone());

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::Uploading).await;

    assert!(dropzone.remove(id).await.unwrap());
    assert!(dropzone.file(id).is_none());
    assert_eq!(dropzone.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_shutdown_counts_inflight_uploads() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/slow")), hooks);

    let records = dropzone
        .accept(vec![text_file("a.txt", "a"), text_file("b.txt", "b")])
        .await
        .unwrap();
    for record in &records {
        wait_for_status(&dropzone, record.id(), FileStatus::Uploading).await;
    }

    assert_eq!(dropzone.shutdown().await.unwrap(), 2);
}

#[tokio::test]
async fn test_unparseable_file_type_still_uploads() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/ok")), hooks);

    let id = accept_one(&dropzone, RawFile::new("a.bin", "notamime", vec![1u8; 4])).await;
    wait_for_status(&dropzone, id, FileStatus::Done).await;

    let received = server.received();
    assert_eq!(received.len(), 1);
    assert!(received[0].body_contains(b"application/octet-stream"));
}

#[tokio::test]
async fn test_drop_stops_inflight_upload() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::default());
    let dropzone = start(UploadParams::new(server.url("/slow")), hooks.clone());
    let handle = dropzone.handle();

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::Uploading).await;

    drop(dropzone);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(matches!(
        handle.accept(vec![text_file("b.txt", "b")]),
        Err(DropzoneError::Closed)
    ));
    assert!(matches!(handle.cancel(id), Err(DropzoneError::Closed)));
    // The transport was terminated, not left to report an outcome
    assert_eq!(
        hooks.statuses(id),
        vec![FileStatus::Preparing, FileStatus::Uploading]
    );
}

#[tokio::test]
async fn test_trigger_after_restart_does_not_start_again() {
    let server = TestServer::start().await;
    let hooks = Arc::new(RecordingHooks::delaying());
    let dropzone = start(UploadParams::new(server.url("/slow")), hooks.clone());

    let id = accept_one(&dropzone, text_file("a.txt", "a")).await;
    wait_for_status(&dropzone, id, FileStatus::Ready).await;

    assert!(dropzone.restart(id).await.unwrap());
    let transport = dropzone.file(id).unwrap().transport_id;
    assert!(transport.is_some());

    // The start is queued but the file already left the ready gate
    assert!(hooks.trigger(id).unwrap().fire());
    assert!(!dropzone.remove(FileId(9_999)).await.unwrap());

    let record = dropzone.file(id).unwrap();
    assert_eq!(record.status(), FileStatus::Uploading);
    assert_eq!(record.transport_id, transport);
    assert_eq!(
        hooks.statuses(id),
        vec![FileStatus::Preparing, FileStatus::Ready, FileStatus::Uploading]
    );
}
