// # Lifecycle Worker
//
// Owns every retained file and applies all status transitions. Commands
// from the public handle, preview tasks and transports arrive on a single
// channel and are processed one at a time, so each file's transitions and
// hook calls happen in a strict order.

use super::events::DropzoneEvent;
use super::hooks::{DropzoneHooks, ReadyDecision};
use super::ids::IdGenerator;
use super::trigger::UploadTrigger;
use crate::accept::AcceptFn;
use crate::config::DropzoneConfig;
use crate::file::{RawFile, LEGACY_DRAG_PLACEHOLDER_TYPE};
use crate::preview::{MetadataExtractor, PreviewError, PreviewMetadata, PreviewStore};
use crate::record::{FileId, FileMeta, FileRecord, MetaPatch};
use crate::status::FileStatus;
use crate::transport::{TransportHandle, TransportId, TransportReporter, UploadTransport};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

type Reply<T> = Option<oneshot::Sender<T>>;

/// Requests processed by the worker
pub(crate) enum Command {
    Accept {
        files: Vec<RawFile>,
        reply: Reply<Vec<FileRecord>>,
    },
    PreviewReady {
        id: FileId,
        result: Result<PreviewMetadata, PreviewError>,
    },
    StartUpload {
        id: FileId,
    },
    Transport {
        id: FileId,
        transport_id: TransportId,
        event: TransportEvent,
    },
    Cancel {
        id: FileId,
        reply: Reply<bool>,
    },
    Remove {
        id: FileId,
        reply: Reply<bool>,
    },
    Restart {
        id: FileId,
        reply: Reply<bool>,
    },
    Submit {
        reply: Reply<usize>,
    },
    Shutdown {
        reply: Reply<usize>,
    },
}

pub(crate) enum TransportEvent {
    Status(FileStatus),
    Progress(f64),
    Meta(MetaPatch),
}

/// Forwards transport updates to the worker, tagged with the transport
/// that produced them.
struct ChannelReporter {
    id: FileId,
    transport_id: TransportId,
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelReporter {
    fn send(&self, event: TransportEvent) {
        // Worker gone means the manager shut down; nothing left to update
        let _ = self.commands.send(Command::Transport {
            id: self.id,
            transport_id: self.transport_id,
            event,
        });
    }
}

impl TransportReporter for ChannelReporter {
    fn set_status(&self, status: FileStatus) {
        self.send(TransportEvent::Status(status));
    }

    fn set_progress(&self, percent: f64) {
        self.send(TransportEvent::Progress(percent));
    }

    fn merge_meta(&self, patch: MetaPatch) {
        self.send(TransportEvent::Meta(patch));
    }
}

struct Entry {
    file: RawFile,
    meta: FileMeta,
    transport: Option<TransportHandle>,
    trigger: Option<UploadTrigger>,
}

impl Entry {
    fn snapshot(&self) -> FileRecord {
        FileRecord {
            file: self.file.clone(),
            meta: self.meta.clone(),
            transport_id: self.transport.as_ref().map(|t| t.id()),
            upload_pending: self.trigger.is_some(),
        }
    }
}

pub(crate) struct LifecycleWorker {
    config: DropzoneConfig,
    hooks: Arc<dyn DropzoneHooks>,
    accept_fn: AcceptFn,
    extractor: MetadataExtractor,
    previews: PreviewStore,
    transport: Option<UploadTransport>,
    file_ids: IdGenerator,
    transport_ids: IdGenerator,
    entries: Vec<Entry>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<DropzoneEvent>,
    published: Arc<RwLock<Vec<FileRecord>>>,
    runtime_handle: tokio::runtime::Handle,
}

impl LifecycleWorker {
    pub(crate) fn new(
        config: DropzoneConfig,
        hooks: Arc<dyn DropzoneHooks>,
        accept_fn: AcceptFn,
        previews: PreviewStore,
        transport: Option<UploadTransport>,
        commands_tx: mpsc::UnboundedSender<Command>,
        commands_rx: mpsc::UnboundedReceiver<Command>,
        events_tx: mpsc::UnboundedSender<DropzoneEvent>,
        published: Arc<RwLock<Vec<FileRecord>>>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let extractor =
            MetadataExtractor::new(config.preview_types.iter().copied(), previews.clone());

        Self {
            config,
            hooks,
            accept_fn,
            extractor,
            previews,
            transport,
            file_ids: IdGenerator::default(),
            transport_ids: IdGenerator::default(),
            entries: Vec::new(),
            commands_tx,
            commands_rx,
            events_tx,
            published,
            runtime_handle,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Dropzone worker started");

        while let Some(command) = self.commands_rx.recv().await {
            match command {
                Command::Shutdown { reply } => {
                    let aborted = self.shutdown();
                    respond(reply, aborted);
                    break;
                }
                Command::Accept { files, reply } => {
                    let records = files.into_iter().map(|f| self.accept_one(f)).collect();
                    respond(reply, records);
                }
                Command::PreviewReady { id, result } => self.on_preview_ready(id, result),
                Command::StartUpload { id } => self.start_upload(id),
                Command::Transport {
                    id,
                    transport_id,
                    event,
                } => self.on_transport_event(id, transport_id, event),
                Command::Cancel { id, reply } => {
                    let cancelled = self.cancel(id);
                    respond(reply, cancelled);
                }
                Command::Remove { id, reply } => {
                    let removed = self.remove(id);
                    respond(reply, removed);
                }
                Command::Restart { id, reply } => {
                    let restarted = self.restart(id);
                    respond(reply, restarted);
                }
                Command::Submit { reply } => {
                    let submitted = self.submit();
                    respond(reply, submitted);
                }
            }
        }

        info!("Dropzone worker stopped");
    }

    // ========== ACCEPTANCE ==========

    fn accept_one(&mut self, file: RawFile) -> FileRecord {
        let id = FileId(self.file_ids.next_id());
        let mut meta = FileMeta::from_file(id, &file);
        // Entries are only removed by queued commands, so the new entry
        // stays at this index for the rest of the call
        let idx = self.entries.len();

        if file.mime_type != LEGACY_DRAG_PLACEHOLDER_TYPE
            && !(self.accept_fn)(&file, &self.config.accept)
        {
            debug!(
                "Rejecting {} ({}): type not accepted by '{}'",
                file.name, file.mime_type, self.config.accept
            );
            meta.status = FileStatus::RejectedFileType;
            return self.notify_rejected(file, meta);
        }

        if self.entries.len() >= self.config.max_files {
            debug!(
                "Rejecting {}: already holding {} files",
                file.name,
                self.entries.len()
            );
            meta.status = FileStatus::RejectedMaxFiles;
            return self.notify_rejected(file, meta);
        }

        info!("Accepted file {} as {} ({} bytes)", id, file.name, file.size);

        meta.status = FileStatus::Preparing;
        self.entries.push(Entry {
            file: file.clone(),
            meta,
            transport: None,
            trigger: None,
        });
        self.notify(idx, None);

        if !self.config.size_allowed(file.size) {
            debug!(
                "File {} size {} outside [{}, {}]",
                id, file.size, self.config.min_size_bytes, self.config.max_size_bytes
            );
            self.transition(id, FileStatus::ErrorFileSize);
        } else {
            self.spawn_preview(id, file);
        }

        self.entries[idx].snapshot()
    }

    /// Report a rejected file. It is never retained; a returned patch only
    /// lands on the record handed back to the caller.
    fn notify_rejected(&mut self, file: RawFile, meta: FileMeta) -> FileRecord {
        let mut record = FileRecord {
            file,
            meta,
            transport_id: None,
            upload_pending: false,
        };

        if let Some(patch) = self.hooks.on_change_status(&record, None) {
            if let Err(e) = record.meta.merge_patch(&patch) {
                warn!("Status hook metadata for file {} not merged: {}", record.id(), e);
            }
        }
        self.emit(DropzoneEvent::StatusChanged {
            id: record.id(),
            previous: None,
            status: record.status(),
        });

        record
    }

    fn spawn_preview(&self, id: FileId, file: RawFile) {
        let extractor = self.extractor.clone();
        let previews = self.previews.clone();
        let commands = self.commands_tx.clone();

        self.runtime_handle.spawn(async move {
            let result = extractor.extract_async(file).await;

            if let Err(mpsc::error::SendError(command)) =
                commands.send(Command::PreviewReady { id, result })
            {
                // Manager is gone, nobody will take ownership of the handle
                if let Command::PreviewReady {
                    result: Ok(preview),
                    ..
                } = command
                {
                    if let Some(url) = preview.preview_url {
                        previews.revoke(&url);
                    }
                }
            }
        });
    }

    fn on_preview_ready(&mut self, id: FileId, result: Result<PreviewMetadata, PreviewError>) {
        let Some(idx) = self.index_of(id) else {
            debug!("File {} was removed during preview extraction", id);
            if let Ok(PreviewMetadata {
                preview_url: Some(url),
                ..
            }) = result
            {
                self.previews.revoke(&url);
            }
            return;
        };

        match result {
            Ok(preview) => preview.apply_to(&mut self.entries[idx].meta),
            Err(e) => debug!("No preview metadata for file {}: {}", id, e),
        }
        self.publish();
        self.emit(DropzoneEvent::MetaChanged { id });

        // A restart while extracting already moved the file past the gate
        if self.entries[idx].meta.status == FileStatus::Preparing {
            self.ready_gate(idx);
        }
    }

    // ========== READY GATE & UPLOAD START ==========

    fn ready_gate(&mut self, idx: usize) {
        let id = self.entries[idx].meta.id;
        let trigger = UploadTrigger::new(id, self.commands_tx.clone());
        self.entries[idx].trigger = Some(trigger.clone());

        let record = self.entries[idx].snapshot();
        match self.hooks.on_upload_ready(&record, &trigger) {
            ReadyDecision::Proceed => {
                if trigger.claim() {
                    self.start_upload(id);
                }
            }
            ReadyDecision::Delay if trigger.has_fired() => {
                debug!("Upload of file {} triggered during ready hook", id);
            }
            ReadyDecision::Delay => {
                debug!("Upload of file {} delayed until triggered", id);
                self.transition(id, FileStatus::Ready);
            }
        }
    }

    fn start_upload(&mut self, id: FileId) {
        let Some(idx) = self.index_of(id) else {
            debug!("Ignoring upload trigger for removed file {}", id);
            return;
        };

        let status = self.entries[idx].meta.status;
        if !matches!(status, FileStatus::Preparing | FileStatus::Ready) {
            debug!("Ignoring upload trigger for file {} in {}", id, status);
            return;
        }
        self.entries[idx].trigger = None;

        if self.transport.is_some() {
            self.launch_transport(idx);
            self.transition(id, FileStatus::Uploading);
        } else {
            self.entries[idx].meta.percent = 100.0;
            self.transition(id, FileStatus::Done);
        }
    }

    /// Start a fresh transport for an entry, replacing any previous one
    fn launch_transport(&mut self, idx: usize) {
        let Some(transport) = self.transport.clone() else {
            return;
        };

        let transport_id = TransportId(self.transport_ids.next_id());
        let entry = &mut self.entries[idx];
        if let Some(previous) = entry.transport.take() {
            debug!(
                "Replacing transport {} of file {} with {}",
                previous.id(),
                entry.meta.id,
                transport_id
            );
            previous.terminate();
        }
        entry.meta.percent = 0.0;

        let reporter = Arc::new(ChannelReporter {
            id: entry.meta.id,
            transport_id,
            commands: self.commands_tx.clone(),
        });
        let handle = transport.start(
            transport_id,
            entry.snapshot(),
            reporter,
            &self.runtime_handle,
        );
        entry.transport = Some(handle);
    }

    fn on_transport_event(&mut self, id: FileId, transport_id: TransportId, event: TransportEvent) {
        let Some(idx) = self.index_of(id) else {
            return;
        };
        let current = self.entries[idx].transport.as_ref().map(|t| t.id());
        if current != Some(transport_id) {
            trace!("Dropping event from superseded transport {}", transport_id);
            return;
        }

        match event {
            TransportEvent::Status(status) => {
                self.transition(id, status);
            }
            TransportEvent::Progress(percent) => {
                let meta = &mut self.entries[idx].meta;
                let percent = percent.clamp(0.0, 100.0);
                if meta.status != FileStatus::Uploading || percent <= meta.percent {
                    return;
                }
                meta.percent = percent;
                self.publish();
                self.emit(DropzoneEvent::Progress { id, percent });
            }
            TransportEvent::Meta(patch) => {
                if let Err(e) = self.entries[idx].meta.merge_patch(&patch) {
                    warn!("Upload params metadata for file {} not merged: {}", id, e);
                    return;
                }
                self.publish();
                self.emit(DropzoneEvent::MetaChanged { id });
            }
        }
    }

    // ========== USER OPERATIONS ==========

    fn cancel(&mut self, id: FileId) -> bool {
        let Some(idx) = self.index_of(id) else {
            return false;
        };
        let Some(transport) = &self.entries[idx].transport else {
            debug!("Cancel of file {} ignored: no upload started", id);
            return false;
        };

        info!("Cancelling upload of file {}", id);
        transport.abort();
        let record = self.entries[idx].snapshot();
        self.hooks.on_cancel(&record);
        true
    }

    fn remove(&mut self, id: FileId) -> bool {
        let Some(idx) = self.index_of(id) else {
            debug!("Remove of file {} ignored: not present", id);
            return false;
        };

        let record = self.entries[idx].snapshot();
        self.hooks.on_remove(&record);

        let entry = self.entries.remove(idx);
        if let Some(transport) = entry.transport {
            transport.terminate();
        }
        if let Some(url) = &entry.meta.preview_url {
            self.previews.revoke(url);
        }

        info!("Removed file {} ({})", id, entry.file.name);
        self.publish();
        self.emit(DropzoneEvent::Removed { id });
        true
    }

    fn restart(&mut self, id: FileId) -> bool {
        let Some(idx) = self.index_of(id) else {
            return false;
        };
        if self.transport.is_none() {
            warn!("Restart of file {} ignored: no upload params provider", id);
            return false;
        }

        info!("Restarting upload of file {}", id);
        self.entries[idx].trigger = None;
        self.launch_transport(idx);
        self.transition(id, FileStatus::Uploading);

        if let Some(idx) = self.index_of(id) {
            let record = self.entries[idx].snapshot();
            self.hooks.on_restart(&record);
        }
        true
    }

    fn submit(&mut self) -> usize {
        let all: Vec<FileRecord> = self.entries.iter().map(Entry::snapshot).collect();
        let uploaded: Vec<FileRecord> = all
            .iter()
            .filter(|r| r.status().is_uploaded())
            .cloned()
            .collect();

        info!("Submitting {} of {} files", uploaded.len(), all.len());
        self.hooks.on_submit(&uploaded, &all);
        uploaded.len()
    }

    /// Stop every live transport. Returns how many were still uploading.
    fn shutdown(&mut self) -> usize {
        let mut aborted = 0;
        for entry in &mut self.entries {
            if let Some(transport) = entry.transport.take() {
                if entry.meta.status.is_in_flight() && !transport.is_finished() {
                    aborted += 1;
                }
                transport.terminate();
            }
        }

        info!("Dropzone shutting down, aborted {} uploads", aborted);
        aborted
    }

    // ========== STATUS FUNNEL ==========

    /// Set a status and run the notify-then-refresh step
    fn transition(&mut self, id: FileId, status: FileStatus) -> bool {
        let Some(idx) = self.index_of(id) else {
            return false;
        };

        let meta = &mut self.entries[idx].meta;
        let previous = meta.status;
        meta.status = status;
        if matches!(status, FileStatus::Done | FileStatus::HeadersReceived) {
            meta.percent = 100.0;
        }

        debug!("File {}: {} -> {}", id, previous, status);
        self.notify(idx, Some(previous));
        true
    }

    fn notify(&mut self, idx: usize, previous: Option<FileStatus>) {
        let record = self.entries[idx].snapshot();

        if let Some(patch) = self.hooks.on_change_status(&record, previous) {
            if let Err(e) = self.entries[idx].meta.merge_patch(&patch) {
                warn!("Status hook metadata for file {} not merged: {}", record.id(), e);
            }
        }

        self.publish();
        self.emit(DropzoneEvent::StatusChanged {
            id: record.id(),
            previous,
            status: record.status(),
        });
    }

    fn publish(&self) {
        let snapshot = self.entries.iter().map(Entry::snapshot).collect();
        *self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn emit(&self, event: DropzoneEvent) {
        let _ = self.events_tx.send(event);
    }

    fn index_of(&self, id: FileId) -> Option<usize> {
        self.entries.iter().position(|e| e.meta.id == id)
    }
}

fn respond<T>(reply: Reply<T>, value: T) {
    if let Some(reply) = reply {
        let _ = reply.send(value);
    }
}
