// # Manager Module
//
// Public face of the file lifecycle:
//
// - **Dropzone**: owns the worker, exposes accept/cancel/remove/restart/submit
// - **DropzoneHandle**: cloneable fire-and-forget access, safe to use in hooks
// - **DropzoneBuilder**: wires config, hooks and the upload provider together
//
// All state lives in one worker task. Public calls queue a command and,
// where they return a value, wait for the worker's reply.

mod events;
mod hooks;
mod ids;
mod trigger;
mod worker;

pub use events::{DropzoneEvent, DropzoneEventHandle};
pub use hooks::{DropzoneHooks, NoopHooks, ReadyDecision};
pub use trigger::UploadTrigger;

use crate::accept::{default_accept_fn, AcceptFn};
use crate::config::{ConfigError, DropzoneConfig};
use crate::file::RawFile;
use crate::preview::PreviewStore;
use crate::record::{FileId, FileRecord};
use crate::transport::{UploadParamsProvider, UploadTransport};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use worker::{Command, LifecycleWorker};

#[derive(Debug, Error)]
pub enum DropzoneError {
    #[error("Dropzone worker has shut down")]
    Closed,
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Assembles a [`Dropzone`]
pub struct DropzoneBuilder {
    config: DropzoneConfig,
    hooks: Arc<dyn DropzoneHooks>,
    upload_params: Option<Arc<dyn UploadParamsProvider>>,
    http_client: Option<reqwest::Client>,
    accept_fn: AcceptFn,
}

impl Default for DropzoneBuilder {
    fn default() -> Self {
        Self::new(DropzoneConfig::default())
    }
}

impl DropzoneBuilder {
    pub fn new(config: DropzoneConfig) -> Self {
        Self {
            config,
            hooks: Arc::new(NoopHooks),
            upload_params: None,
            http_client: None,
            accept_fn: default_accept_fn(),
        }
    }

    pub fn hooks(mut self, hooks: Arc<dyn DropzoneHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Without a provider, files go straight to `done` after the ready gate
    pub fn upload_params(mut self, provider: Arc<dyn UploadParamsProvider>) -> Self {
        self.upload_params = Some(provider);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Replace the predicate that matches files against the `accept` pattern
    pub fn accept_fn(mut self, accept_fn: AcceptFn) -> Self {
        self.accept_fn = accept_fn;
        self
    }

    /// Validate the config and spawn the worker on the given runtime
    pub fn start(self, runtime_handle: tokio::runtime::Handle) -> Result<Dropzone, DropzoneError> {
        self.config.validate()?;

        let transport = self.upload_params.map(|provider| match self.http_client {
            Some(client) => UploadTransport::with_client(client, provider),
            None => UploadTransport::new(provider),
        });

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let events = DropzoneEventHandle::new(events_rx, runtime_handle.clone());
        let published = Arc::new(RwLock::new(Vec::new()));
        let previews = PreviewStore::new();

        let worker = LifecycleWorker::new(
            self.config.clone(),
            self.hooks,
            self.accept_fn,
            previews.clone(),
            transport,
            commands_tx.clone(),
            commands_rx,
            events_tx,
            published.clone(),
            runtime_handle.clone(),
        );
        runtime_handle.spawn(worker.run());

        Ok(Dropzone {
            handle: DropzoneHandle {
                commands: commands_tx,
                published,
            },
            events,
            previews,
            config: self.config,
        })
    }
}

/// Cloneable access to a running dropzone. Operations are queued and
/// return immediately, so a handle may be used from inside hooks.
#[derive(Clone)]
pub struct DropzoneHandle {
    commands: mpsc::UnboundedSender<Command>,
    published: Arc<RwLock<Vec<FileRecord>>>,
}

impl DropzoneHandle {
    pub fn accept(&self, files: Vec<RawFile>) -> Result<(), DropzoneError> {
        self.send(Command::Accept { files, reply: None })
    }

    pub fn cancel(&self, id: FileId) -> Result<(), DropzoneError> {
        self.send(Command::Cancel { id, reply: None })
    }

    pub fn remove(&self, id: FileId) -> Result<(), DropzoneError> {
        self.send(Command::Remove { id, reply: None })
    }

    pub fn restart(&self, id: FileId) -> Result<(), DropzoneError> {
        self.send(Command::Restart { id, reply: None })
    }

    pub fn submit(&self) -> Result<(), DropzoneError> {
        self.send(Command::Submit { reply: None })
    }

    /// Retained files in acceptance order, as of the last completed change
    pub fn files(&self) -> Vec<FileRecord> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn file(&self, id: FileId) -> Option<FileRecord> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn send(&self, command: Command) -> Result<(), DropzoneError> {
        self.commands.send(command).map_err(|_| DropzoneError::Closed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Option<oneshot::Sender<T>>) -> Command,
    ) -> Result<T, DropzoneError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(Some(tx)))?;
        rx.await.map_err(|_| DropzoneError::Closed)
    }
}

/// A running file lifecycle manager. Dropping it stops the worker and
/// terminates every in-flight upload.
pub struct Dropzone {
    handle: DropzoneHandle,
    events: DropzoneEventHandle,
    previews: PreviewStore,
    config: DropzoneConfig,
}

impl Dropzone {
    pub fn builder(config: DropzoneConfig) -> DropzoneBuilder {
        DropzoneBuilder::new(config)
    }

    /// Run each file through the acceptance checks. Returns the records as
    /// they stand once the checks are done, rejected files included.
    /// Preview extraction and upload continue in the background.
    pub async fn accept(&self, files: Vec<RawFile>) -> Result<Vec<FileRecord>, DropzoneError> {
        self.handle
            .request(|reply| Command::Accept { files, reply })
            .await
    }

    /// Abort a file's upload. Returns false if it has no transport; the
    /// `aborted` status follows once the transport stops.
    pub async fn cancel(&self, id: FileId) -> Result<bool, DropzoneError> {
        self.handle.request(|reply| Command::Cancel { id, reply }).await
    }

    /// Drop a file from the collection. Returns false if it was not present.
    pub async fn remove(&self, id: FileId) -> Result<bool, DropzoneError> {
        self.handle.request(|reply| Command::Remove { id, reply }).await
    }

    /// Upload a file again with a fresh transport. The file is `uploading`
    /// when this returns true.
    pub async fn restart(&self, id: FileId) -> Result<bool, DropzoneError> {
        self.handle
            .request(|reply| Command::Restart { id, reply })
            .await
    }

    /// Hand uploaded files to `on_submit`. Returns how many were uploaded.
    pub async fn submit(&self) -> Result<usize, DropzoneError> {
        self.handle.request(|reply| Command::Submit { reply }).await
    }

    /// Stop the worker and every transport. Returns how many uploads were
    /// still in flight.
    pub async fn shutdown(self) -> Result<usize, DropzoneError> {
        self.handle
            .request(|reply| Command::Shutdown { reply })
            .await
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.handle.files()
    }

    pub fn file(&self, id: FileId) -> Option<FileRecord> {
        self.handle.file(id)
    }

    pub fn len(&self) -> usize {
        self.handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }

    pub fn handle(&self) -> DropzoneHandle {
        self.handle.clone()
    }

    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<DropzoneEvent> {
        self.events.subscribe_all()
    }

    pub fn subscribe_file(&self, id: FileId) -> mpsc::UnboundedReceiver<DropzoneEvent> {
        self.events.subscribe_file(id)
    }

    /// Bytes behind a `preview_url`
    pub fn preview(&self, url: &str) -> Option<Arc<[u8]>> {
        self.previews.resolve(url)
    }

    /// Release a `preview_url` once it is no longer displayed
    pub fn release_preview(&self, url: &str) -> bool {
        self.previews.revoke(url)
    }

    pub fn config(&self) -> &DropzoneConfig {
        &self.config
    }
}

impl Drop for Dropzone {
    fn drop(&mut self) {
        // Fails harmlessly after an explicit shutdown
        if self.handle.send(Command::Shutdown { reply: None }).is_ok() {
            debug!("Dropzone dropped, stopping worker");
        }
    }
}
