use super::worker::Command;
use crate::record::FileId;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const PENDING: u8 = 0;
const STARTED: u8 = 1;

/// One-shot latch that starts a file's upload.
///
/// Clones share the latch: the first `fire` from any clone wins, every later
/// call is a no-op.
#[derive(Clone)]
pub struct UploadTrigger {
    id: FileId,
    state: Arc<AtomicU8>,
    commands: mpsc::UnboundedSender<Command>,
}

impl UploadTrigger {
    pub(super) fn new(id: FileId, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(PENDING)),
            commands,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.id
    }

    /// Queue the upload start. Returns true if this call took the latch and
    /// the start was queued; false if the trigger already fired or the
    /// manager is gone.
    ///
    /// A queued start is dropped by the manager if the file has left the
    /// ready gate by then (restarted or removed), so `true` does not mean
    /// this call started the upload.
    pub fn fire(&self) -> bool {
        if self
            .state
            .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Upload trigger for file {} already fired", self.id);
            return false;
        }

        self.commands
            .send(Command::StartUpload { id: self.id })
            .is_ok()
    }

    /// Take the latch without queueing a start. Used when the worker starts
    /// the upload itself.
    pub(super) fn claim(&self) -> bool {
        self.state
            .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == STARTED
    }
}

impl fmt::Debug for UploadTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTrigger")
            .field("id", &self.id)
            .field("fired", &self.has_fired())
            .finish()
    }
}
