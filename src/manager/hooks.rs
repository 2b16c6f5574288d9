use super::trigger::UploadTrigger;
use crate::record::{FileRecord, MetaPatch};
use crate::status::FileStatus;

/// Answer from `on_upload_ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyDecision {
    /// Start the upload now
    #[default]
    Proceed,
    /// Hold the file at `ready` until the trigger is fired
    Delay,
}

/// Callbacks invoked by the manager. All have no-op defaults.
///
/// Hooks run on the manager's worker and must not block. To act on the
/// manager from inside a hook, use a [`super::DropzoneHandle`]; its
/// operations are queued behind the current one.
pub trait DropzoneHooks: Send + Sync {
    /// Called on every status transition, including rejections. `previous`
    /// is `None` for a file seen for the first time. Returned fields are
    /// merged onto the record; a `status` key is ignored.
    fn on_change_status(
        &self,
        _record: &FileRecord,
        _previous: Option<FileStatus>,
    ) -> Option<MetaPatch> {
        None
    }

    /// Called once per file after preview extraction. The trigger may be
    /// kept and fired later if the upload is delayed.
    fn on_upload_ready(&self, _record: &FileRecord, _trigger: &UploadTrigger) -> ReadyDecision {
        ReadyDecision::Proceed
    }

    fn on_cancel(&self, _record: &FileRecord) {}

    fn on_remove(&self, _record: &FileRecord) {}

    fn on_restart(&self, _record: &FileRecord) {}

    /// Called by `submit` with the successfully uploaded files and all files
    fn on_submit(&self, _uploaded: &[FileRecord], _all: &[FileRecord]) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl DropzoneHooks for NoopHooks {}
