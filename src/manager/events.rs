use crate::record::FileId;
use crate::status::FileStatus;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::info;

type SubscriptionId = u64;

/// Change notifications emitted by the manager. Each one is a signal to
/// refresh whatever view is bound to the file list.
#[derive(Debug, Clone, PartialEq)]
pub enum DropzoneEvent {
    StatusChanged {
        id: FileId,
        previous: Option<FileStatus>,
        status: FileStatus,
    },
    Progress {
        id: FileId,
        percent: f64,
    },
    /// Metadata changed without a status change (preview, merged fields)
    MetaChanged {
        id: FileId,
    },
    Removed {
        id: FileId,
    },
}

impl DropzoneEvent {
    pub fn file_id(&self) -> FileId {
        match self {
            DropzoneEvent::StatusChanged { id, .. } => *id,
            DropzoneEvent::Progress { id, .. } => *id,
            DropzoneEvent::MetaChanged { id } => *id,
            DropzoneEvent::Removed { id } => *id,
        }
    }
}

/// Filter criteria for event subscriptions
#[derive(Debug, Clone)]
enum SubscriptionFilter {
    All,
    File { id: FileId },
}

impl SubscriptionFilter {
    fn matches(&self, event: &DropzoneEvent) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::File { id } => event.file_id() == *id,
        }
    }
}

struct Subscription {
    filter: SubscriptionFilter,
    tx: tokio_mpsc::UnboundedSender<DropzoneEvent>,
}

type Subscriptions = Arc<Mutex<HashMap<SubscriptionId, Subscription>>>;

/// Handle for subscribing to dropzone events
#[derive(Clone)]
pub struct DropzoneEventHandle {
    subscriptions: Subscriptions,
    next_id: Arc<AtomicU64>,
}

impl DropzoneEventHandle {
    /// Create a new event handle and spawn background task to dispatch events
    pub fn new(
        mut event_rx: tokio_mpsc::UnboundedReceiver<DropzoneEvent>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let subscriptions: Subscriptions = Arc::new(Mutex::new(HashMap::new()));
        let subscriptions_clone = subscriptions.clone();

        runtime_handle.spawn(async move {
            loop {
                match event_rx.recv().await {
                    Some(event) => {
                        let mut subs = lock(&subscriptions_clone);
                        let mut to_remove = Vec::new();

                        for (id, subscription) in subs.iter() {
                            if subscription.filter.matches(&event) {
                                // If send fails, receiver was dropped - mark for removal
                                if subscription.tx.send(event.clone()).is_err() {
                                    to_remove.push(*id);
                                }
                            }
                        }

                        for id in to_remove {
                            subs.remove(&id);
                        }
                    }
                    None => {
                        info!("Dropzone event channel closed, exiting");
                        break;
                    }
                }
            }
        });

        Self {
            subscriptions,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to every event.
    /// Subscription is automatically removed when receiver is dropped
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<DropzoneEvent> {
        self.subscribe(SubscriptionFilter::All)
    }

    /// Subscribe to events for a single file
    pub fn subscribe_file(&self, id: FileId) -> tokio_mpsc::UnboundedReceiver<DropzoneEvent> {
        self.subscribe(SubscriptionFilter::File { id })
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> tokio_mpsc::UnboundedReceiver<DropzoneEvent> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        lock(&self.subscriptions).insert(id, Subscription { filter, tx });
        rx
    }
}

fn lock(
    subscriptions: &Subscriptions,
) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Subscription>> {
    subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_subscription_filters_other_files() {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let handle = DropzoneEventHandle::new(rx, tokio::runtime::Handle::current());

        let mut all = handle.subscribe_all();
        let mut only_two = handle.subscribe_file(FileId(2));

        tx.send(DropzoneEvent::MetaChanged { id: FileId(1) }).unwrap();
        tx.send(DropzoneEvent::Removed { id: FileId(2) }).unwrap();

        assert_eq!(
            all.recv().await,
            Some(DropzoneEvent::MetaChanged { id: FileId(1) })
        );
        assert_eq!(all.recv().await, Some(DropzoneEvent::Removed { id: FileId(2) }));
        assert_eq!(
            only_two.recv().await,
            Some(DropzoneEvent::Removed { id: FileId(2) })
        );
        assert!(only_two.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let handle = DropzoneEventHandle::new(rx, tokio::runtime::Handle::current());

        drop(handle.subscribe_all());
        let mut kept = handle.subscribe_all();

        tx.send(DropzoneEvent::Removed { id: FileId(1) }).unwrap();
        assert!(kept.recv().await.is_some());
        assert_eq!(lock(&handle.subscriptions).len(), 1);
    }
}
