use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;
use uuid::Uuid;

const PREVIEW_SCHEME: &str = "preview://";

/// Registry of preview handles. A handle is a `preview://<uuid>` URL that
/// resolves to the raw bytes of a file until it is revoked.
#[derive(Clone, Default)]
pub struct PreviewStore {
    entries: Arc<Mutex<HashMap<String, Arc<[u8]>>>>,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes and return a guard that revokes the handle on drop.
    pub fn register(&self, content: Arc<[u8]>) -> PreviewGuard {
        let url = format!("{}{}", PREVIEW_SCHEME, Uuid::new_v4());
        self.lock().insert(url.clone(), content);
        trace!("Registered preview handle {}", url);

        PreviewGuard {
            store: self.clone(),
            url: Some(url),
        }
    }

    /// Look up the bytes behind a handle
    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.lock().get(url).cloned()
    }

    /// Release a handle. Returns false if it was unknown or already released.
    pub fn revoke(&self, url: &str) -> bool {
        let removed = self.lock().remove(url).is_some();
        if removed {
            trace!("Revoked preview handle {}", url);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<[u8]>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns a registered handle. Dropping the guard revokes it; `keep` hands
/// ownership of the URL to the caller instead.
pub struct PreviewGuard {
    store: PreviewStore,
    url: Option<String>,
}

impl PreviewGuard {
    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or_default()
    }

    /// Keep the handle alive past the guard. The caller must revoke it.
    pub fn keep(mut self) -> String {
        self.url.take().unwrap_or_default()
    }
}

impl Drop for PreviewGuard {
    fn drop(&mut self) {
        if let Some(url) = self.url.take() {
            self.store.revoke(&url);
        }
    }
}
