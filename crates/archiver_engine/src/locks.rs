use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-bookmark async locks. Entries live as long as someone holds or waits
/// on them and are pruned on the next acquisition.
#[derive(Debug, Default)]
pub struct BookmarkLocks {
    entries: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl BookmarkLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder exists for `id`.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            entries.retain(|_, weak| weak.strong_count() > 0);
            match entries.get(id).and_then(Weak::upgrade) {
                Some(entry) => entry,
                None => {
                    let entry = Arc::new(AsyncMutex::new(()));
                    entries.insert(id.to_string(), Arc::downgrade(&entry));
                    entry
                }
            }
        };
        entry.lock_owned().await
    }

    /// Identities currently locked or awaited.
    pub fn active(&self) -> usize {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.values().filter(|weak| weak.strong_count() > 0).count()
    }
}
