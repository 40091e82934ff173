use std::collections::HashMap;
use std::sync::Arc;

use fieldx::fxstruct;
use tracing::trace;

use crate::traits::ChangeObserver;
use crate::types::StoreIdentity;

/// Process-wide change notification bus.
///
/// Maps store identities to their registered observers. Constructed once at
/// process start and handed to every store as an `Arc` — explicit injected
/// state rather than a global, which keeps it swappable in tests.
///
/// [`notify`](Self::notify) wakes each observer on its own spawned task, so a
/// slow observer never stalls the store's update queue.
#[fxstruct(sync)]
pub struct ChangeNotifier {
    #[fieldx(private, lock, get, get_mut, default(HashMap::new()))]
    observers: HashMap<StoreIdentity, Vec<Arc<dyn ChangeObserver>>>,
}

impl ChangeNotifier {
    /// Registers `observer` for notifications about the store with the given
    /// identity. One observer may be registered for any number of stores.
    pub fn register(&self, identity: StoreIdentity, observer: Arc<dyn ChangeObserver>) {
        self.observers_mut().entry(identity).or_default().push(observer);
    }

    /// Drops every observer registered for the given identity.
    pub fn unregister_all(&self, identity: &StoreIdentity) {
        self.observers_mut().remove(identity);
    }

    /// Wakes all observers of the given identity. Called by a store after a
    /// successful mutation is reflected in its payload, never before.
    pub fn notify(&self, identity: &StoreIdentity) {
        let interested: Vec<Arc<dyn ChangeObserver>> = self.observers().get(identity).cloned().unwrap_or_default();
        trace!("[{identity}] notifying {} observer(s)", interested.len());
        for observer in interested {
            let identity = identity.clone();
            tokio::spawn(async move { observer.on_change(identity).await });
        }
    }
}
