//! Sink registry
//!
//! The fan-out loop reads the current sink list lock-free through `ArcSwap`.
//! Membership changes copy the list under a mutex and publish the new one,
//! so the mutex is never held across I/O and never taken on the hot path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::handle::SinkHandle;

/// Identity of one registered sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

pub type SinkList = Arc<Vec<Arc<SinkHandle>>>;

pub struct SinkRegistry {
    sinks: ArcSwap<Vec<Arc<SinkHandle>>>,
    /// Serializes writers
    update: Mutex<()>,
    next_id: AtomicU64,
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            sinks: ArcSwap::from_pointee(Vec::new()),
            update: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> SinkId {
        SinkId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Current membership
    pub fn snapshot(&self) -> SinkList {
        self.sinks.load_full()
    }

    pub fn insert(&self, handle: Arc<SinkHandle>) {
        let _guard = self.update.lock();
        let mut next = Vec::clone(&self.sinks.load());
        next.push(handle);
        self.sinks.store(Arc::new(next));
        self.publish_gauge();
    }

    pub fn remove(&self, id: SinkId) -> Option<Arc<SinkHandle>> {
        let _guard = self.update.lock();
        let current = self.sinks.load_full();
        let position = current.iter().position(|h| h.id() == id)?;

        let mut next = Vec::clone(&current);
        let removed = next.remove(position);
        self.sinks.store(Arc::new(next));
        self.publish_gauge();
        Some(removed)
    }

    /// Empty the registry, returning every handle in registration order
    pub fn take_all(&self) -> Vec<Arc<SinkHandle>> {
        let _guard = self.update.lock();
        let taken = self.sinks.swap(Arc::new(Vec::new()));
        self.publish_gauge();
        Vec::clone(&taken)
    }

    pub fn len(&self) -> usize {
        self.sinks.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.load().is_empty()
    }

    fn publish_gauge(&self) {
        ::metrics::gauge!("dnstap_relay_sinks_registered").set(self.sinks.load().len() as f64);
    }
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("sinks", &self.len())
            .finish()
    }
}
