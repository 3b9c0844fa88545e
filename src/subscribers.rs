use crate::models::PlaylistEntry;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

pub type Callback = Arc<dyn Fn(&[PlaylistEntry]) + Send + Sync>;

/// Registered change listeners, in registration order.
#[derive(Default)]
pub struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

impl Subscribers {
    pub fn add(&mut self, cb: Callback) -> u64 {
        self.next_id += 1;
        self.entries.push((self.next_id, cb));
        self.next_id
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(sid, _)| *sid != id);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clone the callbacks so they can be invoked without holding the owner's lock.
    pub fn callbacks(&self) -> Vec<Callback> {
        self.entries.iter().map(|(_, cb)| cb.clone()).collect()
    }
}

/// Invoke every callback with `entries`. A panicking callback is logged and
/// skipped; the remaining callbacks still run.
pub fn fan_out(callbacks: &[Callback], entries: &[PlaylistEntry]) {
    for cb in callbacks {
        if catch_unwind(AssertUnwindSafe(|| cb(entries))).is_err() {
            error!("playlist subscriber panicked; continuing with remaining subscribers");
        }
    }
}
