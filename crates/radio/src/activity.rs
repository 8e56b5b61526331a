//! Activity notification on successful transfers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Sent { bytes: usize },
    Received { from: DeviceId, bytes: usize },
}

/// Invoked by the link layer after every successful send or receive.
pub trait ActivityObserver: Send {
    fn activity(&self, event: Activity);
}

impl<F> ActivityObserver for F
where
    F: Fn(Activity) + Send,
{
    fn activity(&self, event: Activity) {
        self(event)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoActivity;

impl ActivityObserver for NoActivity {
    fn activity(&self, _event: Activity) {}
}

/// Counts transfers; clones share the same counters.
#[derive(Debug, Default, Clone)]
pub struct ActivityCounter {
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

impl ActivityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl ActivityObserver for ActivityCounter {
    fn activity(&self, event: Activity) {
        match event {
            Activity::Sent { .. } => self.sent.fetch_add(1, Ordering::Relaxed),
            Activity::Received { .. } => self.received.fetch_add(1, Ordering::Relaxed),
        };
    }
}
