//! Deferred replay queue (spec.md §7: "`TransientStoreError` during webhook
//! processing → enqueue raw event to a deferred replay queue (in-memory
//! bounded, optionally persisted); return 200.").
//!
//! Only populated when the idempotency guard itself can't reach the store
//! (`IdempotencyOutcome::Unknown`) — at that point the webhook has already
//! passed signature verification, so replay skips straight to re-running
//! the idempotency check and, on success, the same processing path a live
//! request would take. Bounded and in-memory only, per spec.md §9's
//! "global mutable caches... never the source of truth": losing this queue
//! on restart only means the provider's own retry delivers the event again.
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub enum DeferredKind {
    Voice,
    VoiceStatus,
    VoiceVoicemail,
    Sms,
    SmsStatus,
}

#[derive(Debug, Clone)]
pub struct DeferredEvent {
    pub kind: DeferredKind,
    pub form: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

pub struct DeferredReplayQueue {
    inner: Mutex<VecDeque<DeferredEvent>>,
    capacity: usize,
}

impl DeferredReplayQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity,
        }
    }

    /// Push, dropping the oldest entry if the bound is already reached —
    /// a sustained store outage should degrade to "best-effort recent
    /// history", not unbounded memory growth.
    pub fn push(&self, event: DeferredEvent) {
        let mut q = self.inner.lock();
        if q.len() >= self.capacity {
            q.pop_front();
            tracing::warn!("deferred replay queue full, dropping oldest entry");
        }
        q.push_back(event);
    }

    pub fn drain(&self) -> Vec<DeferredEvent> {
        let mut q = self.inner.lock();
        q.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_over_capacity_drops_oldest() {
        let q = DeferredReplayQueue::new(2);
        q.push(DeferredEvent { kind: DeferredKind::Sms, form: HashMap::new(), query: HashMap::new() });
        q.push(DeferredEvent { kind: DeferredKind::Voice, form: HashMap::new(), query: HashMap::new() });
        q.push(DeferredEvent { kind: DeferredKind::SmsStatus, form: HashMap::new(), query: HashMap::new() });
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0].kind, DeferredKind::Voice));
        assert!(matches!(drained[1].kind, DeferredKind::SmsStatus));
    }
}
