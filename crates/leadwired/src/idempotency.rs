//! C4: deduplicates provider-supplied event IDs.
//!
//! Primary source of truth is the `webhook_events` unique index; an
//! in-memory `lru_cache::LruCache` (matching the teacher's workspace
//! dependency on `lru-cache`) backs the store-unavailable fallback per
//! spec.md §4.4/§9: "global mutable caches... consulted before the store
//! but never used as source of truth for consequential writes."
use crate::error::LeadwireError;
use crate::store::Store;
use lru_cache::LruCache;
use parking_lot::Mutex;
use uuid::Uuid;

const FALLBACK_CACHE_SIZE: usize = 4096;

pub enum IdempotencyOutcome {
    /// First time this provider_id has been seen; processing should
    /// continue. Carries the freshly minted internal id.
    Fresh(String),
    /// Already processed; carries the internal id recorded the first
    /// time.
    Duplicate(String),
    /// The store is unavailable. Per spec.md §4.4 the caller's policy is
    /// to respond success to the provider and defer processing rather
    /// than risk a retry storm; the raw event is *not* deduplicated in
    /// this case, only remembered in the fallback cache so a near-term
    /// retry before the store recovers doesn't get re-deferred twice.
    Unknown,
}

pub struct IdempotencyGuard {
    fallback: Mutex<LruCache<String, String>>,
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self {
            fallback: Mutex::new(LruCache::new(FALLBACK_CACHE_SIZE)),
        }
    }
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `key` is the provider_id for top-level events, or
    /// `provider_id + "_status_" + dial_status` for dial-status callbacks
    /// that share a provider_id with their parent call (spec.md §4.4).
    pub async fn check_and_record(
        &self,
        store: &Store,
        key: &str,
        kind: &str,
        tenant_id: Option<&str>,
    ) -> IdempotencyOutcome {
        if let Some(internal_id) = self.fallback.lock().get_mut(key).cloned() {
            // Seen recently while the store was unavailable; without a
            // fresh store round-trip we can't tell fresh from duplicate,
            // so err towards not reprocessing a flood of immediate
            // provider retries.
            return IdempotencyOutcome::Duplicate(internal_id);
        }

        let internal_id = Uuid::new_v4().to_string();
        match store
            .try_insert_webhook_event(key, kind, tenant_id, &internal_id)
            .await
        {
            Ok(true) => IdempotencyOutcome::Fresh(internal_id),
            Ok(false) => match store.get_webhook_internal_id(key).await {
                Ok(Some(existing)) => IdempotencyOutcome::Duplicate(existing),
                _ => IdempotencyOutcome::Duplicate(internal_id),
            },
            Err(LeadwireError::TransientStore(_)) | Err(LeadwireError::PermanentStore(_)) => {
                self.fallback.lock().insert(key.to_string(), internal_id);
                IdempotencyOutcome::Unknown
            }
            Err(_) => IdempotencyOutcome::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn first_delivery_is_fresh_second_is_duplicate() {
        let store = Store::connect_in_memory().await.unwrap();
        let guard = IdempotencyGuard::new();

        let first = guard.check_and_record(&store, "CA1", "voice", None).await;
        assert!(matches!(first, IdempotencyOutcome::Fresh(_)));

        let second = guard.check_and_record(&store, "CA1", "voice", None).await;
        assert!(matches!(second, IdempotencyOutcome::Duplicate(_)));
    }

    #[tokio::test]
    async fn status_sub_events_are_independent_keys() {
        let store = Store::connect_in_memory().await.unwrap();
        let guard = IdempotencyGuard::new();

        let call = guard.check_and_record(&store, "CA1", "voice", None).await;
        assert!(matches!(call, IdempotencyOutcome::Fresh(_)));

        let status = guard
            .check_and_record(&store, "CA1_status_no-answer", "voice_status", None)
            .await;
        assert!(matches!(status, IdempotencyOutcome::Fresh(_)));
    }
}
