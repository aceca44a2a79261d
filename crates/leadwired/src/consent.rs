//! C6: the append-only consent ledger.
use crate::error::Result;
use crate::store::types::{ConsentKind, ConsentSource};
use crate::store::Store;
use dashmap::DashMap;

/// Process-scoped opt-out cache (spec.md §9: "global mutable caches...
/// rebuilt lazily, consulted before the store but never used as source
/// of truth for consequential writes"). Keyed by phone; `true` means
/// known-opted-out. Absence does not mean opted-in — the store is always
/// re-checked before a consequential write (spec.md §5: "must re-check
/// before consequential writes").
#[derive(Default)]
pub struct ConsentLedger {
    opt_out_cache: DashMap<String, bool>,
}

impl ConsentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_implied(
        &self,
        store: &Store,
        tenant_id: &str,
        lead_id: Option<&str>,
        phone: &str,
        source: ConsentSource,
    ) -> Result<String> {
        self.opt_out_cache.insert(phone.to_string(), false);
        store
            .record_consent(tenant_id, lead_id, phone, ConsentKind::Implied, source, None)
            .await
    }

    pub async fn record_express(
        &self,
        store: &Store,
        tenant_id: &str,
        lead_id: Option<&str>,
        phone: &str,
        source: ConsentSource,
    ) -> Result<String> {
        self.opt_out_cache.insert(phone.to_string(), false);
        store
            .record_consent(tenant_id, lead_id, phone, ConsentKind::Express, source, None)
            .await
    }

    /// Global, cross-tenant revocation (spec.md §4.6).
    pub async fn revoke(&self, store: &Store, phone: &str, reason: &str) -> Result<u64> {
        self.opt_out_cache.insert(phone.to_string(), true);
        store.revoke_consent(phone, reason).await
    }

    /// `is_valid(phone)` per spec.md §3/§4.6. Always re-checks the store;
    /// the cache only short-circuits the common "known opted-out" case so
    /// a hot STOP-spam caller doesn't hammer the store with repeated
    /// identical lookups (still re-verified at the point of consequential
    /// writes downstream, per spec.md §5).
    pub async fn is_valid(&self, store: &Store, phone: &str) -> Result<bool> {
        if self.opt_out_cache.get(phone).map(|v| *v).unwrap_or(false) {
            return Ok(false);
        }
        let valid = store.is_consent_valid(phone).await?;
        if !valid {
            self.opt_out_cache.insert(phone.to_string(), true);
        }
        Ok(valid)
    }

    /// Explicit opt-out check, distinct from `is_valid`: a phone with no
    /// consent history at all is merely unconsented, not opted-out. Used
    /// for internal (operator/admin) recipients, which never generate an
    /// inbound event and so never accrue a consent record of their own
    /// (spec.md §4.7).
    pub async fn has_opted_out(&self, store: &Store, phone: &str) -> Result<bool> {
        if self.opt_out_cache.get(phone).map(|v| *v).unwrap_or(false) {
            return Ok(true);
        }
        let opted_out = store.has_opted_out(phone).await?;
        if opted_out {
            self.opt_out_cache.insert(phone.to_string(), true);
        }
        Ok(opted_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::ConsentSource;

    #[tokio::test]
    async fn revoke_makes_all_tenants_invalid() {
        let store = Store::connect_in_memory().await.unwrap();
        let ledger = ConsentLedger::new();

        ledger
            .record_implied(&store, "tenant-a", None, "+15551234567", ConsentSource::InboundCall)
            .await
            .unwrap();
        assert!(ledger.is_valid(&store, "+15551234567").await.unwrap());

        ledger.revoke(&store, "+15551234567", "stop").await.unwrap();
        assert!(!ledger.is_valid(&store, "+15551234567").await.unwrap());
    }

    #[tokio::test]
    async fn express_consent_has_no_expiry() {
        let store = Store::connect_in_memory().await.unwrap();
        let ledger = ConsentLedger::new();
        ledger
            .record_express(&store, "tenant-a", None, "+15557654321", ConsentSource::WebForm)
            .await
            .unwrap();
        assert!(ledger.is_valid(&store, "+15557654321").await.unwrap());
    }

    #[tokio::test]
    async fn never_contacted_number_is_unconsented_but_not_opted_out() {
        let store = Store::connect_in_memory().await.unwrap();
        let ledger = ConsentLedger::new();

        assert!(!ledger.is_valid(&store, "+15005550123").await.unwrap());
        assert!(!ledger.has_opted_out(&store, "+15005550123").await.unwrap());
    }

    #[tokio::test]
    async fn revoke_is_reflected_in_has_opted_out() {
        let store = Store::connect_in_memory().await.unwrap();
        let ledger = ConsentLedger::new();

        ledger
            .record_implied(&store, "tenant-a", None, "+15551234567", ConsentSource::InboundCall)
            .await
            .unwrap();
        assert!(!ledger.has_opted_out(&store, "+15551234567").await.unwrap());

        ledger.revoke(&store, "+15551234567", "stop").await.unwrap();
        assert!(ledger.has_opted_out(&store, "+15551234567").await.unwrap());
    }
}
