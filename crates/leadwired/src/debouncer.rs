//! C9: per-(tenant, customer) alert coalescing with 30s quiescence.
use crate::error::Result;
use crate::metrics;
use crate::queue::ALERT_QUIESCENCE;
use crate::store::types::{AlertBufferRow, NewOutbound};
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;

#[derive(Default)]
pub struct AlertDebouncer;

impl AlertDebouncer {
    pub fn new() -> Self {
        Self
    }

    /// Bump the buffer for (tenant, customer_phone): append text,
    /// increment count, reset `send_at = now + 30s` (spec.md §4.9).
    pub async fn bump(
        &self,
        store: &Store,
        tenant_id: &str,
        customer_phone: &str,
        operator_phone: &str,
        text: &str,
    ) -> Result<()> {
        store
            .bump_alert_buffer(tenant_id, customer_phone, operator_phone, text, ALERT_QUIESCENCE)
            .await?;
        metrics::ALERTS_BUFFERED.inc();
        Ok(())
    }

    /// One sweep cycle (co-located in the dispatcher idle loop, spec.md
    /// §5(c)): composes and enqueues a single coalesced alert per due
    /// buffer, then deletes it. Runs inside the store's single write
    /// transaction so a concurrent bump on the same key can't interleave.
    pub async fn sweep_once(&self, store: &Arc<Store>) -> Result<usize> {
        let store = store.clone();
        let now = Utc::now();
        store
            .sweep_alert_buffers(now, move |buffer: AlertBufferRow| {
                let store = store.clone();
                async move {
                    let text = compose(&buffer);
                    let external_id = format!(
                        "alert_{}_{}",
                        buffer.tenant_id, buffer.customer_phone
                    );
                    // Idempotency key derived from the buffer identity
                    // (spec.md §4.9): if a prior sweep enqueued this
                    // alert but crashed before deleting the buffer, the
                    // retried sweep dedupes against the existing row
                    // instead of sending it twice.
                    store
                        .enqueue_outbound(&NewOutbound {
                            tenant_id: buffer.tenant_id.clone(),
                            to_number: buffer.operator_phone.clone(),
                            body: text,
                            external_id: Some(external_id),
                            scheduled_for: None,
                            bypass_quiet_hours: false,
                            bypass_opt_out: false,
                        })
                        .await?;
                    metrics::ALERTS_SWEPT.inc();
                    Ok(())
                }
            })
            .await
    }
}

fn compose(buffer: &AlertBufferRow) -> String {
    if buffer.count <= 1 {
        format!(
            "Lead Alert: {} sent a message:\n---\n{}\n---",
            buffer.customer_phone, buffer.coalesced_text
        )
    } else {
        format!(
            "Lead Alert: {} sent {} messages:\n---\n{}\n---",
            buffer.customer_phone, buffer.count, buffer.coalesced_text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singular_vs_plural_phrasing() {
        let single = AlertBufferRow {
            tenant_id: "t".into(),
            customer_phone: "+1".into(),
            operator_phone: "+2".into(),
            coalesced_text: "hi".into(),
            count: 1,
            send_at: Utc::now(),
            created_at: Utc::now(),
        };
        assert!(compose(&single).contains("sent a message"));

        let multi = AlertBufferRow { count: 3, ..single };
        assert!(compose(&multi).contains("sent 3 messages"));
    }
}
