//! C12: delayed follow-up ("nudge") scheduling and cancellation.
use crate::error::Result;
use crate::queue::OutboundQueue;
use crate::store::types::{EnqueueOutcome, NewOutbound};
use chrono::{Duration as ChronoDuration, Utc};

/// `external_id = "nudge_<caller>"` (spec.md §4.12, literal in the
/// scenario walkthrough of §8).
pub fn external_id_for(caller: &str) -> String {
    format!("nudge_{caller}")
}

pub struct NudgeScheduler;

impl NudgeScheduler {
    pub async fn schedule(
        queue: &OutboundQueue,
        tenant_id: &str,
        caller: &str,
        delay_seconds: i64,
        body: String,
    ) -> Result<EnqueueOutcome> {
        queue
            .enqueue(NewOutbound {
                tenant_id: tenant_id.to_string(),
                to_number: caller.to_string(),
                body,
                external_id: Some(external_id_for(caller)),
                scheduled_for: Some(Utc::now() + ChronoDuration::seconds(delay_seconds)),
                bypass_quiet_hours: false,
                bypass_opt_out: false,
            })
            .await
    }

    /// Cancel any outstanding nudge for `caller` (spec.md §4.12: called
    /// from C11 on any inbound non-STOP reply).
    pub async fn cancel(store: &crate::store::Store, caller: &str) -> Result<u64> {
        store.cancel_by_external_id(&external_id_for(caller)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_matches_spec_literal() {
        assert_eq!(external_id_for("+14155550111"), "nudge_+14155550111");
    }
}
