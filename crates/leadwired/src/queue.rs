//! C8: the outbound queue and its dispatcher pool — the workhorse
//! described in spec.md §4.8. Claim predicate and backoff schedule live in
//! `Store::claim_pending`; this module owns enqueue, the per-worker
//! dispatch loop, and adaptive polling.
use crate::clock::Clock;
use crate::consent::ConsentLedger;
use crate::debouncer::AlertDebouncer;
use crate::error::Result;
use crate::gateway::{GatewayError, TelephonyGateway};
use crate::metrics;
use crate::safety::{OutboundDraft, SafetyGate};
use crate::store::types::{DispatchOutcome, EnqueueOutcome, LeadStatus, NewOutbound, OutboundRow, OutboundStatus};
use crate::store::Store;
use chrono::{DateTime, Utc};
use leadwire_lifecycle::{Activity, ShutdownSubscription};
use std::sync::Arc;
use std::time::Duration;

/// spec.md §4.8: "When attempts+1 >= MAX_RETRIES (=5), move to
/// failed_permanent."
pub const MAX_RETRIES: i64 = 5;

/// spec.md §4.9: quiescence window before a buffered alert is swept.
pub const ALERT_QUIESCENCE: Duration = Duration::from_secs(30);

/// spec.md §4.8: "stuck_timeout (default 5 min)".
pub const DEFAULT_STUCK_TIMEOUT: Duration = Duration::from_secs(300);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct OutboundQueue {
    store: Arc<Store>,
}

impl OutboundQueue {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// spec.md §4.8 enqueue contract: a duplicate `external_id` leaves
    /// the prior row unchanged and returns `Deduplicated`.
    pub async fn enqueue(&self, draft: NewOutbound) -> Result<EnqueueOutcome> {
        let outcome = self.store.enqueue_outbound(&draft).await?;
        match &outcome {
            EnqueueOutcome::Queued(id) => {
                metrics::OUTBOUND_ENQUEUED.inc();
                tracing::debug!(id, to = %draft.to_number, "enqueued outbound message");
            }
            EnqueueOutcome::Deduplicated(id) => {
                metrics::OUTBOUND_DEDUPLICATED.inc();
                tracing::debug!(id, external_id = ?draft.external_id, "deduplicated outbound enqueue");
            }
            EnqueueOutcome::Rejected { reason } => {
                tracing::debug!(reason, to = %draft.to_number, "outbound enqueue rejected");
            }
        }
        Ok(outcome)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

/// Everything one dispatcher worker needs; cheap to clone, shared across
/// the worker pool started from `main`.
#[derive(Clone)]
pub struct DispatcherContext {
    pub store: Arc<Store>,
    pub gateway: Arc<dyn TelephonyGateway>,
    pub consent: Arc<ConsentLedger>,
    pub clock: Arc<Clock>,
    pub debouncer: Arc<AlertDebouncer>,
    pub admin_number: Option<String>,
    pub claim_batch_size: i64,
    pub stuck_timeout: Duration,
    pub safe_mode: bool,
}

/// Run one dispatcher worker's loop until shutdown (spec.md §5: dispatcher
/// workers are suspension points; §4.8 step 1-5; §4.9's sweep is
/// co-located here per spec.md §5(c)).
pub async fn run_dispatcher(ctx: DispatcherContext, worker_name: &'static str) {
    let mut poll_interval = MIN_POLL_INTERVAL;
    let mut shutdown = ShutdownSubscription::get();

    loop {
        if leadwire_lifecycle::is_shutting_down() {
            return;
        }
        let activity = match Activity::get_opt(format!("dispatcher:{worker_name}")) {
            Some(a) => a,
            None => return,
        };

        let now = Utc::now();
        let claimed = match ctx
            .store
            .claim_pending(ctx.claim_batch_size, ctx.stuck_timeout, now)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(worker = worker_name, "claim failed: {err:#}");
                Vec::new()
            }
        };

        if claimed.is_empty() {
            // Also run the debounce/nudge sweep role in the idle branch
            // (spec.md §5(c): "may be co-located in each dispatcher
            // between claims").
            if let Err(err) = ctx.debouncer.sweep_once(&ctx.store).await {
                tracing::warn!(worker = worker_name, "alert sweep failed: {err:#}");
            }

            drop(activity);
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.shutting_down() => { return; }
            }
            poll_interval = (poll_interval * 2).min(MAX_POLL_INTERVAL);
            continue;
        }

        poll_interval = MIN_POLL_INTERVAL;
        metrics::OUTBOUND_CLAIMED.inc_by(claimed.len() as u64);

        for row in claimed {
            dispatch_one(&ctx, row).await;
        }

        drop(activity);
    }
}

async fn dispatch_one(ctx: &DispatcherContext, row: OutboundRow) {
    let attempts = row.attempts;

    let gate = SafetyGate {
        store: &ctx.store,
        consent: &ctx.consent,
        clock: &ctx.clock,
        admin_number: ctx.admin_number.as_deref(),
    };

    let tenant = match ctx.store.get_tenant(&row.tenant_id).await {
        Ok(Some(t)) => t,
        Ok(None) => {
            finalize(ctx, &row, DispatchOutcome::Rejected { reason: "invalid_tenant".into() }).await;
            return;
        }
        Err(err) => {
            tracing::warn!("store error re-resolving tenant: {err:#}");
            retry(ctx, &row, attempts).await;
            return;
        }
    };

    let draft = OutboundDraft {
        tenant_id: row.tenant_id.clone(),
        to: row.to_number.clone(),
        body: row.body.clone(),
        is_internal: row.to_number == tenant.operator_number,
        is_emergency_response: row.bypass_quiet_hours,
        bypass_opt_out: row.bypass_opt_out,
    };

    let authorized = match gate.authorize(draft).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(rejection)) => {
            let outcome = match rejection {
                crate::safety::SafetyRejection::OptOut => DispatchOutcome::Rejected {
                    reason: "opt_out".into(),
                },
                crate::safety::SafetyRejection::QuietHours => {
                    // spec.md §4.8's finalize/retry path re-evaluates
                    // quiet-hours on each claim; re-queuing with
                    // last_attempt_at=now naturally makes the row
                    // eligible again once the window opens.
                    retry(ctx, &row, attempts).await;
                    return;
                }
                other => DispatchOutcome::Rejected {
                    reason: other.to_string(),
                },
            };
            finalize(ctx, &row, outcome).await;
            return;
        }
        Err(err) => {
            tracing::warn!("safety gate store error: {err:#}");
            retry(ctx, &row, attempts).await;
            return;
        }
    };

    for warning in &authorized.warnings {
        tracing::warn!(id = %row.id, "{warning}");
    }

    let outcome = if ctx.safe_mode {
        tracing::info!(to = %row.to_number, body = %authorized.body, "safe-mode: not actually sending");
        DispatchOutcome::Sent {
            provider_message_id: format!("SAFE-{}", row.id),
        }
    } else {
        match tokio::time::timeout(Duration::from_secs(30), ctx.gateway.send(&row.to_number, &authorized.body)).await {
            Ok(Ok(provider_message_id)) => DispatchOutcome::Sent { provider_message_id },
            Ok(Err(GatewayError::PermanentReject(reason))) => DispatchOutcome::Permanent { reason },
            Ok(Err(GatewayError::AuthError(reason))) => DispatchOutcome::Permanent { reason },
            Ok(Err(GatewayError::NotFound(reason))) => DispatchOutcome::Permanent { reason },
            Ok(Err(GatewayError::Transient(reason))) => DispatchOutcome::Transient { reason },
            Err(_elapsed) => DispatchOutcome::Transient {
                reason: "gateway send timed out".into(),
            },
        }
    };

    finalize(ctx, &row, outcome).await;
}

async fn retry(ctx: &DispatcherContext, row: &OutboundRow, attempts: i64) {
    if let Err(err) = ctx.store.mark_outbound_retry(&row.id, attempts).await {
        tracing::error!("failed to requeue row {}: {err:#}", row.id);
    }
}

async fn finalize(ctx: &DispatcherContext, row: &OutboundRow, outcome: DispatchOutcome) {
    match outcome {
        DispatchOutcome::Sent { provider_message_id } => {
            metrics::OUTBOUND_SENT.inc();
            if let Err(err) = ctx.store.mark_outbound_sent(&row.id, &provider_message_id).await {
                tracing::error!("failed to finalize sent row {}: {err:#}", row.id);
                return;
            }
            let _ = ctx
                .store
                .append_conversation_log(&row.tenant_id, &row.to_number, "outbound", &row.body)
                .await;
            if let Ok(Some(lead)) = ctx.store.get_lead(&row.tenant_id, &row.to_number).await {
                let _ = ctx.store.set_lead_status(&lead.id, LeadStatus::Contacted, false).await;
            }
        }
        DispatchOutcome::Transient { reason } => {
            let attempts = row.attempts + 1;
            if attempts >= MAX_RETRIES {
                metrics::OUTBOUND_FAILED_PERMANENT.inc();
                tracing::error!(id = %row.id, reason, "retries exhausted, moving to failed_permanent");
                let _ = ctx
                    .store
                    .mark_outbound_terminal(&row.id, OutboundStatus::FailedPermanent)
                    .await;
            } else {
                metrics::OUTBOUND_RETRIED.inc();
                tracing::info!(id = %row.id, attempts, reason, "transient send failure, retrying");
                let _ = ctx.store.mark_outbound_retry(&row.id, attempts).await;
            }
        }
        DispatchOutcome::Permanent { reason } => {
            metrics::OUTBOUND_FAILED_PERMANENT.inc();
            tracing::error!(id = %row.id, reason, "permanent gateway rejection");
            let _ = ctx
                .store
                .mark_outbound_terminal(&row.id, OutboundStatus::FailedPermanent)
                .await;
        }
        DispatchOutcome::Rejected { reason } => {
            let status = match reason.as_str() {
                "opt_out" => OutboundStatus::FailedOptOut,
                "invalid_tenant" | "invalid_number" => OutboundStatus::FailedPermanent,
                _ => OutboundStatus::FailedSafety,
            };
            if status != OutboundStatus::FailedOptOut {
                metrics::OUTBOUND_REJECTED.inc();
            }
            let _ = ctx.store.mark_outbound_terminal(&row.id, status).await;
        }
    }
}

/// spec.md §4.8 cancellation: cancel all `{pending, processing}` rows for
/// an exact external_id (used by the nudge scheduler on reply).
pub async fn cancel(store: &Store, external_id: &str) -> Result<u64> {
    store.cancel_by_external_id(external_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway_fake::FakeGateway;
    use chrono::Utc;

    async fn seed_tenant(store: &Store) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO tenants (id, inbound_number, operator_number, display_name, timezone, \
             day_start, day_end, evening_end, emergency_mode, ai_active, average_job_value, \
             review_link, sheet_id, created_at) \
             VALUES (?, '+15005550000', '+15005550123', 'Acme', 'America/Los_Angeles', 0, 23, 24, \
             0, 1, 250.0, NULL, NULL, ?)",
        )
        .bind(&id)
        .bind(Utc::now())
        .execute(store.pool())
        .await
        .unwrap();
        id
    }

    fn ctx(store: Arc<Store>, gateway: Arc<FakeGateway>) -> DispatcherContext {
        DispatcherContext {
            store,
            gateway,
            consent: Arc::new(ConsentLedger::new()),
            clock: Arc::new(Clock::new("America/Los_Angeles")),
            debouncer: Arc::new(AlertDebouncer::new()),
            admin_number: None,
            claim_batch_size: 10,
            stuck_timeout: DEFAULT_STUCK_TIMEOUT,
            safe_mode: false,
        }
    }

    #[tokio::test]
    async fn enqueue_then_claim_then_dispatch_marks_sent() {
        let store = Arc::new(Store::connect_in_memory().await.unwrap());
        let tenant_id = seed_tenant(&store).await;
        ConsentLedger::new()
            .record_express(
                &store,
                &tenant_id,
                None,
                "+14155550111",
                crate::store::types::ConsentSource::WebForm,
            )
            .await
            .unwrap();

        let queue = OutboundQueue::new(store.clone());
        let outcome = queue
            .enqueue(NewOutbound {
                tenant_id: tenant_id.clone(),
                to_number: "+14155550111".into(),
                body: "hi there".into(),
                external_id: None,
                scheduled_for: None,
                bypass_quiet_hours: false,
                bypass_opt_out: false,
            })
            .await
            .unwrap();
        let id = match outcome {
            EnqueueOutcome::Queued(id) => id,
            other => panic!("expected queued, got {other:?}"),
        };

        let gateway = Arc::new(FakeGateway::new());
        let c = ctx(store.clone(), gateway.clone());
        let claimed = store.claim_pending(10, DEFAULT_STUCK_TIMEOUT, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        dispatch_one(&c, claimed.into_iter().next().unwrap()).await;

        assert_eq!(gateway.sent_messages().len(), 1);
        let row = store.get_outbound(&id).await.unwrap().unwrap();
        assert_eq!(row.status(), OutboundStatus::Sent);
    }

    #[tokio::test]
    async fn duplicate_external_id_is_deduplicated() {
        let store = Arc::new(Store::connect_in_memory().await.unwrap());
        let tenant_id = seed_tenant(&store).await;
        let queue = OutboundQueue::new(store.clone());

        let draft = NewOutbound {
            tenant_id: tenant_id.clone(),
            to_number: "+14155550111".into(),
            body: "hi".into(),
            external_id: Some("nudge_+14155550111".into()),
            scheduled_for: None,
            bypass_quiet_hours: false,
            bypass_opt_out: false,
        };
        let first = queue.enqueue(draft.clone()).await.unwrap();
        let second = queue.enqueue(draft).await.unwrap();
        assert!(matches!(first, EnqueueOutcome::Queued(_)));
        match (first, second) {
            (EnqueueOutcome::Queued(id1), EnqueueOutcome::Deduplicated(id2)) => assert_eq!(id1, id2),
            other => panic!("expected queued then deduplicated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn opted_out_recipient_is_rejected_with_no_pending_row() {
        let store = Arc::new(Store::connect_in_memory().await.unwrap());
        let tenant_id = seed_tenant(&store).await;
        let consent = ConsentLedger::new();
        consent
            .record_implied(
                &store,
                &tenant_id,
                None,
                "+14155550111",
                crate::store::types::ConsentSource::InboundCall,
            )
            .await
            .unwrap();
        consent.revoke(&store, "+14155550111", "stop").await.unwrap();

        let queue = OutboundQueue::new(store.clone());
        let outcome = queue
            .enqueue(NewOutbound {
                tenant_id,
                to_number: "+14155550111".into(),
                body: "hi there".into(),
                external_id: None,
                scheduled_for: None,
                bypass_quiet_hours: false,
                bypass_opt_out: false,
            })
            .await
            .unwrap();

        assert_eq!(outcome, EnqueueOutcome::Rejected { reason: "opt_out".into() });
        let pending = store.claim_pending(10, DEFAULT_STUCK_TIMEOUT, Utc::now()).await.unwrap();
        assert!(pending.is_empty());
    }
}
