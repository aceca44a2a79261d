//! C10: the business-hours voice routing state machine. Turns a provider
//! dial-status disposition into a routing action, then carries out the
//! "missed call" branch's side effects (lead, consent, templated SMS,
//! operator alert, nudge).
use crate::clock::{Clock, DayClassification};
use crate::consent::ConsentLedger;
use crate::error::Result;
use crate::gateway::{LineType, TelephonyGateway};
use crate::jobs::{Job, JobPool};
use crate::nudge::NudgeScheduler;
use crate::queue::OutboundQueue;
use crate::store::types::{CallDisposition, ConsentSource, LeadStatus, NewOutbound, TenantRow};
use crate::store::Store;
use leadwire_template::TemplateEngine;
use serde_json::json;
use std::sync::Arc;

/// Delay before the post-missed-call nudge fires, per the literal
/// scenario walkthrough ("scheduled for now+120 s").
pub const NUDGE_DELAY_SECONDS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceAction {
    RingOperator { ring_seconds: u32 },
    PlayAfterHoursRecordVoicemail,
    PlayAfterHoursSendMissedCallSms,
    PromptPressOneForOperator,
    DialOperator,
}

/// Decide what to do with a fresh inbound call, given the tenant's
/// business-hours classification and the caller's line type.
pub fn route_inbound_call(
    classification: DayClassification,
    emergency_mode: bool,
    line_type: LineType,
    digits: Option<&str>,
) -> VoiceAction {
    match classification {
        DayClassification::Daytime | DayClassification::Evening => {
            VoiceAction::RingOperator { ring_seconds: 15 }
        }
        DayClassification::Sleep => {
            if emergency_mode {
                match digits {
                    Some("1") => VoiceAction::DialOperator,
                    _ => VoiceAction::PromptPressOneForOperator,
                }
            } else {
                match line_type {
                    LineType::Landline => VoiceAction::PlayAfterHoursRecordVoicemail,
                    LineType::Mobile | LineType::Unknown => {
                        VoiceAction::PlayAfterHoursSendMissedCallSms
                    }
                }
            }
        }
    }
}

pub struct VoiceRouter {
    store: Arc<Store>,
    gateway: Arc<dyn TelephonyGateway>,
    consent: Arc<ConsentLedger>,
    clock: Arc<Clock>,
    queue: OutboundQueue,
    templates: Arc<TemplateEngine>,
    jobs: Option<Arc<JobPool>>,
}

impl VoiceRouter {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn TelephonyGateway>,
        consent: Arc<ConsentLedger>,
        clock: Arc<Clock>,
        templates: Arc<TemplateEngine>,
        jobs: Option<Arc<JobPool>>,
    ) -> Self {
        let queue = OutboundQueue::new(store.clone());
        Self {
            store,
            gateway,
            consent,
            clock,
            queue,
            templates,
            jobs,
        }
    }

    /// Resolve the tenant for an inbound call/status leg: primary lookup
    /// by the dialed number, with the fallback the open question in
    /// spec.md §9 decided to keep (see DESIGN.md) — a dial-status leg
    /// that echoes the operator number in `To` instead of the original
    /// inbound number still resolves correctly.
    pub async fn resolve_tenant(&self, to_number: &str) -> Result<Option<TenantRow>> {
        if let Some(t) = self.store.get_tenant_by_inbound_number(to_number).await? {
            return Ok(Some(t));
        }
        self.store.get_tenant_by_operator_number(to_number).await
    }

    pub async fn classify_line(&self, number: &str) -> LineType {
        match self.gateway.lookup(number).await {
            Ok(lookup) => lookup.line_type,
            Err(err) => {
                tracing::warn!("number lookup failed, treating as unknown: {err}");
                LineType::Unknown
            }
        }
    }

    /// Carry out the missed-call branch's full side-effect list, invoked
    /// from the dial-status callback once its disposition is recognized
    /// as a miss, or directly from the after-hours-mobile voice action.
    pub async fn handle_missed_call(&self, tenant: &TenantRow, caller: &str) -> Result<()> {
        let lead = self.store.get_or_create_lead(&tenant.id, caller).await?;

        self.consent
            .record_implied(&self.store, &tenant.id, Some(&lead.id), caller, ConsentSource::InboundCall)
            .await?;

        let sms_body = self.templates.render_missed_call(&tenant.display_name)?;
        self.queue
            .enqueue(NewOutbound {
                tenant_id: tenant.id.clone(),
                to_number: caller.to_string(),
                body: sms_body,
                external_id: None,
                scheduled_for: None,
                bypass_quiet_hours: false,
                bypass_opt_out: false,
            })
            .await?;

        let alert_body = self.templates.render(
            "operator_missed_call_alert",
            json!({ "caller": caller, "detail": "enqueued an SMS follow-up." }),
        )?;
        self.queue
            .enqueue(NewOutbound {
                tenant_id: tenant.id.clone(),
                to_number: tenant.operator_number.clone(),
                body: alert_body,
                external_id: None,
                scheduled_for: None,
                bypass_quiet_hours: false,
                bypass_opt_out: false,
            })
            .await?;

        let nudge_body = self
            .templates
            .render("nudge_followup", json!({ "tenant_name": tenant.display_name }))?;
        NudgeScheduler::schedule(&self.queue, &tenant.id, caller, NUDGE_DELAY_SECONDS, nudge_body).await?;

        self.store
            .set_lead_status(&lead.id, LeadStatus::New, false)
            .await?;

        Ok(())
    }

    /// Voicemail branch: record/update the lead, enqueue an operator
    /// alert pointing at the recording, and dispatch transcription
    /// best-effort via the job pool.
    pub async fn handle_voicemail(
        &self,
        tenant: &TenantRow,
        caller: &str,
        call_id: &str,
        recording_url: &str,
    ) -> Result<()> {
        let lead = self.store.get_or_create_lead(&tenant.id, caller).await?;
        self.consent
            .record_implied(&self.store, &tenant.id, Some(&lead.id), caller, ConsentSource::InboundCall)
            .await?;

        let alert_body = self.templates.render(
            "operator_voicemail_alert",
            json!({ "caller": caller, "recording_url": recording_url }),
        )?;
        self.queue
            .enqueue(NewOutbound {
                tenant_id: tenant.id.clone(),
                to_number: tenant.operator_number.clone(),
                body: alert_body,
                external_id: None,
                scheduled_for: None,
                bypass_quiet_hours: false,
                bypass_opt_out: false,
            })
            .await?;

        if let Some(jobs) = &self.jobs {
            jobs.submit(Job::Transcribe {
                recording_url: recording_url.to_string(),
                call_id: call_id.to_string(),
                tenant_id: tenant.id.clone(),
            });
        }

        Ok(())
    }

    /// Emergency "press 1" timeout: falls through to the same branch a
    /// non-emergency-mode sleep call would take.
    pub async fn handle_emergency_timeout(&self, tenant: &TenantRow, caller: &str) -> Result<VoiceAction> {
        let line_type = self.classify_line(caller).await;
        Ok(match line_type {
            LineType::Landline => VoiceAction::PlayAfterHoursRecordVoicemail,
            LineType::Mobile | LineType::Unknown => VoiceAction::PlayAfterHoursSendMissedCallSms,
        })
    }
}

/// Translate a provider's `DialCallStatus` into whether the missed-call
/// branch should run.
pub fn is_missed_call_status(status: &str) -> bool {
    CallDisposition::from_provider_status(status)
        .map(|d| d.is_missed())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daytime_and_evening_ring_operator() {
        assert_eq!(
            route_inbound_call(DayClassification::Daytime, false, LineType::Mobile, None),
            VoiceAction::RingOperator { ring_seconds: 15 }
        );
        assert_eq!(
            route_inbound_call(DayClassification::Evening, false, LineType::Landline, None),
            VoiceAction::RingOperator { ring_seconds: 15 }
        );
    }

    #[test]
    fn sleep_landline_off_hours_records_voicemail() {
        assert_eq!(
            route_inbound_call(DayClassification::Sleep, false, LineType::Landline, None),
            VoiceAction::PlayAfterHoursRecordVoicemail
        );
    }

    #[test]
    fn sleep_mobile_off_hours_sends_sms() {
        assert_eq!(
            route_inbound_call(DayClassification::Sleep, false, LineType::Mobile, None),
            VoiceAction::PlayAfterHoursSendMissedCallSms
        );
    }

    #[test]
    fn sleep_emergency_mode_prompts_then_dials_on_digit_one() {
        assert_eq!(
            route_inbound_call(DayClassification::Sleep, true, LineType::Mobile, None),
            VoiceAction::PromptPressOneForOperator
        );
        assert_eq!(
            route_inbound_call(DayClassification::Sleep, true, LineType::Mobile, Some("1")),
            VoiceAction::DialOperator
        );
    }

    #[test]
    fn missed_call_statuses_match_spec_literal_set() {
        for s in ["busy", "no-answer", "failed", "canceled", "machine_start", "machine_end_beep"] {
            assert!(is_missed_call_status(s), "{s} should be a miss");
        }
        assert!(!is_missed_call_status("completed"));
    }
}
