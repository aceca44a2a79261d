//! C11: inbound SMS classification and response. Priority order is
//! significant — each branch short-circuits except where explicitly
//! noted, and every branch below the status-echo/auto-reply guards
//! shares the same "processed a reply" tail (implied consent, log,
//! lead replied, cancel nudge).
use crate::consent::ConsentLedger;
use crate::debouncer::AlertDebouncer;
use crate::error::Result;
use crate::nudge::NudgeScheduler;
use crate::queue::OutboundQueue;
use crate::store::types::{ConsentSource, Intent, LeadStatus, NewOutbound};
use crate::store::Store;
use leadwire_template::TemplateEngine;
use serde_json::json;
use std::sync::Arc;

const STOP_WORDS: &[&str] = &[
    "stop",
    "unsubscribe",
    "cancel",
    "end",
    "quit",
    "opt out",
    "opt-out",
    "arret",
    "arrêt",
    "arreter",
];

const AUTO_REPLY_MARKERS: &[&str] = &[
    "out of office",
    "auto-reply",
    "autoreply",
    "i'm driving",
    "im driving",
    "currently driving",
];

const HELP_WORDS: &[&str] = &["help", "info", "aide"];
const START_WORDS: &[&str] = &["start", "unstop"];

const POSITIVE_WORDS: &[&str] = &["good", "great", "awesome", "excellent", "yes"];
const NEGATIVE_WORDS: &[&str] = &["bad", "poor", "terrible", "horrible", "no", "worst"];

const EMERGENCY_KEYWORDS: &[(&str, u32)] = &[
    ("emergency", 10),
    ("urgent", 8),
    ("asap", 6),
    ("flood", 9),
    ("flooding", 9),
    ("leak", 5),
    ("fire", 9),
    ("gas smell", 10),
    ("no power", 5),
    ("no heat", 5),
    ("sparking", 8),
];
const NOT_URGENT_PHRASES: &[&str] = &["not urgent", "no rush", "whenever is fine"];
const EMERGENCY_THRESHOLD: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    StatusEcho,
    Stop,
    AutoReply,
    Help,
    StartOrUnstop,
    AiPaused,
    PositiveReview,
    NegativeReview,
    Emergency,
    Standard,
}

/// Pure classifier over the normalized, lower-cased body — kept separate
/// from side effects so the priority order is independently testable.
pub fn classify(body: &str, sms_status: Option<&str>, ai_active: bool) -> Classification {
    if sms_status.map(|s| !s.trim().is_empty()).unwrap_or(false) {
        return Classification::StatusEcho;
    }

    let lower = body.trim().to_ascii_lowercase();

    if matches_word(&lower, STOP_WORDS) {
        return Classification::Stop;
    }
    if AUTO_REPLY_MARKERS.iter().any(|m| lower.contains(m)) {
        return Classification::AutoReply;
    }
    if matches_word(&lower, HELP_WORDS) {
        return Classification::Help;
    }
    if matches_word(&lower, START_WORDS) {
        return Classification::StartOrUnstop;
    }
    if !ai_active {
        return Classification::AiPaused;
    }
    if matches_word(&lower, POSITIVE_WORDS) {
        return Classification::PositiveReview;
    }
    if matches_word(&lower, NEGATIVE_WORDS) {
        return Classification::NegativeReview;
    }

    if urgency_score(&lower) >= EMERGENCY_THRESHOLD {
        Classification::Emergency
    } else {
        Classification::Standard
    }
}

fn matches_word(lower: &str, words: &[&str]) -> bool {
    words.iter().any(|w| {
        if w.contains(' ') || w.contains('-') {
            lower.contains(w)
        } else {
            lower.split(|c: char| !c.is_alphanumeric()).any(|tok| tok == *w)
        }
    })
}

/// Weighted keyword scoring with an explicit "not urgent" override that
/// downgrades an otherwise-emergency message back to standard.
fn urgency_score(lower: &str) -> u32 {
    if NOT_URGENT_PHRASES.iter().any(|p| lower.contains(p)) {
        return 0;
    }
    EMERGENCY_KEYWORDS
        .iter()
        .filter(|(kw, _)| lower.contains(kw))
        .map(|(_, weight)| weight)
        .sum()
}

pub struct SmsRouter {
    store: Arc<Store>,
    consent: Arc<ConsentLedger>,
    queue: OutboundQueue,
    debouncer: Arc<AlertDebouncer>,
    templates: Arc<TemplateEngine>,
}

pub struct SmsOutcome {
    pub classification: Classification,
    pub reply_to_customer: Option<String>,
}

impl SmsRouter {
    pub fn new(
        store: Arc<Store>,
        consent: Arc<ConsentLedger>,
        debouncer: Arc<AlertDebouncer>,
        templates: Arc<TemplateEngine>,
    ) -> Self {
        let queue = OutboundQueue::new(store.clone());
        Self {
            store,
            consent,
            queue,
            debouncer,
            templates,
        }
    }

    pub async fn handle(
        &self,
        tenant_id: &str,
        tenant_display_name: &str,
        operator_number: &str,
        from: &str,
        body: &str,
        sms_status: Option<&str>,
        review_link: Option<&str>,
        ai_active: bool,
    ) -> Result<SmsOutcome> {
        let classification = classify(body, sms_status, ai_active);

        if matches!(classification, Classification::StatusEcho) {
            return Ok(SmsOutcome {
                classification,
                reply_to_customer: None,
            });
        }

        if matches!(classification, Classification::Stop) {
            self.consent.revoke(&self.store, from, "inbound STOP").await?;
            self.store.set_lead_opt_out(tenant_id, from, true).await?;
            self.store
                .append_conversation_log(tenant_id, from, "inbound", body)
                .await?;
            let confirmation = self
                .templates
                .render("stop_confirmation", json!({ "tenant_name": tenant_display_name }))?;
            self.queue
                .enqueue(NewOutbound {
                    tenant_id: tenant_id.to_string(),
                    to_number: from.to_string(),
                    body: confirmation.clone(),
                    external_id: None,
                    scheduled_for: None,
                    bypass_quiet_hours: false,
                    // spec.md §8 scenario 4: the STOP confirmation is the
                    // one reply that must still go out to a number that
                    // was just opted out.
                    bypass_opt_out: true,
                })
                .await?;
            return Ok(SmsOutcome {
                classification,
                reply_to_customer: Some(confirmation),
            });
        }

        if matches!(classification, Classification::AutoReply) {
            self.store
                .append_conversation_log(tenant_id, from, "inbound", body)
                .await?;
            return Ok(SmsOutcome {
                classification,
                reply_to_customer: None,
            });
        }

        // Every remaining branch shares the "processed a reply" tail.
        let lead = self.store.get_or_create_lead(tenant_id, from).await?;
        self.consent
            .record_implied(&self.store, tenant_id, Some(&lead.id), from, ConsentSource::InboundSms)
            .await?;
        self.store
            .append_conversation_log(tenant_id, from, "inbound", body)
            .await?;
        self.store
            .set_lead_status(&lead.id, LeadStatus::Replied, false)
            .await?;
        NudgeScheduler::cancel(&self.store, from).await?;

        let reply = match classification {
            Classification::Help => {
                let text = self
                    .templates
                    .render("help_response", json!({ "tenant_name": tenant_display_name }))?;
                self.send_to_customer(tenant_id, from, &text, false).await?;
                Some(text)
            }
            Classification::StartOrUnstop => {
                self.consent
                    .record_express(&self.store, tenant_id, Some(&lead.id), from, ConsentSource::InboundSms)
                    .await?;
                self.store.set_lead_opt_out(tenant_id, from, false).await?;
                let text = self
                    .templates
                    .render("start_confirmation", json!({ "tenant_name": tenant_display_name }))?;
                self.send_to_customer(tenant_id, from, &text, false).await?;
                Some(text)
            }
            Classification::AiPaused => {
                self.bump_operator_alert(tenant_id, operator_number, from, body).await?;
                None
            }
            Classification::PositiveReview => {
                let text = self.templates.render(
                    "review_positive",
                    json!({ "tenant_name": tenant_display_name, "review_link": review_link.unwrap_or("") }),
                )?;
                self.send_to_customer(tenant_id, from, &text, false).await?;
                self.bump_operator_alert(tenant_id, operator_number, from, "Positive review feedback received.")
                    .await?;
                Some(text)
            }
            Classification::NegativeReview => {
                let text = self
                    .templates
                    .render("review_negative_apology", json!({ "tenant_name": tenant_display_name }))?;
                self.send_to_customer(tenant_id, from, &text, false).await?;
                self.send_urgent_operator_alert(tenant_id, operator_number, from, body).await?;
                Some(text)
            }
            Classification::Emergency => {
                self.store.set_lead_intent(&lead.id, Intent::Emergency).await?;
                let text = self
                    .templates
                    .render("emergency_ack", json!({ "tenant_name": tenant_display_name }))?;
                self.send_to_customer(tenant_id, from, &text, true).await?;
                self.send_urgent_operator_alert(tenant_id, operator_number, from, body).await?;
                Some(text)
            }
            Classification::Standard => {
                let text = self
                    .templates
                    .render("standard_ack", json!({ "tenant_name": tenant_display_name }))?;
                self.send_to_customer(tenant_id, from, &text, false).await?;
                self.bump_operator_alert(tenant_id, operator_number, from, body).await?;
                Some(text)
            }
            Classification::StatusEcho | Classification::Stop | Classification::AutoReply => unreachable!(),
        };

        Ok(SmsOutcome {
            classification,
            reply_to_customer: reply,
        })
    }

    async fn send_to_customer(
        &self,
        tenant_id: &str,
        to: &str,
        body: &str,
        bypass_quiet_hours: bool,
    ) -> Result<()> {
        self.queue
            .enqueue(NewOutbound {
                tenant_id: tenant_id.to_string(),
                to_number: to.to_string(),
                body: body.to_string(),
                external_id: None,
                scheduled_for: None,
                bypass_quiet_hours,
                bypass_opt_out: false,
            })
            .await?;
        Ok(())
    }

    /// Standard-path alerts flow through the debouncer (spec.md §4.11 ·
    /// §4.9); emergency/negative-review alerts bypass it.
    async fn bump_operator_alert(
        &self,
        tenant_id: &str,
        operator_number: &str,
        customer_phone: &str,
        text: &str,
    ) -> Result<()> {
        self.debouncer
            .bump(&self.store, tenant_id, customer_phone, operator_number, text)
            .await
    }

    async fn send_urgent_operator_alert(
        &self,
        tenant_id: &str,
        operator_number: &str,
        customer_phone: &str,
        text: &str,
    ) -> Result<()> {
        let body = self
            .templates
            .render("operator_urgent_alert", json!({ "caller": customer_phone, "text": text }))?;
        self.queue
            .enqueue(NewOutbound {
                tenant_id: tenant_id.to_string(),
                to_number: operator_number.to_string(),
                body,
                external_id: None,
                scheduled_for: None,
                bypass_quiet_hours: false,
                bypass_opt_out: false,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_echo_takes_priority_over_everything() {
        assert_eq!(
            classify("STOP", Some("delivered"), true),
            Classification::StatusEcho
        );
    }

    #[test]
    fn stop_variants_are_word_boundary_matched() {
        assert_eq!(classify("STOP", None, true), Classification::Stop);
        assert_eq!(classify("please cancel", None, true), Classification::Stop);
        assert_ne!(classify("i will cancelebrate", None, true), Classification::Stop);
    }

    #[test]
    fn help_and_start_short_circuit_before_ai_pause_check() {
        assert_eq!(classify("HELP", None, true), Classification::Help);
        assert_eq!(classify("unstop", None, false), Classification::StartOrUnstop);
    }

    #[test]
    fn ai_paused_overrides_review_and_urgency_classification() {
        assert_eq!(classify("great job, thanks!", None, false), Classification::AiPaused);
    }

    #[test]
    fn emergency_keywords_cross_threshold() {
        assert_eq!(
            classify("there's a gas smell in the kitchen, emergency!", None, true),
            Classification::Emergency
        );
    }

    #[test]
    fn not_urgent_override_downgrades_to_standard() {
        assert_eq!(
            classify("small leak, not urgent, whenever works", None, true),
            Classification::Standard
        );
    }

    #[test]
    fn mild_keyword_alone_stays_standard() {
        assert_eq!(classify("small leak under the sink", None, true), Classification::Standard);
    }
}
