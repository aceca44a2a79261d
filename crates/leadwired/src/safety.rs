//! C7: authorizes every outbound message before it reaches the queue (and
//! again, re-evaluated, at claim time — opt-out can race per spec.md
//! §4.8 step 2).
use crate::clock::Clock;
use crate::consent::ConsentLedger;
use crate::error::Result;
use crate::store::Store;
use thiserror::Error;

/// Known URL shorteners that SMS carriers are known to filter on;
/// presence triggers a warning, not a rejection (spec.md §4.7).
const KNOWN_SHORTENERS: &[&str] = &["bit.ly", "tinyurl.com", "t.co", "goo.gl", "ow.ly", "is.gd"];

const OPT_OUT_TOKENS: &[&str] = &["stop", "unsubscribe", "opt out", "opt-out"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SafetyRejection {
    #[error("recipient has opted out")]
    OptOut,
    #[error("unknown tenant")]
    InvalidTenant,
    #[error("invalid recipient number")]
    InvalidNumber,
    #[error("deferred for quiet hours")]
    QuietHours,
}

#[derive(Debug, Clone)]
pub struct OutboundDraft {
    pub tenant_id: String,
    pub to: String,
    pub body: String,
    pub is_internal: bool,
    /// True when this draft is itself the response to an emergency
    /// classification (spec.md §4.7: quiet-hours is bypassed for
    /// "emergency-response" outbound, not just internal alerts).
    pub is_emergency_response: bool,
    /// True for a compliance-mandatory reply (the STOP confirmation)
    /// that must be delivered even though the recipient was just opted
    /// out (spec.md §8 scenario 4).
    pub bypass_opt_out: bool,
}

#[derive(Debug, Clone)]
pub struct AuthorizedMessage {
    pub body: String,
    pub warnings: Vec<String>,
}

pub struct SafetyGate<'a> {
    pub store: &'a Store,
    pub consent: &'a ConsentLedger,
    pub clock: &'a Clock,
    pub admin_number: Option<&'a str>,
}

impl<'a> SafetyGate<'a> {
    pub async fn authorize(
        &self,
        draft: OutboundDraft,
    ) -> Result<std::result::Result<AuthorizedMessage, SafetyRejection>> {
        let tenant = match self.store.get_tenant(&draft.tenant_id).await? {
            Some(t) => t,
            None => return Ok(Err(SafetyRejection::InvalidTenant)),
        };

        let is_internal = draft.is_internal
            || draft.to == tenant.operator_number
            || self.admin_number == Some(draft.to.as_str());

        // Internal recipients (operator/admin) never generate an inbound
        // event, so they never accrue an affirmative consent record —
        // `is_valid` would legitimately (and wrongly, for this purpose)
        // be false for them forever. Gate them on an explicit prior
        // opt-out/revocation instead (spec.md §4.7). A compliance-
        // mandatory reply (the STOP confirmation) is exempt from this
        // check entirely: it is the one message that must still reach a
        // number that was just opted out.
        let opted_out = if draft.bypass_opt_out {
            false
        } else if is_internal {
            self.consent.has_opted_out(self.store, &draft.to).await?
        } else {
            !self.consent.is_valid(self.store, &draft.to).await?
        };
        if opted_out {
            return Ok(Err(SafetyRejection::OptOut));
        }

        if !looks_like_e164(&draft.to) {
            return Ok(Err(SafetyRejection::InvalidNumber));
        }

        if !is_internal
            && !draft.is_emergency_response
            && !self.clock.within_quiet_hours(&tenant, chrono::Utc::now())
        {
            return Ok(Err(SafetyRejection::QuietHours));
        }

        let mut body = draft.body;
        let mut warnings = Vec::new();

        if !is_internal && !contains_opt_out_token(&body) {
            body.push_str("\n\nReply STOP to unsubscribe.");
        }

        if contains_shortener(&body) {
            warnings.push("outbound body contains a known URL shortener".to_string());
        }

        Ok(Ok(AuthorizedMessage { body, warnings }))
    }
}

fn contains_opt_out_token(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    OPT_OUT_TOKENS.iter().any(|t| lower.contains(t))
}

fn contains_shortener(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    KNOWN_SHORTENERS.iter().any(|s| lower.contains(s))
}

/// Rough E.164 shape check: `+` followed by 8-15 digits. The gateway,
/// not this gate, is the source of truth for real deliverability.
fn looks_like_e164(number: &str) -> bool {
    let mut chars = number.chars();
    if chars.next() != Some('+') {
        return false;
    }
    let digits: String = chars.collect();
    digits.len() >= 8 && digits.len() <= 15 && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{ConsentKind, ConsentSource};
    use chrono::Utc;

    async fn seed_tenant(store: &Store) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO tenants (id, inbound_number, operator_number, display_name, timezone, \
             day_start, day_end, evening_end, emergency_mode, ai_active, average_job_value, \
             review_link, sheet_id, created_at) \
             VALUES (?, '+15005550000', '+15005550123', 'Acme', 'America/Los_Angeles', 7, 17, 19, \
             0, 1, 250.0, NULL, NULL, ?)",
        )
        .bind(&id)
        .bind(Utc::now())
        .execute(store.pool())
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn footer_is_appended_when_missing() {
        let store = Store::connect_in_memory().await.unwrap();
        let tenant_id = seed_tenant(&store).await;
        let consent = ConsentLedger::new();
        consent
            .record_implied(&store, &tenant_id, None, "+14155550111", ConsentSource::InboundCall)
            .await
            .unwrap();
        let clock = Clock::new("America/Los_Angeles");
        let gate = SafetyGate {
            store: &store,
            consent: &consent,
            clock: &clock,
            admin_number: None,
        };

        let draft = OutboundDraft {
            tenant_id: tenant_id.clone(),
            to: "+14155550111".into(),
            body: "hello there".into(),
            is_internal: false,
            is_emergency_response: true,
            bypass_opt_out: false,
        };
        let authorized = gate.authorize(draft).await.unwrap().unwrap();
        assert!(authorized.body.to_lowercase().contains("stop"));
    }

    #[tokio::test]
    async fn opt_out_rejects() {
        let store = Store::connect_in_memory().await.unwrap();
        let tenant_id = seed_tenant(&store).await;
        let consent = ConsentLedger::new();
        consent
            .record_implied(&store, &tenant_id, None, "+14155550111", ConsentSource::InboundCall)
            .await
            .unwrap();
        consent.revoke(&store, "+14155550111", "stop").await.unwrap();
        let clock = Clock::new("America/Los_Angeles");
        let gate = SafetyGate {
            store: &store,
            consent: &consent,
            clock: &clock,
            admin_number: None,
        };
        let draft = OutboundDraft {
            tenant_id,
            to: "+14155550111".into(),
            body: "hello".into(),
            is_internal: false,
            is_emergency_response: true,
            bypass_opt_out: false,
        };
        let result = gate.authorize(draft).await.unwrap();
        assert_eq!(result.unwrap_err(), SafetyRejection::OptOut);
    }

    #[tokio::test]
    async fn internal_alert_is_authorized_without_any_consent_record() {
        let store = Store::connect_in_memory().await.unwrap();
        let tenant_id = seed_tenant(&store).await;
        let consent = ConsentLedger::new();
        let clock = Clock::new("America/Los_Angeles");
        let gate = SafetyGate {
            store: &store,
            consent: &consent,
            clock: &clock,
            admin_number: None,
        };

        // The operator number never generates an inbound event, so it
        // never accrues a consent record of its own.
        let draft = OutboundDraft {
            tenant_id: tenant_id.clone(),
            to: "+15005550123".into(),
            body: "missed call alert".into(),
            is_internal: false,
            is_emergency_response: false,
            bypass_opt_out: false,
        };
        let authorized = gate.authorize(draft).await.unwrap();
        assert!(authorized.is_ok());
    }

    #[tokio::test]
    async fn bypass_opt_out_still_delivers_after_revocation() {
        let store = Store::connect_in_memory().await.unwrap();
        let tenant_id = seed_tenant(&store).await;
        let consent = ConsentLedger::new();
        consent
            .record_implied(&store, &tenant_id, None, "+14155550111", ConsentSource::InboundCall)
            .await
            .unwrap();
        consent.revoke(&store, "+14155550111", "stop").await.unwrap();
        let clock = Clock::new("America/Los_Angeles");
        let gate = SafetyGate {
            store: &store,
            consent: &consent,
            clock: &clock,
            admin_number: None,
        };
        let draft = OutboundDraft {
            tenant_id,
            to: "+14155550111".into(),
            body: "You have been unsubscribed.".into(),
            is_internal: false,
            is_emergency_response: false,
            bypass_opt_out: true,
        };
        let authorized = gate.authorize(draft).await.unwrap();
        assert!(authorized.is_ok());
    }

    #[test]
    fn consent_kind_implied_round_trip() {
        assert_eq!(ConsentKind::Implied.as_str(), "implied");
    }
}
