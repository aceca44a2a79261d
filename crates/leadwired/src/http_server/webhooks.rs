//! Provider webhook handlers (spec.md §6): `/voice`, `/voice/status`,
//! `/voice/voicemail`, `/sms`, `/sms/status`, `/unsubscribe`. Every known
//! path responds 200 on every exit (panics aside), per spec.md §5's
//! "webhook handlers return a valid provider response on every exit path",
//! so the provider never retry-storms us — the one exception is signature
//! verification failure, which answers 403.
use super::AppState;
use crate::gateway::verify_unsubscribe_token;
use crate::idempotency::IdempotencyOutcome;
use crate::metrics;
use crate::replay::{DeferredEvent, DeferredKind};
use crate::store::types::OutboundStatus;
use crate::voice_router::VoiceAction;
use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use std::collections::HashMap;

use super::voice_xml;

const TWILIO_SIGNATURE_HEADER: &str = "X-Twilio-Signature";

/// Verify the provider signature against this handler's own URL and its
/// form fields (spec.md §4.3). The URL is rebuilt from the configured
/// listen address rather than trusted proxy headers, since this process
/// has no reverse-proxy awareness of its own (see module doc).
fn verify_signature(state: &AppState, headers: &HeaderMap, path: &str, form: &HashMap<String, String>) -> bool {
    let signature = match headers.get(TWILIO_SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(s) => s,
        None => return false,
    };
    let url = format!("https://{}{}", state.opt.listen, path);
    let params: Vec<(&str, &str)> = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    state.gateway.verify_signature(&url, &params, signature)
}

async fn check_idempotent(
    state: &AppState,
    key: &str,
    kind: &str,
    tenant_id: Option<&str>,
) -> Option<IdempotencyOutcome> {
    let outcome = state.idempotency.check_and_record(&state.store, key, kind, tenant_id).await;
    if matches!(outcome, IdempotencyOutcome::Duplicate(_)) {
        metrics::WEBHOOK_DEDUP_HITS.with_label_values(&[kind]).inc();
    }
    Some(outcome)
}

/// `POST /voice` — fields `From, To, CallSid, Digits?`, plus our own
/// `emergency_timeout` query flag set on the Gather's `action` URL when a
/// press-1 prompt times out without a digit (see `voice_xml`).
pub async fn voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if state.opt.kill_switch {
        return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
    }
    if !verify_signature(&state, &headers, "/voice", &form) {
        return (StatusCode::FORBIDDEN, "bad signature").into_response();
    }
    process_voice(&state, &form, &query, false).await
}

/// Re-entered by the deferred replay sweep (spec.md §7) for events whose
/// signature was already verified the first time through but whose
/// idempotency check couldn't reach the store. `is_replay` suppresses a
/// second deferral so a sustained outage doesn't loop the same event.
async fn process_voice(
    state: &AppState,
    form: &HashMap<String, String>,
    query: &HashMap<String, String>,
    is_replay: bool,
) -> Response {
    let from = form.get("From").cloned().unwrap_or_default();
    let to = form.get("To").cloned().unwrap_or_default();
    let call_sid = form.get("CallSid").cloned().unwrap_or_default();
    let digits = form.get("Digits").cloned();
    let is_timeout_repost = query.contains_key("emergency_timeout");

    let idem_key = if is_timeout_repost {
        format!("{call_sid}_emergency_timeout")
    } else {
        call_sid.clone()
    };

    let tenant = match state.voice_router.resolve_tenant(&to).await {
        Ok(Some(t)) => t,
        Ok(None) => return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response(),
        Err(err) => {
            tracing::error!("voice: tenant lookup failed: {err:#}");
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
    };

    match check_idempotent(&state, &idem_key, "voice", Some(&tenant.id)).await {
        Some(IdempotencyOutcome::Duplicate(_)) => {
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        Some(IdempotencyOutcome::Unknown) => {
            if !is_replay {
                state.replay_queue.push(DeferredEvent {
                    kind: DeferredKind::Voice,
                    form: form.clone(),
                    query: query.clone(),
                });
            }
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        _ => {}
    }

    match state.store.check_rate_limit(
        &format!("tenant:{}", tenant.id),
        leadwire_ratelimit::DEFAULT_LIMIT,
        leadwire_ratelimit::DEFAULT_WINDOW,
        chrono::Utc::now(),
    ).await {
        Ok(leadwire_ratelimit::Decision::Reject) => {
            metrics::RATE_LIMIT_REJECTED.with_label_values(&["voice"]).inc();
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        Ok(leadwire_ratelimit::Decision::Admit) => {}
        Err(err) => tracing::warn!("rate limit check failed open: {err:#}"),
    }

    let action = if is_timeout_repost {
        match state.voice_router.handle_emergency_timeout(&tenant, &from).await {
            Ok(a) => a,
            Err(err) => {
                tracing::error!("emergency timeout handling failed: {err:#}");
                return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
            }
        }
    } else {
        let classification = state.clock.classify(&tenant, chrono::Utc::now());
        let line_type = state.voice_router.classify_line(&from).await;
        crate::voice_router::route_inbound_call(classification, tenant.emergency_mode, line_type, digits.as_deref())
    };

    if matches!(
        action,
        VoiceAction::PlayAfterHoursSendMissedCallSms
    ) {
        if let Err(err) = state.voice_router.handle_missed_call(&tenant, &from).await {
            tracing::error!("missed-call side effects failed: {err:#}");
        }
    }

    let after_hours_message = state
        .templates
        .render("after_hours_sms", serde_json::json!({ "tenant_name": tenant.display_name }))
        .ok();
    let xml = voice_xml::render(&action, &tenant.operator_number, after_hours_message.as_deref());
    (StatusCode::OK, Html(xml)).into_response()
}

/// `POST /voice/status` — fields `CallSid, DialCallStatus, AnsweredBy, From, To`.
pub async fn voice_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if state.opt.kill_switch {
        return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
    }
    if !verify_signature(&state, &headers, "/voice/status", &form) {
        return (StatusCode::FORBIDDEN, "bad signature").into_response();
    }
    process_voice_status(&state, &form, false).await
}

async fn process_voice_status(state: &AppState, form: &HashMap<String, String>, is_replay: bool) -> Response {
    let call_sid = form.get("CallSid").cloned().unwrap_or_default();
    let dial_status = form.get("DialCallStatus").cloned().unwrap_or_default();
    let from = form.get("From").cloned().unwrap_or_default();
    let to = form.get("To").cloned().unwrap_or_default();

    let tenant = match state.voice_router.resolve_tenant(&to).await {
        Ok(Some(t)) => t,
        _ => return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response(),
    };

    let idem_key = format!("{call_sid}_status_{dial_status}");
    match check_idempotent(&state, &idem_key, "voice_status", Some(&tenant.id)).await {
        Some(IdempotencyOutcome::Duplicate(_)) => {
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        Some(IdempotencyOutcome::Unknown) => {
            if !is_replay {
                state.replay_queue.push(DeferredEvent {
                    kind: DeferredKind::VoiceStatus,
                    form: form.clone(),
                    query: HashMap::new(),
                });
            }
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        _ => {}
    }

    if crate::voice_router::is_missed_call_status(&dial_status) {
        if let Err(err) = state.voice_router.handle_missed_call(&tenant, &from).await {
            tracing::error!("missed-call side effects failed: {err:#}");
        }
    }

    (StatusCode::OK, Html(voice_xml::empty_ok())).into_response()
}

/// `POST /voice/voicemail` — fields `CallSid, From, To, RecordingUrl`.
pub async fn voice_voicemail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if state.opt.kill_switch {
        return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
    }
    if !verify_signature(&state, &headers, "/voice/voicemail", &form) {
        return (StatusCode::FORBIDDEN, "bad signature").into_response();
    }
    process_voice_voicemail(&state, &form, false).await
}

async fn process_voice_voicemail(state: &AppState, form: &HashMap<String, String>, is_replay: bool) -> Response {
    let call_sid = form.get("CallSid").cloned().unwrap_or_default();
    let from = form.get("From").cloned().unwrap_or_default();
    let to = form.get("To").cloned().unwrap_or_default();
    let recording_url = form.get("RecordingUrl").cloned().unwrap_or_default();

    let tenant = match state.voice_router.resolve_tenant(&to).await {
        Ok(Some(t)) => t,
        _ => return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response(),
    };

    let idem_key = format!("{call_sid}_voicemail");
    match check_idempotent(&state, &idem_key, "voice_voicemail", Some(&tenant.id)).await {
        Some(IdempotencyOutcome::Duplicate(_)) => {
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        Some(IdempotencyOutcome::Unknown) => {
            if !is_replay {
                state.replay_queue.push(DeferredEvent {
                    kind: DeferredKind::VoiceVoicemail,
                    form: form.clone(),
                    query: HashMap::new(),
                });
            }
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        _ => {}
    }

    if let Err(err) = state
        .voice_router
        .handle_voicemail(&tenant, &from, &call_sid, &recording_url)
        .await
    {
        tracing::error!("voicemail handling failed: {err:#}");
    }

    (StatusCode::OK, Html(voice_xml::acknowledge_and_hangup("Thank you, goodbye."))).into_response()
}

/// `POST /sms` — fields `MessageSid, From, To, Body, SmsStatus?`.
pub async fn sms(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if state.opt.kill_switch {
        return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
    }
    if !verify_signature(&state, &headers, "/sms", &form) {
        return (StatusCode::FORBIDDEN, "bad signature").into_response();
    }
    process_sms(&state, &form, false).await
}

async fn process_sms(state: &AppState, form: &HashMap<String, String>, is_replay: bool) -> Response {
    let message_sid = form.get("MessageSid").cloned().unwrap_or_default();
    let from = form.get("From").cloned().unwrap_or_default();
    let to = form.get("To").cloned().unwrap_or_default();
    let body = form.get("Body").cloned().unwrap_or_default();
    let sms_status = form.get("SmsStatus").cloned();

    let tenant = match state.voice_router.resolve_tenant(&to).await {
        Ok(Some(t)) => t,
        _ => return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response(),
    };

    match check_idempotent(&state, &message_sid, "sms", Some(&tenant.id)).await {
        Some(IdempotencyOutcome::Duplicate(_)) => {
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        Some(IdempotencyOutcome::Unknown) => {
            if !is_replay {
                state.replay_queue.push(DeferredEvent {
                    kind: DeferredKind::Sms,
                    form: form.clone(),
                    query: HashMap::new(),
                });
            }
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        _ => {}
    }

    match state.store.check_rate_limit(
        &format!("tenant:{}", tenant.id),
        leadwire_ratelimit::DEFAULT_LIMIT,
        leadwire_ratelimit::DEFAULT_WINDOW,
        chrono::Utc::now(),
    ).await {
        Ok(leadwire_ratelimit::Decision::Reject) => {
            metrics::RATE_LIMIT_REJECTED.with_label_values(&["sms"]).inc();
            return (StatusCode::OK, Html(voice_xml::empty_ok())).into_response();
        }
        Ok(leadwire_ratelimit::Decision::Admit) => {}
        Err(err) => tracing::warn!("rate limit check failed open: {err:#}"),
    }

    match state
        .sms_router
        .handle(
            &tenant.id,
            &tenant.display_name,
            &tenant.operator_number,
            &from,
            &body,
            sms_status.as_deref(),
            tenant.review_link.as_deref(),
            tenant.ai_active,
        )
        .await
    {
        Ok(_outcome) => {}
        Err(err) => tracing::error!("sms routing failed: {err:#}"),
    }

    (StatusCode::OK, Html(voice_xml::empty_ok())).into_response()
}

/// `POST /sms/status` — fields `MessageSid, MessageStatus`. Maps the
/// provider's status vocabulary to our internal outbound states.
pub async fn sms_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if !verify_signature(&state, &headers, "/sms/status", &form) {
        return (StatusCode::FORBIDDEN, "bad signature").into_response();
    }
    process_sms_status(&state, &form, false).await
}

async fn process_sms_status(state: &AppState, form: &HashMap<String, String>, is_replay: bool) -> Response {
    let message_sid = form.get("MessageSid").cloned().unwrap_or_default();
    let message_status = form.get("MessageStatus").cloned().unwrap_or_default();

    match check_idempotent(&state, &format!("{message_sid}_status_{message_status}"), "sms_status", None).await {
        Some(IdempotencyOutcome::Duplicate(_)) => {
            return StatusCode::OK.into_response();
        }
        Some(IdempotencyOutcome::Unknown) => {
            if !is_replay {
                state.replay_queue.push(DeferredEvent {
                    kind: DeferredKind::SmsStatus,
                    form: form.clone(),
                    query: HashMap::new(),
                });
            }
            return StatusCode::OK.into_response();
        }
        _ => {}
    }

    let result = match message_status.to_ascii_lowercase().as_str() {
        "delivered" => state.store.mark_outbound_delivered(&message_sid).await.map(|_| ()),
        "failed" | "undelivered" => state
            .store
            .mark_outbound_status_by_provider_id(&message_sid, OutboundStatus::Failed)
            .await
            .map(|_| ()),
        _ => Ok(()),
    };
    if let Err(err) = result {
        tracing::error!("sms_status update failed: {err:#}");
    }

    StatusCode::OK.into_response()
}

/// Drain the deferred replay queue and re-run each event through the same
/// processing path a live webhook would take (spec.md §7). Called from a
/// periodic background task (see `main.rs`); signature verification is
/// not repeated since every queued event already passed it once.
pub async fn replay_deferred(state: &AppState) {
    let events = state.replay_queue.drain();
    if events.is_empty() {
        return;
    }
    tracing::info!(count = events.len(), "replaying deferred webhook events");
    for event in events {
        match event.kind {
            DeferredKind::Voice => {
                process_voice(state, &event.form, &event.query, true).await;
            }
            DeferredKind::VoiceStatus => {
                process_voice_status(state, &event.form, true).await;
            }
            DeferredKind::VoiceVoicemail => {
                process_voice_voicemail(state, &event.form, true).await;
            }
            DeferredKind::Sms => {
                process_sms(state, &event.form, true).await;
            }
            DeferredKind::SmsStatus => {
                process_sms_status(state, &event.form, true).await;
            }
        }
    }
}

/// `GET /unsubscribe?phone=&token=` — HMAC-token-gated one-click opt-out
/// (spec.md §6), scoped globally across tenants (see `gateway::sign_unsubscribe_token`).
pub async fn unsubscribe(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> Response {
    let phone = match query.get("phone") {
        Some(p) => p,
        None => return (StatusCode::BAD_REQUEST, "missing phone").into_response(),
    };
    let token = match query.get("token") {
        Some(t) => t,
        None => return (StatusCode::BAD_REQUEST, "missing token").into_response(),
    };

    let secret = match &state.opt.unsubscribe_secret {
        Some(s) => s,
        None => return (StatusCode::INTERNAL_SERVER_ERROR, "unsubscribe not configured").into_response(),
    };

    if !verify_unsubscribe_token(secret, phone, token) {
        return (StatusCode::FORBIDDEN, "bad token").into_response();
    }

    if let Err(err) = state.consent.revoke(&state.store, phone, "one-click unsubscribe").await {
        tracing::error!("unsubscribe revoke failed: {err:#}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
    }
    if let Err(err) = state.store.set_lead_opt_out_all_tenants(phone).await {
        tracing::error!("unsubscribe opt-out write failed: {err:#}");
    }

    (StatusCode::OK, Html("<html><body>You have been unsubscribed.</body></html>")).into_response()
}
