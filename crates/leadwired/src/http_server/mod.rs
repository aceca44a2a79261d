//! C6's external interface layer (spec.md §6): axum routes for the
//! provider webhooks, the one-click unsubscribe link, health, metrics,
//! and the read-only dashboard queries. Grounded on the teacher's
//! `kumod::http_server`'s `AppState`/`AppError` shape, simplified since
//! this process has no TLS listener or trusted-host allowlist of its
//! own — every route here is meant to be reachable from the public
//! internet (the provider calls back over plain HTTPS at the edge).
mod dashboard;
mod webhooks;

pub use webhooks::replay_deferred;

use crate::clock::Clock;
use crate::config::Opt;
use crate::consent::ConsentLedger;
use crate::debouncer::AlertDebouncer;
use crate::gateway::TelephonyGateway;
use crate::idempotency::IdempotencyGuard;
use crate::replay::DeferredReplayQueue;
use crate::sms_router::SmsRouter;
use crate::store::Store;
use crate::voice_router::VoiceRouter;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use leadwire_template::TemplateEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub gateway: Arc<dyn TelephonyGateway>,
    pub consent: Arc<ConsentLedger>,
    pub clock: Arc<Clock>,
    pub idempotency: Arc<IdempotencyGuard>,
    pub debouncer: Arc<AlertDebouncer>,
    pub templates: Arc<TemplateEngine>,
    pub voice_router: Arc<VoiceRouter>,
    pub sms_router: Arc<SmsRouter>,
    pub opt: Arc<Opt>,
    pub replay_queue: Arc<DeferredReplayQueue>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/voice", post(webhooks::voice))
        .route("/voice/status", post(webhooks::voice_status))
        .route("/voice/voicemail", post(webhooks::voice_voicemail))
        .route("/sms", post(webhooks::sms))
        .route("/sms/status", post(webhooks::sms_status))
        .route("/health", get(health))
        .route("/unsubscribe", get(webhooks::unsubscribe))
        .route("/metrics", get(metrics))
        .route("/dashboard/{tenant_id}/activity", get(dashboard::activity))
        .route("/dashboard/{tenant_id}/funnel", get(dashboard::funnel))
        .route("/dashboard/{tenant_id}/revenue", get(dashboard::revenue))
        .route("/dashboard/{tenant_id}/leads", get(dashboard::leads))
        .route("/dashboard/{tenant_id}/ai-active", post(dashboard::set_ai_active))
        .layer(axum::middleware::from_fn(activity_guard))
        .with_state(state)
}

/// Wraps every request in a [`leadwire_lifecycle::Activity`] handle so a
/// graceful shutdown waits for in-flight webhook handlers to finish
/// (spec.md §5: "webhook handlers" are named suspension points whose
/// completion the shutdown sequence must await).
async fn activity_guard(req: axum::extract::Request, next: axum::middleware::Next) -> Response {
    match leadwire_lifecycle::Activity::get_opt("http-request".to_string()) {
        Some(_activity) => next.run(req).await,
        None => (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response(),
    }
}

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "kill_switch": state.opt.kill_switch,
        "telephony_configured": state.opt.provider_account_id.is_some() && state.opt.provider_auth_token.is_some(),
    }))
}

async fn metrics() -> Result<String, AppError> {
    Ok(leadwire_common::metrics_text::render()?)
}

/// Wraps any internal error as a 500; route handlers that must always
/// answer the provider with 200 convert errors to a body instead of
/// using this (see `webhooks::respond_ok_on_error`).
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("request failed: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
