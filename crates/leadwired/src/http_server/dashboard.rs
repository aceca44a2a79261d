//! Read-only dashboard query endpoints (spec.md §6: "consumed, not
//! implemented here" — query plumbing only, no UI), plus the one
//! dashboard write the spec names: toggling a tenant's `ai_active` flag.
use super::{AppError, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

pub async fn activity(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit: i64 = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(50);
    let rows = state.store.recent_conversation(&tenant_id, limit).await?;
    let entries: Vec<_> = rows
        .into_iter()
        .map(|(phone, direction, body, created_at)| {
            json!({
                "phone": phone,
                "direction": direction,
                "body": body,
                "created_at": created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "tenant_id": tenant_id, "entries": entries })))
}

pub async fn funnel(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let counts = state.store.funnel_counts(&tenant_id).await?;
    let by_status: HashMap<String, i64> = counts.into_iter().collect();
    Ok(Json(json!({ "tenant_id": tenant_id, "counts": by_status })))
}

#[derive(Deserialize)]
pub struct RevenueQuery {
    /// Lookback window in days; defaults to 30 (spec.md §6 leaves the
    /// window unspecified — a rolling month is the obvious default for a
    /// dashboard estimate).
    days: Option<i64>,
}

pub async fn revenue(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let since = Utc::now() - ChronoDuration::days(query.days.unwrap_or(30));
    let estimate = state.store.revenue_estimate(&tenant_id, since).await?;
    Ok(Json(json!({ "tenant_id": tenant_id, "since": since, "estimate": estimate })))
}

pub async fn leads(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit: i64 = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(100);
    let rows = state.store.list_leads(&tenant_id, limit).await?;
    let leads: Vec<_> = rows
        .into_iter()
        .map(|l| {
            json!({
                "id": l.id,
                "phone": l.phone,
                "status": l.status,
                "intent": l.intent,
                "opt_out": l.opt_out,
                "name": l.name,
                "created_at": l.created_at,
                "last_contact_at": l.last_contact_at,
            })
        })
        .collect();
    Ok(Json(json!({ "tenant_id": tenant_id, "leads": leads })))
}

#[derive(Deserialize)]
pub struct SetAiActive {
    active: bool,
}

pub async fn set_ai_active(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(body): Json<SetAiActive>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.set_ai_active(&tenant_id, body.active).await?;
    Ok(Json(json!({ "tenant_id": tenant_id, "ai_active": body.active })))
}
