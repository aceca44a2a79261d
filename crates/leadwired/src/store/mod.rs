//! C1: the durable, transactional store. A thin wrapper over
//! `sqlx::SqlitePool` exposing explicit, typed operations rather than
//! letting callers hand-roll SQL at every call site — grounded on the
//! `lease_events`/`report_delivery` shape in the pack's webhook-dispatcher
//! examples (atomic claim via `UPDATE ... WHERE id IN (SELECT ...)
//! RETURNING`, inside a single write transaction).
pub mod types;

use crate::error::{LeadwireError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use types::*;
use uuid::Uuid;

/// Implied consent expires 2 years after grant (spec.md §3); express
/// consent never expires.
const IMPLIED_CONSENT_LIFETIME_DAYS: i64 = 365 * 2;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect (creating the database file if needed) and run migrations.
    /// `busy_timeout` honors spec.md §4.1's "connections must tolerate
    /// contention (busy timeout ≥ 10s)".
    pub async fn connect(path: &std::path::Path) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(opts)
            .await
            .map_err(LeadwireError::from)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| LeadwireError::PermanentStore(sqlx::Error::Migrate(Box::new(e))))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(LeadwireError::from)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| LeadwireError::PermanentStore(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---------------------------------------------------------------
    // Tenants
    // ---------------------------------------------------------------

    pub async fn get_tenant(&self, id: &str) -> Result<Option<TenantRow>> {
        Ok(sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_tenant_by_inbound_number(&self, number: &str) -> Result<Option<TenantRow>> {
        Ok(
            sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE inbound_number = ?")
                .bind(number)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Fallback lookup used when a dial-status callback reports the
    /// tenant's operator number in `To` instead of the original inbound
    /// number (spec.md §4.10, open question in §9 — kept per DESIGN.md).
    pub async fn get_tenant_by_operator_number(&self, number: &str) -> Result<Option<TenantRow>> {
        Ok(
            sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE operator_number = ?")
                .bind(number)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn set_ai_active(&self, tenant_id: &str, active: bool) -> Result<()> {
        sqlx::query("UPDATE tenants SET ai_active = ? WHERE id = ?")
            .bind(active)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantRow>> {
        Ok(sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?)
    }

    // ---------------------------------------------------------------
    // Leads
    // ---------------------------------------------------------------

    /// Get the lead for (tenant, phone), creating a fresh `new` lead if
    /// none exists yet. Unique on (tenant_id, phone) per spec.md §3.
    pub async fn get_or_create_lead(&self, tenant_id: &str, phone: &str) -> Result<LeadRow> {
        if let Some(existing) = self.get_lead(tenant_id, phone).await? {
            return Ok(existing);
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let inserted = sqlx::query(
            "INSERT INTO leads (id, tenant_id, phone, status, intent, opt_out, name, created_at, last_contact_at) \
             VALUES (?, ?, ?, 'new', NULL, 0, NULL, ?, NULL) \
             ON CONFLICT(tenant_id, phone) DO NOTHING",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(phone)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost the race to a concurrent insert; read back the winner.
            return self
                .get_lead(tenant_id, phone)
                .await?
                .ok_or_else(|| LeadwireError::NotFound(format!("lead {tenant_id}/{phone}")));
        }

        self.get_lead(tenant_id, phone)
            .await?
            .ok_or_else(|| LeadwireError::NotFound(format!("lead {tenant_id}/{phone}")))
    }

    pub async fn get_lead(&self, tenant_id: &str, phone: &str) -> Result<Option<LeadRow>> {
        Ok(sqlx::query_as::<_, LeadRow>(
            "SELECT * FROM leads WHERE tenant_id = ? AND phone = ?",
        )
        .bind(tenant_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Set a lead's status, honoring the regression guard: once `booked`,
    /// only an admin-originated call (`allow_booked_override`) may move it
    /// (spec.md §3).
    pub async fn set_lead_status(
        &self,
        lead_id: &str,
        new_status: LeadStatus,
        allow_booked_override: bool,
    ) -> Result<()> {
        let query = if allow_booked_override {
            "UPDATE leads SET status = ? WHERE id = ?"
        } else {
            "UPDATE leads SET status = ? WHERE id = ? AND status != 'booked'"
        };
        sqlx::query(query)
            .bind(new_status.as_str())
            .bind(lead_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_lead_intent(&self, lead_id: &str, intent: Intent) -> Result<()> {
        sqlx::query("UPDATE leads SET intent = ? WHERE id = ?")
            .bind(intent.as_str())
            .bind(lead_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Monotonic: once true, stays true (spec.md §3, §8 "idempotent and
    /// monotonic").
    pub async fn set_lead_opt_out(&self, tenant_id: &str, phone: &str, opt_out: bool) -> Result<()> {
        if !opt_out {
            return Ok(());
        }
        sqlx::query("UPDATE leads SET opt_out = 1 WHERE tenant_id = ? AND phone = ?")
            .bind(tenant_id)
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// One-click unsubscribe (spec.md §4.6): the link a customer receives
    /// isn't scoped to one tenant, so opting out flips every lead this
    /// phone has across all tenants, not just the one that last texted.
    pub async fn set_lead_opt_out_all_tenants(&self, phone: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE leads SET opt_out = 1 WHERE phone = ?")
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn touch_last_contact(&self, lead_id: &str) -> Result<()> {
        sqlx::query("UPDATE leads SET last_contact_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(lead_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Webhook idempotency (C4)
    // ---------------------------------------------------------------

    /// Attempt to record a webhook event. Returns `true` if this call
    /// recorded it (first time seen), `false` if a row already existed
    /// (duplicate) — in which case `existing_internal_id` returns the
    /// previously recorded internal id.
    pub async fn try_insert_webhook_event(
        &self,
        provider_id: &str,
        kind: &str,
        tenant_id: Option<&str>,
        internal_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (provider_id, kind, tenant_id, processed_at, internal_id) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT(provider_id) DO NOTHING",
        )
        .bind(provider_id)
        .bind(kind)
        .bind(tenant_id)
        .bind(Utc::now())
        .bind(internal_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_webhook_internal_id(&self, provider_id: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT internal_id FROM webhook_events WHERE provider_id = ?")
                .bind(provider_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    // ---------------------------------------------------------------
    // Consent ledger (C6)
    // ---------------------------------------------------------------

    pub async fn record_consent(
        &self,
        tenant_id: &str,
        lead_id: Option<&str>,
        phone: &str,
        kind: ConsentKind,
        source: ConsentSource,
        metadata: Option<&str>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = match kind {
            ConsentKind::Implied => Some(now + ChronoDuration::days(IMPLIED_CONSENT_LIFETIME_DAYS)),
            ConsentKind::Express => None,
        };
        sqlx::query(
            "INSERT INTO consent_records \
             (id, lead_id, tenant_id, phone, kind, source, consented_at, expires_at, revoked_at, revocation_reason, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?)",
        )
        .bind(&id)
        .bind(lead_id)
        .bind(tenant_id)
        .bind(phone)
        .bind(kind.as_str())
        .bind(source.as_str())
        .bind(now)
        .bind(expires_at)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Global, cross-tenant revocation: updates every non-revoked record
    /// for this phone (spec.md §4.6).
    pub async fn revoke_consent(&self, phone: &str, reason: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE consent_records SET revoked_at = ?, revocation_reason = ? \
             WHERE phone = ? AND revoked_at IS NULL",
        )
        .bind(Utc::now())
        .bind(reason)
        .bind(phone)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// `is_valid(phone)` per spec.md §3's invariant: exists a record with
    /// `revoked_at IS NULL AND (expires_at IS NULL OR expires_at > now)`.
    pub async fn is_consent_valid(&self, phone: &str) -> Result<bool> {
        let now = Utc::now();
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM consent_records \
             WHERE phone = ? AND revoked_at IS NULL AND (expires_at IS NULL OR expires_at > ?) \
             LIMIT 1",
        )
        .bind(phone)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Explicit opt-out signal, distinct from `is_consent_valid`: a phone
    /// that has never generated an inbound event (operator/admin numbers)
    /// has no consent record either way, so `is_consent_valid` legitimately
    /// returns `false` for it without that meaning it was ever opted out.
    /// This only returns `true` once a revocation has actually been
    /// recorded for the phone (spec.md §4.6/§4.7).
    pub async fn has_opted_out(&self, phone: &str) -> Result<bool> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM consent_records WHERE phone = ? AND revoked_at IS NOT NULL LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    // ---------------------------------------------------------------
    // Outbound queue (C8)
    // ---------------------------------------------------------------

    pub async fn enqueue_outbound(&self, draft: &NewOutbound) -> Result<EnqueueOutcome> {
        // spec.md §4.8's enqueue contract is {queued, deduplicated,
        // rejected}: an opted-out recipient never gets a pending row,
        // not even transiently.
        if !draft.bypass_opt_out && self.has_opted_out(&draft.to_number).await? {
            return Ok(EnqueueOutcome::Rejected {
                reason: "opt_out".into(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO outbound_messages \
             (id, tenant_id, to_number, body, external_id, status, attempts, \
              last_attempt_at, locked_at, scheduled_for, created_at, sent_at, provider_message_id, \
              bypass_quiet_hours, bypass_opt_out) \
             VALUES (?, ?, ?, ?, ?, 'pending', 0, NULL, NULL, ?, ?, NULL, NULL, ?, ?) \
             ON CONFLICT(external_id) DO NOTHING",
        )
        .bind(&id)
        .bind(&draft.tenant_id)
        .bind(&draft.to_number)
        .bind(&draft.body)
        .bind(&draft.external_id)
        .bind(draft.scheduled_for)
        .bind(now)
        .bind(draft.bypass_quiet_hours)
        .bind(draft.bypass_opt_out)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(EnqueueOutcome::Queued(id));
        }

        // external_id collided with an existing row; this can only happen
        // when external_id is Some, since the column's uniqueness is
        // scoped to non-null values.
        let existing_id: String = sqlx::query_scalar(
            "SELECT id FROM outbound_messages WHERE external_id = ?",
        )
        .bind(&draft.external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(EnqueueOutcome::Deduplicated(existing_id))
    }

    /// Atomically claim up to `limit` eligible rows (spec.md §4.8's claim
    /// predicate), ordered `created_at ASC`. Single `UPDATE ...
    /// RETURNING` inside a hand-issued `BEGIN IMMEDIATE` transaction
    /// (rather than `Pool::begin`, which only issues a plain `BEGIN`) so
    /// no two dispatcher workers can claim the same row: SQLite grants
    /// the write lock at `BEGIN IMMEDIATE` time instead of at first
    /// write, closing the race window between the claim's `SELECT` and
    /// `UPDATE`.
    pub async fn claim_pending(
        &self,
        limit: i64,
        stuck_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboundRow>> {
        let stuck_before = now - ChronoDuration::from_std(stuck_timeout).unwrap_or_default();

        let mut conn = self.pool.acquire().await.map_err(LeadwireError::from)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(LeadwireError::from)?;

        let claimed = self
            .claim_pending_in_tx(&mut conn, limit, stuck_before, now)
            .await;

        match claimed {
            Ok(rows) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(LeadwireError::from)?;
                Ok(rows)
            }
            Err(err) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(err)
            }
        }
    }

    async fn claim_pending_in_tx(
        &self,
        conn: &mut sqlx::SqliteConnection,
        limit: i64,
        stuck_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboundRow>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            WITH eligible AS (
                SELECT id FROM outbound_messages
                WHERE
                    (
                        status = 'pending'
                        AND (scheduled_for IS NULL OR scheduled_for <= ?1)
                        AND (
                            attempts = 0
                            OR last_attempt_at IS NULL
                            OR ?1 >= datetime(last_attempt_at, '+' || (
                                CASE attempts
                                    WHEN 1 THEN 5
                                    WHEN 2 THEN 30
                                    WHEN 3 THEN 120
                                    WHEN 4 THEN 600
                                    ELSE 1800
                                END
                            ) || ' seconds')
                        )
                    )
                    OR (
                        status = 'processing'
                        AND (locked_at IS NULL OR locked_at <= ?2)
                    )
                ORDER BY created_at ASC, attempts ASC
                LIMIT ?3
            )
            UPDATE outbound_messages
            SET status = 'processing', locked_at = ?1
            WHERE id IN (SELECT id FROM eligible)
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(stuck_before)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let query = format!("SELECT * FROM outbound_messages WHERE id IN ({placeholders})");
        let mut q = sqlx::query_as::<_, OutboundRow>(&query);
        for id in &ids {
            q = q.bind(id);
        }
        Ok(q.fetch_all(&mut *conn).await?)
    }

    pub async fn get_outbound(&self, id: &str) -> Result<Option<OutboundRow>> {
        Ok(
            sqlx::query_as::<_, OutboundRow>("SELECT * FROM outbound_messages WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn mark_outbound_sent(&self, id: &str, provider_message_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE outbound_messages SET status = 'sent', sent_at = ?, provider_message_id = ? \
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(provider_message_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upgrade a `sent` row to `delivered` on a provider status callback.
    pub async fn mark_outbound_delivered(&self, provider_message_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE outbound_messages SET status = 'delivered' \
             WHERE provider_message_id = ? AND status = 'sent'",
        )
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Generalized sibling of `mark_outbound_delivered` for `/sms/status`
    /// callbacks that report `failed`/`undelivered` rather than
    /// `delivered` — looked up by `provider_message_id` since that's all
    /// the callback carries, constrained to `sent` so a stale or
    /// out-of-order callback can't clobber a row the dispatcher has since
    /// moved on from. Returns whether a row was actually found and moved.
    pub async fn mark_outbound_status_by_provider_id(
        &self,
        provider_message_id: &str,
        status: OutboundStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE outbound_messages SET status = ? \
             WHERE provider_message_id = ? AND status = 'sent'",
        )
        .bind(status.as_str())
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_outbound_retry(&self, id: &str, attempts: i64) -> Result<()> {
        sqlx::query(
            "UPDATE outbound_messages SET status = 'pending', attempts = ?, last_attempt_at = ? \
             WHERE id = ?",
        )
        .bind(attempts)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_outbound_terminal(&self, id: &str, status: OutboundStatus) -> Result<()> {
        sqlx::query("UPDATE outbound_messages SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Cancel all `{pending, processing}` rows whose `external_id` equals
    /// `external_id` (nudge cancellation, spec.md §4.12).
    pub async fn cancel_by_external_id(&self, external_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE outbound_messages SET status = 'cancelled' \
             WHERE external_id = ? AND status IN ('pending', 'processing')",
        )
        .bind(external_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ---------------------------------------------------------------
    // Alert buffer (C9)
    // ---------------------------------------------------------------

    /// Upsert-bump a buffer for (tenant, customer_phone): append `text`,
    /// increment count, extend `send_at = now + 30s` (spec.md §4.9).
    pub async fn bump_alert_buffer(
        &self,
        tenant_id: &str,
        customer_phone: &str,
        operator_phone: &str,
        text: &str,
        quiescence: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        let send_at = now + ChronoDuration::from_std(quiescence).unwrap_or_default();
        sqlx::query(
            "INSERT INTO alert_buffers \
             (tenant_id, customer_phone, operator_phone, coalesced_text, count, send_at, created_at) \
             VALUES (?, ?, ?, ?, 1, ?, ?) \
             ON CONFLICT(tenant_id, customer_phone) DO UPDATE SET \
               coalesced_text = coalesced_text || char(10) || excluded.coalesced_text, \
               count = count + 1, \
               send_at = excluded.send_at",
        )
        .bind(tenant_id)
        .bind(customer_phone)
        .bind(operator_phone)
        .bind(text)
        .bind(send_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Run one sweep cycle: select due buffers, invoke `on_due` for each
    /// (expected to enqueue the coalesced alert), and delete the buffer
    /// only if `on_due` succeeds. The whole cycle runs inside one
    /// `IMMEDIATE` transaction so a concurrent bump on the same key can't
    /// interleave (spec.md §4.9: "mutually exclusive").
    pub async fn sweep_alert_buffers<F, Fut>(&self, now: DateTime<Utc>, on_due: F) -> Result<usize>
    where
        F: FnMut(AlertBufferRow) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut conn = self.pool.acquire().await.map_err(LeadwireError::from)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(LeadwireError::from)?;

        let result = Self::sweep_alert_buffers_in_tx(&mut conn, now, on_due).await;

        match result {
            Ok(swept) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(LeadwireError::from)?;
                Ok(swept)
            }
            Err(err) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(err)
            }
        }
    }

    async fn sweep_alert_buffers_in_tx<F, Fut>(
        conn: &mut sqlx::SqliteConnection,
        now: DateTime<Utc>,
        mut on_due: F,
    ) -> Result<usize>
    where
        F: FnMut(AlertBufferRow) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let due: Vec<AlertBufferRow> = sqlx::query_as(
            "SELECT * FROM alert_buffers WHERE send_at <= ? ORDER BY send_at ASC",
        )
        .bind(now)
        .fetch_all(&mut *conn)
        .await?;

        let mut swept = 0usize;
        for buffer in due {
            let key = (buffer.tenant_id.clone(), buffer.customer_phone.clone());
            on_due(buffer).await?;
            sqlx::query("DELETE FROM alert_buffers WHERE tenant_id = ? AND customer_phone = ?")
                .bind(&key.0)
                .bind(&key.1)
                .execute(&mut *conn)
                .await?;
            swept += 1;
        }
        Ok(swept)
    }

    // ---------------------------------------------------------------
    // Rate limiter (C5)
    // ---------------------------------------------------------------

    /// Read-decide-write inside one transaction against the
    /// `rate_limit_windows` row, using the pure decision function in
    /// `leadwire-ratelimit`.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<leadwire_ratelimit::Decision> {
        let mut tx = self.pool.begin().await.map_err(LeadwireError::from)?;

        let existing: Option<(i64, DateTime<Utc>)> = sqlx::query(
            "SELECT count, reset_at FROM rate_limit_windows WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| (row.get::<i64, _>("count"), row.get::<DateTime<Utc>, _>("reset_at")));

        let state = existing.map(|(count, reset_at)| leadwire_ratelimit::WindowState {
            count: count as u64,
            reset_at,
        });

        let outcome = leadwire_ratelimit::evaluate(state, now, limit, window);

        if outcome.decision == leadwire_ratelimit::Decision::Admit {
            sqlx::query(
                "INSERT INTO rate_limit_windows (key, count, reset_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET count = excluded.count, reset_at = excluded.reset_at",
            )
            .bind(key)
            .bind(outcome.new_count as i64)
            .bind(outcome.new_reset_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(LeadwireError::from)?;
        Ok(outcome.decision)
    }

    // ---------------------------------------------------------------
    // Conversation log
    // ---------------------------------------------------------------

    pub async fn append_conversation_log(
        &self,
        tenant_id: &str,
        phone: &str,
        direction: &str,
        body: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversation_log (id, tenant_id, phone, direction, body, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(phone)
        .bind(direction)
        .bind(body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Dashboard read queries (spec.md §6: "consumed, not implemented
    // here" — query plumbing only, no UI)
    // ---------------------------------------------------------------

    pub async fn recent_conversation(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> Result<Vec<(String, String, String, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT phone, direction, body, created_at FROM conversation_log \
             WHERE tenant_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.get("phone"),
                    r.get("direction"),
                    r.get("body"),
                    r.get("created_at"),
                )
            })
            .collect())
    }

    pub async fn funnel_counts(&self, tenant_id: &str) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) as n FROM leads WHERE tenant_id = ? GROUP BY status",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.get("status"), r.get("n"))).collect())
    }

    /// `count(leads where intent=emergency in window) * tenant.average_job_value`
    /// (spec.md §6).
    pub async fn revenue_estimate(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> Result<f64> {
        let tenant = self
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| LeadwireError::NotFound(format!("tenant {tenant_id}")))?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM leads WHERE tenant_id = ? AND intent = 'emergency' AND created_at >= ?",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as f64 * tenant.average_job_value)
    }

    pub async fn list_leads(&self, tenant_id: &str, limit: i64) -> Result<Vec<LeadRow>> {
        Ok(sqlx::query_as::<_, LeadRow>(
            "SELECT * FROM leads WHERE tenant_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}
