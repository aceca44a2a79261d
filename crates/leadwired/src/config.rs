//! Typed process configuration, loaded from environment variables (with
//! CLI overrides) via `clap`'s `env` support, the way the teacher's
//! `kumod::main::Opt` gates startup on required fields. Unlike the
//! teacher's policy-file-driven config, this process has a fixed,
//! small set of required settings, so a flat struct is enough.
use clap::Parser;
use leadwire_common::logging::DiagnosticFormat;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "leadwired", about = "Telephony-driven lead capture engine")]
pub struct Opt {
    /// Path to the sqlite database file backing the Store.
    #[arg(long, env = "LEADWIRE_DB_PATH", default_value = "leadwire.sqlite3")]
    pub db_path: PathBuf,

    /// Address to bind the HTTP server (webhooks, dashboard, metrics) to.
    #[arg(long, env = "LEADWIRE_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Telephony provider account identifier (e.g. Twilio Account SID).
    #[arg(long, env = "LEADWIRE_PROVIDER_ACCOUNT_ID")]
    pub provider_account_id: Option<String>,

    /// Telephony provider auth token, used both to sign outbound API
    /// calls and to verify inbound webhook signatures.
    #[arg(long, env = "LEADWIRE_PROVIDER_AUTH_TOKEN")]
    pub provider_auth_token: Option<String>,

    /// Number the outbound gateway sends from when a tenant's own number
    /// can't be used directly (provider-specific; usually unused since
    /// each tenant owns its inbound number).
    #[arg(long, env = "LEADWIRE_SENDER_IDENTITY")]
    pub sender_identity: Option<String>,

    /// Phone number of the system administrator; alerts considered
    /// "internal" when addressed here bypass footer/quiet-hours checks.
    #[arg(long, env = "LEADWIRE_ADMIN_NUMBER")]
    pub admin_number: Option<String>,

    /// IANA timezone used when a tenant's configured timezone fails to
    /// parse (spec.md §4.2: "never fails").
    #[arg(long, env = "LEADWIRE_DEFAULT_TIMEZONE", default_value = "America/New_York")]
    pub default_timezone: String,

    /// When true, the outbound dispatcher never calls the real gateway;
    /// sends are logged and marked `sent` with a synthetic id. Inbound
    /// processing still runs normally.
    #[arg(long, env = "LEADWIRE_SAFE_MODE")]
    pub safe_mode: bool,

    /// When true, all inbound webhook processing is rejected (a global
    /// kill-switch, independent of any one tenant's `ai_active`).
    #[arg(long, env = "LEADWIRE_KILL_SWITCH")]
    pub kill_switch: bool,

    /// Secret used to sign `/unsubscribe` one-click tokens (HMAC-SHA256).
    #[arg(long, env = "LEADWIRE_UNSUBSCRIBE_SECRET")]
    pub unsubscribe_secret: Option<String>,

    /// Number of concurrent outbound dispatcher workers (spec.md §4.8: N ≥ 2).
    #[arg(long, env = "LEADWIRE_DISPATCHER_WORKERS", default_value_t = 3)]
    pub dispatcher_workers: usize,

    /// Rows claimed per dispatcher cycle.
    #[arg(long, env = "LEADWIRE_CLAIM_BATCH_SIZE", default_value_t = 10)]
    pub claim_batch_size: i64,

    /// How long a `processing` row may sit unfinalized before a worker
    /// considers it stuck and reclaims it (spec.md §4.8, default 5 min).
    #[arg(long, env = "LEADWIRE_STUCK_TIMEOUT_SECS", default_value_t = 300)]
    pub stuck_timeout_secs: i64,

    /// Size of the bounded async job pool (C13: transcription, sheet
    /// export hand-off).
    #[arg(long, env = "LEADWIRE_JOB_POOL_WORKERS", default_value_t = 2)]
    pub job_pool_workers: usize,
    #[arg(long, env = "LEADWIRE_JOB_POOL_CAPACITY", default_value_t = 256)]
    pub job_pool_capacity: usize,

    /// Bound on the deferred-replay queue (spec.md §7) that backs webhook
    /// processing when the idempotency guard can't reach the store.
    #[arg(long, env = "LEADWIRE_REPLAY_QUEUE_CAPACITY", default_value_t = 512)]
    pub replay_queue_capacity: usize,

    /// Directory to write diagnostic logs into; stderr if omitted.
    #[arg(long, env = "LEADWIRE_DIAG_LOG_DIR")]
    pub diag_log_dir: Option<PathBuf>,

    #[arg(long, env = "LEADWIRE_DIAG_FORMAT", default_value = "full")]
    pub diag_format: DiagnosticFormat,
}

impl Opt {
    /// Fail fast at startup if required configuration is missing, unless
    /// safe-mode makes the telephony credentials moot (spec.md §7: "config
    /// missing required telephony credentials while safe-mode is off" is
    /// a fatal, process-exit-worthy condition).
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.safe_mode
            && (self.provider_account_id.is_none() || self.provider_auth_token.is_none())
        {
            anyhow::bail!(
                "telephony credentials (LEADWIRE_PROVIDER_ACCOUNT_ID / \
                 LEADWIRE_PROVIDER_AUTH_TOKEN) are required unless \
                 --safe-mode is set"
            );
        }
        if self.unsubscribe_secret.is_none() {
            anyhow::bail!("LEADWIRE_UNSUBSCRIBE_SECRET is required");
        }
        if self.dispatcher_workers < 2 {
            anyhow::bail!("--dispatcher-workers must be >= 2 (spec.md §4.8)");
        }
        Ok(())
    }
}
