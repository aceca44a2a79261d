//! The error kinds enumerated in spec.md §7, as a single `thiserror`-derived
//! enum. Grounded on the teacher's `throttle::Error` (a small closed set of
//! variants with `#[from]` conversions at the boundary rather than a
//! generic `anyhow::Error` everywhere) and `dkim`'s result shape.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeadwireError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited")]
    RateLimited,

    #[error("transient store error: {0}")]
    TransientStore(#[source] sqlx::Error),

    #[error("permanent store error: {0}")]
    PermanentStore(#[source] sqlx::Error),

    #[error("transient gateway error: {0}")]
    TransientGateway(String),

    #[error("permanent gateway error: {0}")]
    PermanentGateway(String),

    #[error("consent denied")]
    ConsentDenied,

    #[error("deferred for quiet hours")]
    QuietHoursDeferred,

    #[error("duplicate event")]
    Duplicate,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for LeadwireError {
    fn from(err: anyhow::Error) -> Self {
        LeadwireError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for LeadwireError {
    /// Classify a raw `sqlx::Error` into transient vs. permanent per
    /// spec.md §7. Pool timeouts, connection loss and busy/locked errors
    /// are transient (caller should retry / degrade); a broken row
    /// decode or a schema-shaped failure is permanent.
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match &err {
            E::PoolTimedOut | E::PoolClosed | E::Io(_) => LeadwireError::TransientStore(err),
            E::Database(db) if is_busy_or_locked(db.message()) => {
                LeadwireError::TransientStore(err)
            }
            _ => LeadwireError::PermanentStore(err),
        }
    }
}

fn is_busy_or_locked(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("busy") || m.contains("locked")
}

pub type Result<T> = std::result::Result<T, LeadwireError>;
