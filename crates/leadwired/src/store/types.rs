//! Explicit record types per table (spec.md §9: "duck-typed DB row
//! mappings" → explicit record types with named fields), plus the
//! enumerated sum types spec.md §9 calls for in place of string-typed
//! status branching.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadStatus {
    New,
    Contacted,
    Replied,
    Booked,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Replied => "replied",
            LeadStatus::Booked => "booked",
            LeadStatus::Lost => "lost",
        }
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "new" => LeadStatus::New,
            "contacted" => LeadStatus::Contacted,
            "replied" => LeadStatus::Replied,
            "booked" => LeadStatus::Booked,
            "lost" => LeadStatus::Lost,
            other => anyhow::bail!("unknown lead status {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Emergency,
    Service,
    Inquiry,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Emergency => "emergency",
            Intent::Service => "service",
            Intent::Inquiry => "inquiry",
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "emergency" => Intent::Emergency,
            "service" => Intent::Service,
            "inquiry" => Intent::Inquiry,
            other => anyhow::bail!("unknown intent {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentKind {
    Implied,
    Express,
}

impl ConsentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentKind::Implied => "implied",
            ConsentKind::Express => "express",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentSource {
    InboundCall,
    InboundSms,
    WebForm,
    Manual,
}

impl ConsentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentSource::InboundCall => "inbound_call",
            ConsentSource::InboundSms => "inbound_sms",
            ConsentSource::WebForm => "web_form",
            ConsentSource::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundStatus {
    Pending,
    Processing,
    Sent,
    Delivered,
    Failed,
    FailedOptOut,
    FailedSafety,
    FailedPermanent,
    Cancelled,
}

impl OutboundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundStatus::Pending => "pending",
            OutboundStatus::Processing => "processing",
            OutboundStatus::Sent => "sent",
            OutboundStatus::Delivered => "delivered",
            OutboundStatus::Failed => "failed",
            OutboundStatus::FailedOptOut => "failed_optout",
            OutboundStatus::FailedSafety => "failed_safety",
            OutboundStatus::FailedPermanent => "failed_permanent",
            OutboundStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for OutboundStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => OutboundStatus::Pending,
            "processing" => OutboundStatus::Processing,
            "sent" => OutboundStatus::Sent,
            "delivered" => OutboundStatus::Delivered,
            "failed" => OutboundStatus::Failed,
            "failed_optout" => OutboundStatus::FailedOptOut,
            "failed_safety" => OutboundStatus::FailedSafety,
            "failed_permanent" => OutboundStatus::FailedPermanent,
            "cancelled" => OutboundStatus::Cancelled,
            other => anyhow::bail!("unknown outbound status {other}"),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: String,
    pub inbound_number: String,
    pub operator_number: String,
    pub display_name: String,
    pub timezone: String,
    pub day_start: i64,
    pub day_end: i64,
    pub evening_end: i64,
    pub emergency_mode: bool,
    pub ai_active: bool,
    pub average_job_value: f64,
    pub review_link: Option<String>,
    pub sheet_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LeadRow {
    pub id: String,
    pub tenant_id: String,
    pub phone: String,
    pub status: String,
    pub intent: Option<String>,
    pub opt_out: bool,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_contact_at: Option<DateTime<Utc>>,
}

impl LeadRow {
    pub fn status(&self) -> LeadStatus {
        self.status.parse().unwrap_or(LeadStatus::New)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ConsentRecordRow {
    pub id: String,
    pub lead_id: Option<String>,
    pub tenant_id: String,
    pub phone: String,
    pub kind: String,
    pub source: String,
    pub consented_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OutboundRow {
    pub id: String,
    pub tenant_id: String,
    pub to_number: String,
    pub body: String,
    pub external_id: Option<String>,
    pub status: String,
    pub attempts: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub bypass_quiet_hours: bool,
    pub bypass_opt_out: bool,
}

impl OutboundRow {
    pub fn status(&self) -> OutboundStatus {
        self.status.parse().unwrap_or(OutboundStatus::Pending)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AlertBufferRow {
    pub tenant_id: String,
    pub customer_phone: String,
    pub operator_phone: String,
    pub coalesced_text: String,
    pub count: i64,
    pub send_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// New outbound draft accepted by the queue's `enqueue` entry point
/// (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct NewOutbound {
    pub tenant_id: String,
    pub to_number: String,
    pub body: String,
    pub external_id: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Carries the emergency-acknowledgment quiet-hours exemption
    /// (spec.md §4.7) from enqueue time through to claim/dispatch time,
    /// since `OutboundDraft::is_emergency_response` doesn't otherwise
    /// survive the round trip through the `outbound_messages` table.
    pub bypass_quiet_hours: bool,
    /// Exempts a compliance-mandatory reply (the STOP confirmation) from
    /// the opt-out check, both at enqueue time and at claim/dispatch
    /// time (spec.md §8 scenario 4: the confirmation must still go out
    /// to the number that was just opted out).
    pub bypass_opt_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(String),
    Deduplicated(String),
    Rejected { reason: String },
}

/// Outcome of dispatching a claimed row to the gateway (spec.md §9:
/// `DispatchOutcome`).
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Sent { provider_message_id: String },
    Transient { reason: String },
    Permanent { reason: String },
    Rejected { reason: String },
}

/// Inbound call disposition reported by a dial-status callback
/// (spec.md §9: `CallDisposition`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDisposition {
    Answered,
    NoAnswer,
    Busy,
    Failed,
    Canceled,
    MachineStart,
    MachineEnd,
}

impl CallDisposition {
    pub fn from_provider_status(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "completed" | "answered" | "in-progress" => Some(CallDisposition::Answered),
            "no-answer" => Some(CallDisposition::NoAnswer),
            "busy" => Some(CallDisposition::Busy),
            "failed" => Some(CallDisposition::Failed),
            "canceled" | "cancelled" => Some(CallDisposition::Canceled),
            s if s.starts_with("machine_start") => Some(CallDisposition::MachineStart),
            s if s.starts_with("machine_end") => Some(CallDisposition::MachineEnd),
            _ => None,
        }
    }

    /// True for the dispositions that drive the "missed call" branch
    /// (spec.md §4.10: busy, no-answer, failed, canceled, machine_start,
    /// machine_end_*).
    pub fn is_missed(&self) -> bool {
        !matches!(self, CallDisposition::Answered)
    }
}

