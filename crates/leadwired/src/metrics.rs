//! Process-wide counters, exposed as text at `GET /metrics` via
//! `leadwire_common::metrics_text`. Grounded on `kumo-server-runtime`'s
//! `lazy_static! { static ref X: IntGaugeVec = prometheus::register_...!(...) }`
//! idiom: each static self-registers with the default registry the first
//! time it's touched, so there is no separate registration step to wire
//! into `main`.
use prometheus::{IntCounter, IntCounterVec};

lazy_static::lazy_static! {
    pub static ref OUTBOUND_ENQUEUED: IntCounter = prometheus::register_int_counter!(
        "leadwire_outbound_enqueued_total",
        "Outbound messages accepted into the queue"
    ).unwrap();

    pub static ref OUTBOUND_DEDUPLICATED: IntCounter = prometheus::register_int_counter!(
        "leadwire_outbound_deduplicated_total",
        "Outbound enqueue calls that matched an existing external_id"
    ).unwrap();

    pub static ref OUTBOUND_CLAIMED: IntCounter = prometheus::register_int_counter!(
        "leadwire_outbound_claimed_total",
        "Rows claimed by a dispatcher worker"
    ).unwrap();

    pub static ref OUTBOUND_SENT: IntCounter = prometheus::register_int_counter!(
        "leadwire_outbound_sent_total",
        "Outbound messages successfully handed to the gateway"
    ).unwrap();

    pub static ref OUTBOUND_RETRIED: IntCounter = prometheus::register_int_counter!(
        "leadwire_outbound_retried_total",
        "Transient send failures requeued for another attempt"
    ).unwrap();

    pub static ref OUTBOUND_FAILED_PERMANENT: IntCounter = prometheus::register_int_counter!(
        "leadwire_outbound_failed_permanent_total",
        "Outbound messages moved to failed_permanent"
    ).unwrap();

    pub static ref OUTBOUND_REJECTED: IntCounter = prometheus::register_int_counter!(
        "leadwire_outbound_rejected_total",
        "Outbound messages rejected by the safety gate (excluding opt-out)"
    ).unwrap();

    pub static ref ALERTS_BUFFERED: IntCounter = prometheus::register_int_counter!(
        "leadwire_alerts_buffered_total",
        "Alert-buffer bumps recorded"
    ).unwrap();

    pub static ref ALERTS_SWEPT: IntCounter = prometheus::register_int_counter!(
        "leadwire_alerts_swept_total",
        "Coalesced operator alerts sent by the debounce sweep"
    ).unwrap();

    pub static ref WEBHOOK_DEDUP_HITS: IntCounterVec = prometheus::register_int_counter_vec!(
        "leadwire_webhook_dedup_hits_total",
        "Inbound webhook deliveries recognized as duplicates",
        &["kind"]
    ).unwrap();

    pub static ref RATE_LIMIT_REJECTED: IntCounterVec = prometheus::register_int_counter_vec!(
        "leadwire_rate_limit_rejected_total",
        "Requests rejected by the fixed-window rate limiter",
        &["key_kind"]
    ).unwrap();
}
