//! C2: wall-clock and tenant-local time classification.
use crate::store::types::TenantRow;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayClassification {
    Daytime,
    Evening,
    Sleep,
}

#[derive(Clone)]
pub struct Clock {
    default_tz: Tz,
}

impl Clock {
    pub fn new(default_timezone: &str) -> Self {
        let default_tz = default_timezone.parse().unwrap_or(chrono_tz::America::New_York);
        Self { default_tz }
    }

    fn tenant_tz(&self, tenant: &TenantRow) -> Tz {
        tenant.timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(
                tenant = %tenant.id,
                tz = %tenant.timezone,
                "unrecognized timezone, falling back to configured default"
            );
            self.default_tz
        })
    }

    pub fn local_hour(&self, tenant: &TenantRow, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.tenant_tz(tenant)).hour()
    }

    /// `daytime` iff `day_start <= h < day_end`; `evening` iff
    /// `day_end <= h < evening_end`; else `sleep` (spec.md §4.2).
    pub fn classify(&self, tenant: &TenantRow, now: DateTime<Utc>) -> DayClassification {
        let h = self.local_hour(tenant, now) as i64;
        if h >= tenant.day_start && h < tenant.day_end {
            DayClassification::Daytime
        } else if h >= tenant.day_end && h < tenant.evening_end {
            DayClassification::Evening
        } else {
            DayClassification::Sleep
        }
    }

    /// Quiet-hours window for outbound sends (spec.md §4.7): defaults to
    /// the tenant's own daytime+evening span (`day_start`..`evening_end`),
    /// which is 08:00-21:00 for a tenant left at the seed defaults,
    /// matching spec.md's literal "default 08:00-21:00... unless
    /// overridden by tenant window".
    pub fn within_quiet_hours(&self, tenant: &TenantRow, now: DateTime<Utc>) -> bool {
        let h = self.local_hour(tenant, now) as i64;
        h >= tenant.day_start && h < tenant.evening_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tenant() -> TenantRow {
        TenantRow {
            id: "t1".into(),
            inbound_number: "+15005550000".into(),
            operator_number: "+15005550123".into(),
            display_name: "Acme".into(),
            timezone: "America/Los_Angeles".into(),
            day_start: 7,
            day_end: 17,
            evening_end: 19,
            emergency_mode: false,
            ai_active: true,
            average_job_value: 250.0,
            review_link: None,
            sheet_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn classifies_daytime() {
        let clock = Clock::new("America/New_York");
        // 09:30 Pacific on a summer day is 16:30 UTC (PDT, UTC-7).
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 16, 30, 0).unwrap();
        assert_eq!(clock.classify(&tenant(), now), DayClassification::Daytime);
    }

    #[test]
    fn classifies_sleep_after_evening_end() {
        let clock = Clock::new("America/New_York");
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 3, 0, 0).unwrap();
        assert_eq!(clock.classify(&tenant(), now), DayClassification::Sleep);
    }

    #[test]
    fn unknown_timezone_falls_back_without_failing() {
        let mut t = tenant();
        t.timezone = "Not/ARealZone".into();
        let clock = Clock::new("America/New_York");
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap();
        // Should not panic; falls back to the configured default tz.
        let _ = clock.classify(&t, now);
    }
}
