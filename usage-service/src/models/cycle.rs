//! Billing cycle arithmetic.
//!
//! Paid cycles are anchored to midnight UTC of the subscription start date and
//! advance one calendar month at a time. Boundaries are always computed as
//! `anchor + n months`, so an anchor on the 31st lands on the last day of
//! shorter months without drifting for the rest of the subscription.

use chrono::{DateTime, Duration, Months, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// One metering window. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Midnight UTC of the day containing `ts`.
pub fn cycle_anchor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn months_after(anchor: DateTime<Utc>, months: u32) -> Option<DateTime<Utc>> {
    anchor.checked_add_months(Months::new(months))
}

/// Number of whole months between `anchor` and the start of the cycle containing `now`.
fn elapsed_cycles(anchor: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let mut months = 0u32;
    while let Some(next) = months_after(anchor, months + 1) {
        if next > now {
            break;
        }
        months += 1;
    }
    months
}

/// Start of the monthly cycle containing `now`. If `now` precedes the anchor
/// the anchor itself is returned.
pub fn current_cycle_start(anchor: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    months_after(anchor, elapsed_cycles(anchor, now)).unwrap_or(anchor)
}

/// The monthly cycle containing `now`, with its end clamped to `overall_expiry`.
///
/// The end is one millisecond before the next anchor-relative boundary, not
/// `start + 1 month - 1 day`; the two differ only for anchors on the 29th-31st.
pub fn cycle_containing(
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
    overall_expiry: DateTime<Utc>,
) -> BillingCycle {
    let elapsed = elapsed_cycles(anchor, now);
    let start = months_after(anchor, elapsed).unwrap_or(anchor);
    let natural_end = months_after(anchor, elapsed + 1)
        .map(|next| next - Duration::milliseconds(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    BillingCycle {
        start,
        end: natural_end.min(overall_expiry),
    }
}

/// The UTC calendar day containing `now`.
pub fn day_window(now: DateTime<Utc>) -> BillingCycle {
    let start = cycle_anchor(now);
    BillingCycle {
        start,
        end: start + Duration::days(1) - Duration::milliseconds(1),
    }
}
