//! # Temporal Types
//!
//! UTC-only timestamp type plus the calendar-month window that scopes quota
//! accounting. All timestamps are stored in UTC with second-level precision
//! in serialized form.
//!
//! ## Design Decision
//!
//! Tenants operate across time zones, but quota windows and retry schedules
//! must be unambiguous: a month boundary is the UTC month boundary, and a
//! retry becomes due at a UTC instant. Local time conversion is a
//! presentation concern handled outside this core.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A UTC timestamp.
///
/// Serializes through chrono's RFC 3339 form. Ordered, so retry eligibility
/// checks (`next_attempt_at <= now`) read as plain comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create a timestamp from a `chrono::DateTime<Utc>`.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Access the underlying `chrono::DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// The timestamp shifted forward by `delta`, clamping at the far end of
    /// the representable range instead of overflowing.
    pub fn saturating_add(&self, delta: Duration) -> Self {
        Self(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// The timestamp shifted backward by `delta`, clamping at the near end
    /// of the representable range instead of overflowing.
    pub fn saturating_sub(&self, delta: Duration) -> Self {
        Self(self.0.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    /// Signed duration from `earlier` to `self`.
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        self.0.signed_duration_since(earlier.0)
    }

    /// Return the timestamp as an ISO 8601 string with Z suffix, truncated
    /// to seconds.
    pub fn to_canonical_string(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

/// One calendar month in UTC — the scope of issuance and transfer quota.
///
/// Ordered chronologically (field order: year, then month), so windows sort
/// correctly across year boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthWindow {
    year: i32,
    month: u32,
}

impl MonthWindow {
    /// The window containing the current UTC instant.
    pub fn current() -> Self {
        Self::of(&Timestamp::now())
    }

    /// The window containing the given timestamp.
    pub fn of(ts: &Timestamp) -> Self {
        let dt = ts.as_datetime();
        Self {
            year: dt.year(),
            month: dt.month(),
        }
    }

    /// The calendar year.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// The calendar month, 1-12.
    pub fn month(&self) -> u32 {
        self.month
    }

    /// The window immediately after this one.
    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// The first instant of this window: UTC midnight on the 1st.
    pub fn start(&self) -> Timestamp {
        let dt = NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Timestamp::from_datetime(dt)
    }

    /// The window immediately before this one.
    pub fn pred(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }
}

impl std::fmt::Display for MonthWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
