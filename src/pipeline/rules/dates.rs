//! Calendar-date comparisons for calibration validity.
//!
//! Both helpers compare calendar dates only (UTC, time-of-day stripped), so
//! they are invariant to the time component of either timestamp. Over any
//! (expiry, measured) pair exactly one of expired / expiring-today /
//! still-valid holds.

use chrono::{DateTime, Utc};

/// Certificate expired strictly before the measurement day.
pub fn is_expired(expiry: DateTime<Utc>, measured: DateTime<Utc>) -> bool {
    expiry.date_naive() < measured.date_naive()
}

/// Certificate expires on the measurement day itself.
pub fn is_expiring_today(expiry: DateTime<Utc>, measured: DateTime<Utc>) -> bool {
    expiry.date_naive() == measured.date_naive()
}
