//! Local-time window during which alerts arrive without sound.

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use vaccibot_core::config::QuietWindow;

use crate::traits::NotifyError;

/// A [`QuietWindow`] pinned to a fixed UTC offset.
///
/// `start` is inclusive and `end` exclusive. A window whose end is earlier
/// than its start wraps past midnight; equal bounds describe an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
}

impl QuietHours {
    pub fn new(window: QuietWindow, utc_offset_hours: i32) -> Result<Self, NotifyError> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            NotifyError::Config(format!("UTC offset {utc_offset_hours}h is out of range"))
        })?;
        Ok(Self {
            start: window.start,
            end: window.end,
            offset,
        })
    }

    /// Whether `now` falls inside the window in local time.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset).time();
        if self.start <= self.end {
            self.start <= local && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn hours(raw: &str, offset: i32) -> QuietHours {
        QuietHours::new(raw.parse().unwrap(), offset).unwrap()
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn same_day_window() {
        let quiet = hours("13:00-15:00", 0);
        assert!(!quiet.contains(utc(12, 59)));
        assert!(quiet.contains(utc(13, 0)));
        assert!(quiet.contains(utc(14, 30)));
        assert!(!quiet.contains(utc(15, 0)));
    }

    #[test]
    fn window_wrapping_midnight() {
        let quiet = hours("23:00-08:00", 0);
        assert!(quiet.contains(utc(23, 30)));
        assert!(quiet.contains(utc(0, 0)));
        assert!(quiet.contains(utc(7, 59)));
        assert!(!quiet.contains(utc(8, 0)));
        assert!(!quiet.contains(utc(12, 0)));
    }

    #[test]
    fn offset_shifts_the_local_clock() {
        // 21:00 UTC is 00:00 at UTC+3.
        let quiet = hours("23:00-08:00", 3);
        assert!(quiet.contains(utc(21, 0)));
        assert!(!quiet.contains(utc(19, 0)));
        assert!(quiet.contains(utc(4, 59)));
        assert!(!quiet.contains(utc(5, 0)));
    }

    #[test]
    fn equal_bounds_are_empty() {
        let quiet = hours("10:00-10:00", 0);
        assert!(!quiet.contains(utc(10, 0)));
        assert!(!quiet.contains(utc(22, 0)));
    }

    #[test]
    fn absurd_offset_is_rejected() {
        let window: QuietWindow = "23:00-08:00".parse().unwrap();
        assert!(matches!(
            QuietHours::new(window, 30),
            Err(NotifyError::Config(_))
        ));
    }
}
