//! Domain calendar: when a season's data becomes knowable.
//!
//! Every validity window in the store is derived from this one place so the
//! materialization engine and the integrity validator cannot disagree about
//! what "knowable before the season" means.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Non-leap probe year used to validate month/day pairs once at construction.
// Rejecting Feb 29 up front keeps every later date build infallible.
const PROBE_YEAR: i32 = 2001;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("invalid calendar month/day: {month:02}-{day:02}")]
    InvalidMonthDay { month: u32, day: u32 },
}

/// A recurring month/day anchor applied to a season year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> Result<Self, CalendarError> {
        if NaiveDate::from_ymd_opt(PROBE_YEAR, month, day).is_none() {
            return Err(CalendarError::InvalidMonthDay { month, day });
        }
        Ok(Self { month, day })
    }

    fn in_year(self, year: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
            .expect("month/day validated at construction")
    }
}

/// Calendar semantics for one league. Supplied as configuration, not
/// hardcoded at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonCalendar {
    /// Season Y's outcomes are public on this month/day of year Y+1.
    pub outcomes_public: MonthDay,
    /// Roster and contract state for season Y is settled on this month/day
    /// of year Y itself (start of the league year).
    pub roster_window: MonthDay,
    /// Competitive play for season Y begins on this month/day of year Y.
    pub season_start: MonthDay,
}

impl Default for SeasonCalendar {
    fn default() -> Self {
        Self {
            outcomes_public: MonthDay { month: 2, day: 15 },
            roster_window: MonthDay { month: 3, day: 15 },
            season_start: MonthDay { month: 9, day: 1 },
        }
    }
}

impl SeasonCalendar {
    pub fn new(
        outcomes_public: MonthDay,
        roster_window: MonthDay,
        season_start: MonthDay,
    ) -> Self {
        Self {
            outcomes_public,
            roster_window,
            season_start,
        }
    }

    /// First instant at which period `period`'s outcomes are public.
    pub fn knowledge_date(&self, period: i32) -> NaiveDate {
        self.outcomes_public.in_year(period + 1)
    }

    /// Natural start of period `period`'s competitive window. Any lagged or
    /// interaction value targeting `period` must be knowable strictly before
    /// this instant.
    pub fn period_start(&self, period: i32) -> NaiveDate {
        self.season_start.in_year(period)
    }

    /// Start of the roster-finalization window for period `period`.
    pub fn roster_window_start(&self, period: i32) -> NaiveDate {
        self.roster_window.in_year(period)
    }
}
