//! Day-boundary streak arithmetic.
//!
//! A streak counts consecutive calendar days on which a daily task was
//! completed. The state only moves when a completion is recorded; reading
//! it on a later day does not decay it (see [`StreakState::effective`]).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub current_streak: u32,
    pub last_completion_date: Option<NaiveDate>,
}

/// Outcome of recording a completion day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakChange {
    /// Today was already counted.
    Unchanged,
    /// The previous completion was yesterday.
    Extended { streak: u32 },
    /// First completion, or a gap of one or more days.
    Restarted,
}

impl StreakState {
    /// Record a daily-task completion on `today`.
    pub fn record_completion(&mut self, today: NaiveDate) -> StreakChange {
        match self.last_completion_date {
            Some(last) if last == Calendar::previous_day(today) => {
                self.current_streak = self.current_streak.saturating_add(1);
                self.last_completion_date = Some(today);
                StreakChange::Extended {
                    streak: self.current_streak,
                }
            }
            Some(last) if last == today => StreakChange::Unchanged,
            _ => {
                self.current_streak = 1;
                self.last_completion_date = Some(today);
                StreakChange::Restarted
            }
        }
    }

    /// The streak as a user should see it on `today`: zero once a whole day
    /// has passed without a completion.
    pub fn effective(&self, today: NaiveDate) -> u32 {
        match self.last_completion_date {
            Some(last) if last == today || last == Calendar::previous_day(today) => {
                self.current_streak
            }
            _ => 0,
        }
    }
}
