use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::settings::Calendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum Season {
    #[strum(serialize = "summer")]
    Summer,
    #[strum(serialize = "winter")]
    Winter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum TimeOfDay {
    #[strum(serialize = "day")]
    Day,
    #[strum(serialize = "night")]
    Night,
}

/// Season and time of day for a single control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeContext {
    pub now: NaiveDateTime,
    pub season: Season,
    pub time_of_day: TimeOfDay,
}

impl TimeContext {
    /// Classify a wall clock timestamp. Summer covers the configured months
    /// inclusively; night is strictly after the night hour or before the
    /// morning hour.
    pub fn classify(now: NaiveDateTime, calendar: &Calendar) -> Self {
        let month = now.month();
        let season = if month < calendar.summer_start_month || month > calendar.summer_end_month {
            Season::Winter
        } else {
            Season::Summer
        };

        let hour = now.hour();
        let time_of_day = if hour > calendar.night_hour || hour < calendar.morning_hour {
            TimeOfDay::Night
        } else {
            TimeOfDay::Day
        };

        Self {
            now,
            season,
            time_of_day,
        }
    }

    pub fn is_night(&self) -> bool {
        self.time_of_day == TimeOfDay::Night
    }
}

/// Source of the current wall clock time.
pub trait Clock: Send {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}
