use crate::time::{CivilClock, ClockTime};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDefinition {
    pub name: String,
    pub start: ClockTime,
    pub end: ClockTime,
}

/// Concrete `[start, end)` interval of one shift occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ShiftDefinition {
    pub fn new(name: impl Into<String>, start: ClockTime, end: ClockTime) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    pub fn is_overnight(&self) -> bool {
        self.end.minutes_of_day() < self.start.minutes_of_day()
    }

    pub fn is_member(&self, now: ClockTime) -> bool {
        let now = now.minutes_of_day();
        let start = self.start.minutes_of_day();
        let end = self.end.minutes_of_day();
        if self.is_overnight() {
            now >= start || now <= end
        } else {
            start <= now && now <= end
        }
    }

    /// True only during the exact wall-clock minute the shift ends. There is no catch-up: a
    /// poller that skips this minute never sees the crossing.
    pub fn is_boundary(&self, now: ClockTime) -> bool {
        now.hour == self.end.hour && now.minute == self.end.minute
    }

    /// Occurrence of this shift that contains, or most recently started before, `now`.
    ///
    /// For overnight shifts a `now` at or before the end time belongs to the occurrence that
    /// started on the previous civil day.
    pub fn current_window(&self, clock: &CivilClock, now: DateTime<Utc>) -> Option<ShiftWindow> {
        let local_now = clock.local(now);
        let today = local_now.date_naive();
        let now_minutes = clock.clock_time(now).minutes_of_day();

        let (start_date, end_date) = if self.is_overnight() {
            if now_minutes <= self.end.minutes_of_day() {
                (today - Duration::days(1), today)
            } else {
                (today, today + Duration::days(1))
            }
        } else {
            (today, today)
        };

        let start = clock.resolve(start_date.and_hms_opt(self.start.hour, self.start.minute, 0)?)?;
        let end = clock.resolve(end_date.and_hms_opt(self.end.hour, self.end.minute, 0)?)?;
        Some(ShiftWindow { start, end })
    }
}

pub fn current_shift<'a, I>(shifts: I, now: ClockTime) -> Option<&'a ShiftDefinition>
where
    I: IntoIterator<Item = &'a ShiftDefinition>,
{
    shifts.into_iter().find(|shift| shift.is_member(now))
}
