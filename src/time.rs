use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, SubsecRound, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const GAP_SEARCH_MINUTES: i64 = 180;

/// Wall-clock hour and minute with no date or zone attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
}

impl ClockTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self { hour, minute })
    }

    pub fn minutes_of_day(self) -> u32 {
        self.hour * 60 + self.minute
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// All hour/minute decisions go through one fixed civil timezone, independent of the host zone.
#[derive(Debug, Clone, Copy)]
pub struct CivilClock {
    tz: Tz,
}

impl CivilClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn parse(name: &str) -> Result<Self, String> {
        let trimmed = name.trim();
        trimmed
            .parse::<Tz>()
            .map(Self::new)
            .map_err(|err| format!("invalid timezone `{trimmed}`: {err}"))
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn local(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.tz)
    }

    pub fn clock_time(&self, instant: DateTime<Utc>) -> ClockTime {
        let local = self.local(instant);
        ClockTime {
            hour: local.hour(),
            minute: local.minute(),
        }
    }

    /// Local wall-clock minute containing `instant`, used to recognise repeated ticks.
    pub fn minute_of(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        let local = self.local(instant).naive_local();
        local
            .with_second(0)
            .and_then(|value| value.with_nanosecond(0))
            .unwrap_or(local)
    }

    /// Maps a local wall-clock datetime back to an instant. Ambiguous times (DST fall-back)
    /// resolve to the earlier instant; times inside a DST gap move forward to the first valid
    /// local minute.
    pub fn resolve(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(a, b) => {
                let (a, b) = (a.with_timezone(&Utc), b.with_timezone(&Utc));
                Some(a.min(b))
            }
            LocalResult::None => {
                for step in 1..=GAP_SEARCH_MINUTES {
                    let candidate = naive + Duration::minutes(step);
                    if let Some(dt) = self.tz.from_local_datetime(&candidate).earliest() {
                        return Some(dt.with_timezone(&Utc));
                    }
                }
                None
            }
        }
    }

    /// Formats an instant like `09 Oct 2025, 13:30:45 IST` for log lines.
    pub fn format_log(&self, instant: DateTime<Utc>) -> String {
        self.local(instant)
            .format("%d %b %Y, %H:%M:%S %Z")
            .to_string()
    }
}

pub fn truncate_to_second(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(0)
}
