use super::types::{ConnectionState, Reading, State, Stats};
use super::window::{WindowBuffer, WindowSpec};
use crate::domain::{CountMode, DomainProfile};
use chrono::{DateTime, Utc};

/// A delta reading that would push a running total past `i64::MAX`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cumulative `{field}` would overflow: {cumulative} + {delta}")]
pub struct CountOverflow {
    pub field: &'static str,
    pub cumulative: i64,
    pub delta: i64,
}

/// Folds one reading into the previous live state. Pure: storage, window bookkeeping and
/// publishing are the caller's concern.
pub fn aggregate(
    previous: Option<&State>,
    reading: &Reading,
    profile: &DomainProfile,
    connection_timeout_seconds: Option<u64>,
) -> Result<State, CountOverflow> {
    let stats = match previous {
        None => first_stats(reading, profile),
        Some(previous) => next_stats(&previous.stats, reading, profile)?,
    };

    let latest_reading = match profile.count_mode {
        CountMode::Absolute => reading.clone(),
        // Delta sensors are logged with running totals so the log reads like a counter.
        CountMode::Delta => Reading {
            count: stats.cumulative_count,
            input_count: stats.cumulative_input,
            ..reading.clone()
        },
    };

    Ok(State {
        stats,
        connection_state: ConnectionState {
            last_reading_at: reading.received_at,
            latest_reading,
            connection_timeout_seconds,
        },
    })
}

fn first_stats(reading: &Reading, profile: &DomainProfile) -> Stats {
    Stats {
        sample_count: 1,
        rate_sum: reading.rate,
        rate_avg: reading.rate,
        window_start: reading.received_at,
        last_sample_at: reading.received_at,
        idle_millis: profile.has_idle_time.then_some(0),
        cumulative_count: reading.count,
        cumulative_input: profile
            .input_field
            .map(|_| reading.input_count.unwrap_or(0)),
        trailing_rate_per_minute: None,
    }
}

fn next_stats(
    previous: &Stats,
    reading: &Reading,
    profile: &DomainProfile,
) -> Result<Stats, CountOverflow> {
    let sample_count = previous.sample_count + 1;
    let rate_sum = previous.rate_sum + reading.rate;

    let idle_millis = if profile.has_idle_time {
        let accrued = previous.idle_millis.unwrap_or(0);
        if reading.rate == 0.0 {
            let gap = (reading.received_at - previous.last_sample_at)
                .num_milliseconds()
                .max(0);
            Some(accrued + gap)
        } else {
            Some(accrued)
        }
    } else {
        None
    };

    let (cumulative_count, cumulative_input) = match profile.count_mode {
        CountMode::Absolute => (reading.count, None),
        CountMode::Delta => {
            let count =
                accumulate(profile.count_field, previous.cumulative_count, reading.count)?;
            let input = match profile.input_field {
                Some(field) => Some(accumulate(
                    field,
                    previous.cumulative_input.unwrap_or(0),
                    reading.input_count.unwrap_or(0),
                )?),
                None => None,
            };
            (count, input)
        }
    };

    Ok(Stats {
        sample_count,
        rate_sum,
        rate_avg: rate_sum / sample_count as f64,
        window_start: previous.window_start,
        last_sample_at: reading.received_at,
        idle_millis,
        cumulative_count,
        cumulative_input,
        trailing_rate_per_minute: previous.trailing_rate_per_minute,
    })
}

fn accumulate(field: &'static str, cumulative: i64, delta: i64) -> Result<i64, CountOverflow> {
    cumulative.checked_add(delta).ok_or(CountOverflow {
        field,
        cumulative,
        delta,
    })
}

/// Replaces the trailing rate when the buffer yields one; otherwise the carried value stays.
pub fn apply_trailing_rate(stats: &mut Stats, buffer: &WindowBuffer, spec: &WindowSpec) {
    if let Some(rate) = buffer.trailing_rate(spec, stats.cumulative_count) {
        stats.trailing_rate_per_minute = Some(rate);
    }
}

/// A state that existed at read time but vanished before the write was cleared by a shift
/// report; the new window starts at this reading.
pub fn restart_if_cleared(
    stats: &mut Stats,
    had_previous: bool,
    still_present: bool,
    received_at: DateTime<Utc>,
) -> bool {
    if had_previous && !still_present {
        stats.window_start = received_at;
        return true;
    }
    false
}
