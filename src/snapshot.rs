use crate::correlate::{DowntimeRecord, LogCorrelator};
use crate::ingest::{Reading, State};
use crate::shift::{current_shift, ShiftDefinition};
use crate::store::{EntityKey, LiveStateStore};
use crate::time::CivilClock;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything an operator screen shows for one entity right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub state: Option<State>,
    pub readings: Vec<Reading>,
    pub current_shift: Option<ShiftDefinition>,
    pub shift_downtime: Vec<DowntimeRecord>,
}

pub async fn load_entity_snapshot(
    store: &dyn LiveStateStore,
    correlator: &LogCorrelator,
    clock: &CivilClock,
    key: &EntityKey,
    shifts: &[ShiftDefinition],
    now: DateTime<Utc>,
) -> Result<EntitySnapshot> {
    let state = store
        .get_state(key)
        .await
        .with_context(|| format!("failed to read live state for {key}"))?;
    let readings = store
        .recent_readings(key)
        .await
        .with_context(|| format!("failed to read reading log for {key}"))?;

    let shift = current_shift(shifts, clock.clock_time(now)).cloned();
    let shift_downtime = match &shift {
        Some(shift) if key.domain.profile().has_incident_logs => {
            correlator
                .for_current_shift(&key.tenant, &key.entity, shift, clock, now)
                .await
        }
        _ => Vec::new(),
    };

    Ok(EntitySnapshot {
        state,
        readings,
        current_shift: shift,
        shift_downtime,
    })
}
