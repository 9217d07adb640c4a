use crate::catalog::{EntityCatalog, EntityConfig, ShiftAssignment, Yarn};
use crate::correlate::{overlaps, within, DowntimeRecord, IncidentLog, NeedleChangeRecord};
use crate::domain::Domain;
use crate::ingest::{Reading, State, WindowBuffer};
use crate::publish::{RealtimePublisher, RealtimeUpdate};
use crate::reports::{ReportStore, ShiftReport};
use crate::shift::{ShiftDefinition, ShiftWindow};
use crate::store::{EntityKey, LiveEntry, LiveKey, LiveStateStore, MemoryStateStore, StoreError};
use crate::time::{CivilClock, ClockTime};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub fn ist() -> CivilClock {
    CivilClock::parse("Asia/Kolkata").unwrap()
}

/// Instant for a wall-clock time in India Standard Time.
pub fn at_ist(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    chrono_tz::Asia::Kolkata
        .with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn shift(name: &str, start: (u32, u32), end: (u32, u32)) -> ShiftDefinition {
    ShiftDefinition::new(
        name,
        ClockTime::new(start.0, start.1).unwrap(),
        ClockTime::new(end.0, end.1).unwrap(),
    )
}

pub fn entity_config(
    tenant: &str,
    entity: &str,
    yarn: Option<(&str, f64)>,
    shifts: Vec<ShiftDefinition>,
) -> EntityConfig {
    EntityConfig {
        entity_id: entity.to_string(),
        tenant_id: tenant.to_string(),
        yarn: yarn.map(|(quality, counts_per_roll)| Yarn {
            quality: quality.to_string(),
            counts_per_roll,
        }),
        assignments: shifts
            .into_iter()
            .map(|shift| ShiftAssignment {
                shift,
                worker_id: format!("worker-{entity}"),
                supervisor_id: "supervisor-1".to_string(),
            })
            .collect(),
    }
}

pub fn downtime(
    id: &str,
    entity: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> DowntimeRecord {
    DowntimeRecord {
        id: id.to_string(),
        entity_id: entity.to_string(),
        start_time: start,
        end_time: end,
        reason: None,
    }
}

pub fn needle_change(id: &str, entity: &str, created_at: DateTime<Utc>) -> NeedleChangeRecord {
    NeedleChangeRecord {
        id: id.to_string(),
        entity_id: entity.to_string(),
        created_at,
        notes: None,
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    entities: Mutex<HashMap<(String, Domain), Vec<EntityConfig>>>,
    fail: AtomicBool,
}

impl InMemoryCatalog {
    pub fn add(&self, domain: Domain, config: EntityConfig) {
        self.entities
            .lock()
            .unwrap()
            .entry((config.tenant_id.clone(), domain))
            .or_default()
            .push(config);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityCatalog for InMemoryCatalog {
    async fn load_entities(
        &self,
        tenant: &str,
        domain: Domain,
        entity_ids: &[String],
    ) -> Result<Vec<EntityConfig>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("catalog unavailable");
        }
        let entities = self.entities.lock().unwrap();
        Ok(entities
            .get(&(tenant.to_string(), domain))
            .map(|configs| {
                configs
                    .iter()
                    .filter(|config| entity_ids.contains(&config.entity_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Report store with the same uniqueness rule as the `shift_reports` index.
#[derive(Default)]
pub struct InMemoryReportStore {
    reports: Mutex<Vec<ShiftReport>>,
    fail: AtomicBool,
}

impl InMemoryReportStore {
    pub fn reports(&self) -> Vec<ShiftReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn insert_batch(&self, batch: &[ShiftReport]) -> Result<u64> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("report store unavailable");
        }
        let mut reports = self.reports.lock().unwrap();
        let mut inserted = 0;
        for report in batch {
            let duplicate = reports.iter().any(|existing| {
                existing.entity_id == report.entity_id
                    && existing.start_time == report.start_time
                    && existing.end_time == report.end_time
            });
            if !duplicate {
                reports.push(report.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

#[derive(Default)]
pub struct InMemoryIncidentLog {
    downtime: Mutex<Vec<DowntimeRecord>>,
    needle_changes: Mutex<Vec<NeedleChangeRecord>>,
    fail: AtomicBool,
}

impl InMemoryIncidentLog {
    pub fn add_downtime(&self, record: DowntimeRecord) {
        self.downtime.lock().unwrap().push(record);
    }

    pub fn add_needle_change(&self, record: NeedleChangeRecord) {
        self.needle_changes.lock().unwrap().push(record);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IncidentLog for InMemoryIncidentLog {
    async fn downtime_between(
        &self,
        _tenant: &str,
        entity_id: &str,
        window: &ShiftWindow,
    ) -> Result<Vec<DowntimeRecord>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("incident log unavailable");
        }
        Ok(self
            .downtime
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.entity_id == entity_id)
            .filter(|log| overlaps(log.start_time, log.end_time, window))
            .cloned()
            .collect())
    }

    async fn needle_changes_between(
        &self,
        _tenant: &str,
        entity_id: &str,
        window: &ShiftWindow,
    ) -> Result<Vec<NeedleChangeRecord>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("incident log unavailable");
        }
        Ok(self
            .needle_changes
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.entity_id == entity_id && within(log.created_at, window))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    updates: Mutex<Vec<RealtimeUpdate>>,
}

impl RecordingPublisher {
    pub fn updates(&self) -> Vec<RealtimeUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

impl RealtimePublisher for RecordingPublisher {
    fn publish(&self, update: &RealtimeUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }
}

/// Memory store with injectable faults: failing reads or writes, failing bulk listing, and a
/// clear that lands between the ingest read and its re-check.
#[derive(Default)]
pub struct ScriptedStore {
    pub inner: MemoryStateStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_live_keys: AtomicBool,
    clear_before_recheck: AtomicBool,
}

impl ScriptedStore {
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_live_keys(&self, fail: bool) {
        self.fail_live_keys.store(fail, Ordering::SeqCst);
    }

    pub fn clear_before_next_recheck(&self) {
        self.clear_before_recheck.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LiveStateStore for ScriptedStore {
    async fn get_state(&self, key: &EntityKey) -> Result<Option<State>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read refused".to_string()));
        }
        self.inner.get_state(key).await
    }

    async fn contains(&self, key: &EntityKey) -> Result<bool, StoreError> {
        if self.clear_before_recheck.swap(false, Ordering::SeqCst) {
            self.inner
                .clear_entities(&key.live_key(), std::slice::from_ref(&key.entity))
                .await?;
        }
        self.inner.contains(key).await
    }

    async fn put_state(&self, key: &EntityKey, state: &State) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write refused".to_string()));
        }
        self.inner.put_state(key, state).await
    }

    async fn load_all(&self, live: &LiveKey) -> Result<Vec<LiveEntry>, StoreError> {
        self.inner.load_all(live).await
    }

    async fn live_keys(&self) -> Result<Vec<LiveKey>, StoreError> {
        if self.fail_live_keys.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scan refused".to_string()));
        }
        self.inner.live_keys().await
    }

    async fn append_window(
        &self,
        key: &EntityKey,
        value: i64,
        capacity: usize,
    ) -> Result<WindowBuffer, StoreError> {
        self.inner.append_window(key, value, capacity).await
    }

    async fn push_reading(
        &self,
        key: &EntityKey,
        reading: &Reading,
        max_len: usize,
    ) -> Result<(), StoreError> {
        self.inner.push_reading(key, reading, max_len).await
    }

    async fn recent_readings(&self, key: &EntityKey) -> Result<Vec<Reading>, StoreError> {
        self.inner.recent_readings(key).await
    }

    async fn clear_entities(
        &self,
        live: &LiveKey,
        entity_ids: &[String],
    ) -> Result<(), StoreError> {
        self.inner.clear_entities(live, entity_ids).await
    }
}
