use crate::shift::{ShiftDefinition, ShiftWindow};
use crate::time::CivilClock;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DowntimeRecord {
    pub id: String,
    pub entity_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NeedleChangeRecord {
    pub id: String,
    pub entity_id: String,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelatedLogs {
    pub downtime: Vec<DowntimeRecord>,
    pub needle_changes: Vec<NeedleChangeRecord>,
}

impl CorrelatedLogs {
    pub fn downtime_ids(&self) -> Vec<String> {
        self.downtime.iter().map(|log| log.id.clone()).collect()
    }

    pub fn needle_change_ids(&self) -> Vec<String> {
        self.needle_changes.iter().map(|log| log.id.clone()).collect()
    }
}

/// An interval record belongs to a window if it starts in it, ends in it, spans it, or sits
/// inside it.
pub fn overlaps(start: DateTime<Utc>, end: DateTime<Utc>, window: &ShiftWindow) -> bool {
    let starts_during = window.start <= start && start < window.end;
    let ends_during = window.start < end && end <= window.end;
    let spans = start <= window.start && end >= window.end;
    let inside = start >= window.start && end <= window.end;
    starts_during || ends_during || spans || inside
}

/// Point records use the same half-open `[start, end)` window as [`overlaps`].
pub fn within(at: DateTime<Utc>, window: &ShiftWindow) -> bool {
    window.start <= at && at < window.end
}

/// Source of incident records. Implementations return records that satisfy [`overlaps`] /
/// [`within`] for the window; ordering is the correlator's job.
#[async_trait]
pub trait IncidentLog: Send + Sync {
    async fn downtime_between(
        &self,
        tenant: &str,
        entity_id: &str,
        window: &ShiftWindow,
    ) -> Result<Vec<DowntimeRecord>>;

    async fn needle_changes_between(
        &self,
        tenant: &str,
        entity_id: &str,
        window: &ShiftWindow,
    ) -> Result<Vec<NeedleChangeRecord>>;
}

#[derive(Clone)]
pub struct LogCorrelator {
    log: Arc<dyn IncidentLog>,
}

impl LogCorrelator {
    pub fn new(log: Arc<dyn IncidentLog>) -> Self {
        Self { log }
    }

    /// Report mode: every incident touching `window`, oldest first. Query failures degrade to
    /// empty lists.
    pub async fn for_window(
        &self,
        tenant: &str,
        entity_id: &str,
        window: &ShiftWindow,
    ) -> CorrelatedLogs {
        let (downtime, needle_changes) = future::join(
            self.log.downtime_between(tenant, entity_id, window),
            self.log.needle_changes_between(tenant, entity_id, window),
        )
        .await;

        let mut downtime = match downtime {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(tenant, entity = entity_id, error = %err, "downtime lookup failed");
                Vec::new()
            }
        };
        downtime.sort_by_key(|log| log.start_time);

        let mut needle_changes = match needle_changes {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(tenant, entity = entity_id, error = %err, "needle change lookup failed");
                Vec::new()
            }
        };
        needle_changes.sort_by_key(|log| log.created_at);

        CorrelatedLogs {
            downtime,
            needle_changes,
        }
    }

    /// Display mode: downtime for the occurrence of `shift` around `now`, most recent first.
    pub async fn for_current_shift(
        &self,
        tenant: &str,
        entity_id: &str,
        shift: &ShiftDefinition,
        clock: &CivilClock,
        now: DateTime<Utc>,
    ) -> Vec<DowntimeRecord> {
        let Some(window) = shift.current_window(clock, now) else {
            return Vec::new();
        };
        let mut logs = self.for_window(tenant, entity_id, &window).await.downtime;
        logs.reverse();
        logs
    }
}

#[derive(Clone)]
pub struct PgIncidentLog {
    pool: PgPool,
}

impl PgIncidentLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IncidentLog for PgIncidentLog {
    async fn downtime_between(
        &self,
        tenant: &str,
        entity_id: &str,
        window: &ShiftWindow,
    ) -> Result<Vec<DowntimeRecord>> {
        let rows = sqlx::query_as::<_, DowntimeRecord>(
            r#"
            SELECT id, entity_id, start_time, end_time, reason
            FROM downtime_logs
            WHERE tenant_id = $1
              AND entity_id = $2
              AND (
                   (start_time >= $3 AND start_time < $4)
                OR (end_time > $3 AND end_time <= $4)
                OR (start_time <= $3 AND end_time >= $4)
                OR (start_time >= $3 AND end_time <= $4)
              )
            ORDER BY start_time
            "#,
        )
        .bind(tenant)
        .bind(entity_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn needle_changes_between(
        &self,
        tenant: &str,
        entity_id: &str,
        window: &ShiftWindow,
    ) -> Result<Vec<NeedleChangeRecord>> {
        let rows = sqlx::query_as::<_, NeedleChangeRecord>(
            r#"
            SELECT id, entity_id, created_at, notes
            FROM needle_change_logs
            WHERE tenant_id = $1
              AND entity_id = $2
              AND created_at >= $3
              AND created_at < $4
            ORDER BY created_at
            "#,
        )
        .bind(tenant)
        .bind(entity_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{downtime, needle_change, InMemoryIncidentLog};
    use crate::time::ClockTime;
    use chrono::TimeZone;

    fn utc(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 9, hour, minute, 0).unwrap()
    }

    fn shift_window() -> ShiftWindow {
        ShiftWindow {
            start: utc(8, 0),
            end: utc(14, 0),
        }
    }

    #[test]
    fn overlap_covers_all_four_relations() {
        let window = shift_window();
        assert!(overlaps(utc(13, 0), utc(13, 10), &window)); // inside
        assert!(overlaps(utc(7, 0), utc(20, 0), &window)); // spans
        assert!(overlaps(utc(7, 0), utc(9, 0), &window)); // ends during
        assert!(overlaps(utc(13, 30), utc(15, 0), &window)); // starts during
        assert!(!overlaps(utc(6, 0), utc(7, 59), &window));
        assert!(!overlaps(utc(14, 0), utc(15, 0), &window));
        assert!(!overlaps(utc(6, 0), utc(8, 0), &window));
    }

    #[test]
    fn point_records_use_the_same_half_open_window() {
        let window = shift_window();
        assert!(within(utc(8, 0), &window));
        assert!(within(utc(13, 59), &window));
        assert!(!within(utc(14, 0), &window));
        assert!(!within(utc(7, 59), &window));
    }

    #[tokio::test]
    async fn needle_change_at_the_window_end_belongs_to_the_next_shift() {
        let log = InMemoryIncidentLog::default();
        log.add_needle_change(needle_change("at-start", "m1", utc(8, 0)));
        log.add_needle_change(needle_change("mid", "m1", utc(11, 0)));
        log.add_needle_change(needle_change("at-end", "m1", utc(14, 0)));

        let correlator = LogCorrelator::new(Arc::new(log));
        let logs = correlator.for_window("org", "m1", &shift_window()).await;
        assert_eq!(logs.needle_change_ids(), vec!["at-start", "mid"]);
    }

    #[tokio::test]
    async fn report_mode_returns_matching_records_oldest_first() {
        let log = InMemoryIncidentLog::default();
        log.add_downtime(downtime("late", "m1", utc(13, 0), utc(13, 10)));
        log.add_downtime(downtime("long", "m1", utc(7, 0), utc(20, 0)));
        log.add_downtime(downtime("before", "m1", utc(5, 0), utc(6, 0)));
        log.add_downtime(downtime("other", "m2", utc(9, 0), utc(10, 0)));

        let correlator = LogCorrelator::new(Arc::new(log));
        let logs = correlator.for_window("org", "m1", &shift_window()).await;
        assert_eq!(logs.downtime_ids(), vec!["long", "late"]);
    }

    #[tokio::test]
    async fn lookup_failure_degrades_to_empty_lists() {
        let log = InMemoryIncidentLog::default();
        log.add_downtime(downtime("late", "m1", utc(13, 0), utc(13, 10)));
        log.fail_queries(true);

        let correlator = LogCorrelator::new(Arc::new(log));
        let logs = correlator.for_window("org", "m1", &shift_window()).await;
        assert!(logs.downtime.is_empty());
        assert!(logs.needle_changes.is_empty());
    }

    #[tokio::test]
    async fn display_mode_uses_yesterdays_start_for_overnight_shift() {
        let clock = CivilClock::parse("Asia/Kolkata").unwrap();
        let shift = ShiftDefinition::new(
            "night",
            ClockTime::new(22, 0).unwrap(),
            ClockTime::new(6, 0).unwrap(),
        );
        // 22:00 IST on 8 Oct is 16:30 UTC; now is 02:00 IST on 9 Oct.
        let log = InMemoryIncidentLog::default();
        log.add_downtime(downtime(
            "early",
            "m1",
            Utc.with_ymd_and_hms(2025, 10, 8, 17, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 8, 17, 30, 0).unwrap(),
        ));
        log.add_downtime(downtime(
            "recent",
            "m1",
            Utc.with_ymd_and_hms(2025, 10, 8, 19, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 8, 19, 45, 0).unwrap(),
        ));
        log.add_downtime(downtime(
            "previous-night",
            "m1",
            Utc.with_ymd_and_hms(2025, 10, 7, 17, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 10, 7, 18, 0, 0).unwrap(),
        ));

        let correlator = LogCorrelator::new(Arc::new(log));
        let now = Utc.with_ymd_and_hms(2025, 10, 8, 20, 30, 0).unwrap();
        let logs = correlator
            .for_current_shift("org", "m1", &shift, &clock, now)
            .await;
        let ids: Vec<&str> = logs.iter().map(|log| log.id.as_str()).collect();
        assert_eq!(ids, vec!["recent", "early"]);
    }
}
