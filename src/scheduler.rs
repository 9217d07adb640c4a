
use crate::catalog::{EntityCatalog, EntityConfig, ShiftAssignment};
use crate::correlate::{CorrelatedLogs, LogCorrelator};
use crate::domain::RollupKind;
use crate::ingest::State;
use crate::reports::{ReportStore, Rollup, ShiftReport};
use crate::shift::ShiftWindow;
use crate::store::{LiveKey, LiveStateStore};
use crate::time::{truncate_to_second, CivilClock};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub rolls_fallback_counts: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub live_keys: usize,
    pub entities: usize,
    pub entities_skipped: usize,
    pub reports_queued: usize,
    pub reports_inserted: u64,
    pub entities_cleared: usize,
}

/// Turns live states into shift reports when their shift ends.
pub struct ReportScheduler {
    store: Arc<dyn LiveStateStore>,
    catalog: Arc<dyn EntityCatalog>,
    correlator: LogCorrelator,
    reports: Arc<dyn ReportStore>,
    clock: CivilClock,
    settings: SchedulerSettings,
    last_minute: Mutex<Option<NaiveDateTime>>,
}

impl ReportScheduler {
    pub fn new(
        store: Arc<dyn LiveStateStore>,
        catalog: Arc<dyn EntityCatalog>,
        correlator: LogCorrelator,
        reports: Arc<dyn ReportStore>,
        clock: CivilClock,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            correlator,
            reports,
            clock,
            settings,
            last_minute: Mutex::new(None),
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_ms = self.settings.interval.as_millis() as u64,
                timezone = %self.clock.tz(),
                "report scheduler started"
            );
            loop {
                let delay = until_next_tick(Utc::now(), self.settings.interval);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {
                        self.tick(Utc::now()).await;
                    }
                }
            }
            tracing::info!("report scheduler stopped");
        })
    }

    async fn tick(&self, now: DateTime<Utc>) {
        let Some(summary) = self.run_once(now).await else {
            return;
        };
        if summary.reports_queued > 0 {
            tracing::info!(
                at = %self.clock.format_log(now),
                live_keys = summary.live_keys,
                entities = summary.entities,
                skipped = summary.entities_skipped,
                queued = summary.reports_queued,
                inserted = summary.reports_inserted,
                cleared = summary.entities_cleared,
                "shift reports materialized"
            );
        } else {
            tracing::debug!(
                at = %self.clock.format_log(now),
                live_keys = summary.live_keys,
                entities = summary.entities,
                "no shift boundaries crossed"
            );
        }
    }

    /// Evaluates the civil minute containing `now` once. Returns `None` when the minute was
    /// already handled or the run failed before anything was persisted; a failed run leaves
    /// the minute open for the next tick.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Option<RunSummary> {
        let minute = self.clock.minute_of(now);
        let mut last = self.last_minute.lock().await;
        if *last == Some(minute) {
            return None;
        }
        match self.materialize(now).await {
            Ok(summary) => {
                *last = Some(minute);
                Some(summary)
            }
            Err(err) => {
                tracing::error!(
                    at = %self.clock.format_log(now),
                    error = %format!("{err:#}"),
                    "shift report run failed"
                );
                None
            }
        }
    }

    /// One pass over every live state. Errors only when nothing was persisted.
    pub async fn materialize(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let clock_time = self.clock.clock_time(now);
        let live_keys = self
            .store
            .live_keys()
            .await
            .context("failed to enumerate live state")?;

        let mut summary = RunSummary {
            live_keys: live_keys.len(),
            ..RunSummary::default()
        };
        let mut queued = Vec::new();
        let mut to_clear: BTreeMap<LiveKey, Vec<String>> = BTreeMap::new();

        for live in &live_keys {
            let entries = match self.store.load_all(live).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(tenant = %live.tenant, domain = %live.domain, error = %err, "failed to load live states");
                    continue;
                }
            };
            summary.entities += entries.len();

            let mut states: BTreeMap<String, State> = BTreeMap::new();
            for entry in entries {
                match entry.state {
                    Ok(state) => {
                        states.insert(entry.entity_id, state);
                    }
                    Err(err) => {
                        summary.entities_skipped += 1;
                        tracing::warn!(tenant = %live.tenant, domain = %live.domain, error = %err, "skipping malformed live state");
                    }
                }
            }
            if states.is_empty() {
                continue;
            }

            let ids: Vec<String> = states.keys().cloned().collect();
            let configs = match self
                .catalog
                .load_entities(&live.tenant, live.domain, &ids)
                .await
            {
                Ok(configs) => configs,
                Err(err) => {
                    summary.entities_skipped += states.len();
                    tracing::warn!(tenant = %live.tenant, domain = %live.domain, error = %format!("{err:#}"), "failed to load entity configuration");
                    continue;
                }
            };
            let configs: HashMap<&str, &EntityConfig> = configs
                .iter()
                .map(|config| (config.entity_id.as_str(), config))
                .collect();

            for (entity_id, state) in &states {
                let Some(config) = configs.get(entity_id.as_str()) else {
                    summary.entities_skipped += 1;
                    tracing::warn!(tenant = %live.tenant, entity = %entity_id, "no configuration for live entity");
                    continue;
                };
                let Some(assignment) = config
                    .assignments
                    .iter()
                    .find(|assignment| assignment.shift.is_boundary(clock_time))
                else {
                    continue;
                };

                let window = ShiftWindow {
                    start: truncate_to_second(state.stats.window_start),
                    end: truncate_to_second(now),
                };
                let logs = if live.domain.profile().has_incident_logs {
                    self.correlator
                        .for_window(&live.tenant, entity_id, &window)
                        .await
                } else {
                    CorrelatedLogs::default()
                };

                queued.push(
                    self.build_report(live, config, assignment, state, &window, &logs, now),
                );
                to_clear
                    .entry(live.clone())
                    .or_default()
                    .push(entity_id.clone());
            }
        }

        summary.reports_queued = queued.len();
        if queued.is_empty() {
            return Ok(summary);
        }

        summary.reports_inserted = self
            .reports
            .insert_batch(&queued)
            .await
            .context("failed to persist shift reports")?;

        for (live, entity_ids) in to_clear {
            match self.store.clear_entities(&live, &entity_ids).await {
                Ok(()) => summary.entities_cleared += entity_ids.len(),
                Err(err) => tracing::warn!(
                    tenant = %live.tenant,
                    domain = %live.domain,
                    entities = entity_ids.len(),
                    error = %err,
                    "failed to clear reported live state"
                ),
            }
        }

        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_report(
        &self,
        live: &LiveKey,
        config: &EntityConfig,
        assignment: &ShiftAssignment,
        state: &State,
        window: &ShiftWindow,
        logs: &CorrelatedLogs,
        now: DateTime<Utc>,
    ) -> ShiftReport {
        let profile = live.domain.profile();
        let stats = &state.stats;

        let idle_percentage = profile.has_idle_time.then(|| {
            let span_ms = (window.end - window.start).num_milliseconds();
            if span_ms > 0 {
                stats.idle_millis.unwrap_or(0) as f64 / span_ms as f64 * 100.0
            } else {
                0.0
            }
        });

        let rollup = match profile.rollup {
            RollupKind::Rolls => {
                let counts_per_roll = config
                    .yarn
                    .as_ref()
                    .map(|yarn| yarn.counts_per_roll)
                    .filter(|value| value.is_finite() && *value > 0.0)
                    .unwrap_or(self.settings.rolls_fallback_counts);
                Rollup::Rolls {
                    yarn_quality: config.yarn.as_ref().map(|yarn| yarn.quality.clone()),
                    counts_per_roll,
                    cumulative_count: stats.cumulative_count,
                    rolls: (stats.cumulative_count as f64 / counts_per_roll).floor() as i64,
                }
            }
            RollupKind::Throughput => Rollup::Throughput {
                input: stats.cumulative_input.unwrap_or(0),
                output: stats.cumulative_count,
            },
        };

        ShiftReport {
            id: Uuid::new_v4(),
            tenant_id: live.tenant.clone(),
            domain: live.domain,
            entity_id: config.entity_id.clone(),
            shift: assignment.shift.clone(),
            rate_avg: stats.rate_avg,
            rollup,
            idle_percentage,
            worker_id: assignment.worker_id.clone(),
            supervisor_id: assignment.supervisor_id.clone(),
            downtime_log_ids: logs.downtime_ids(),
            needle_change_log_ids: logs.needle_change_ids(),
            start_time: window.start,
            end_time: window.end,
            created_at: now,
        }
    }
}

/// Time until the next multiple of `interval` since the epoch. Late wake-ups skip ahead
/// rather than bursting.
fn until_next_tick(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = (interval.as_millis() as i64).max(1);
    let now_ms = now.timestamp_millis();
    let next_ms = (now_ms.div_euclid(interval_ms) + 1) * interval_ms;
    Duration::from_millis((next_ms - now_ms).max(1) as u64)
}
