
use crate::domain::Domain;
use crate::shift::ShiftDefinition;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

// Fifteen binds per row keeps a chunk well under the Postgres parameter limit.
const INSERT_CHUNK: usize = 1_000;

/// Domain-specific totals for a shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rollup {
    Rolls {
        yarn_quality: Option<String>,
        counts_per_roll: f64,
        cumulative_count: i64,
        rolls: i64,
    },
    Throughput {
        input: i64,
        output: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftReport {
    pub id: Uuid,
    pub tenant_id: String,
    pub domain: Domain,
    pub entity_id: String,
    pub shift: ShiftDefinition,
    pub rate_avg: f64,
    pub rollup: Rollup,
    pub idle_percentage: Option<f64>,
    pub worker_id: String,
    pub supervisor_id: String,
    pub downtime_log_ids: Vec<String>,
    pub needle_change_log_ids: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Durable, append-only report storage. At most one report per
/// `(entity_id, start_time, end_time)`; repeats are silently skipped.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Returns the number of reports actually stored.
    async fn insert_batch(&self, reports: &[ShiftReport]) -> Result<u64>;
}

#[derive(Clone)]
pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn insert_batch(&self, reports: &[ShiftReport]) -> Result<u64> {
        if reports.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for chunk in reports.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO shift_reports (id, tenant_id, domain, entity_id, shift, rate_avg, rollup, \
                 idle_percentage, worker_id, supervisor_id, downtime_log_ids, needle_change_log_ids, \
                 start_time, end_time, created_at) ",
            );
            builder.push_values(chunk.iter(), |mut b, report| {
                b.push_bind(report.id)
                    .push_bind(&report.tenant_id)
                    .push_bind(report.domain.as_str())
                    .push_bind(&report.entity_id)
                    .push_bind(Json(&report.shift))
                    .push_bind(report.rate_avg)
                    .push_bind(Json(&report.rollup))
                    .push_bind(report.idle_percentage)
                    .push_bind(&report.worker_id)
                    .push_bind(&report.supervisor_id)
                    .push_bind(&report.downtime_log_ids)
                    .push_bind(&report.needle_change_log_ids)
                    .push_bind(report.start_time)
                    .push_bind(report.end_time)
                    .push_bind(report.created_at);
            });
            builder.push(" ON CONFLICT (entity_id, start_time, end_time) DO NOTHING");
            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        if inserted < reports.len() as u64 {
            tracing::warn!(
                inserted,
                skipped = reports.len() as u64 - inserted,
                "skipped duplicate shift reports"
            );
        }
        Ok(inserted)
    }
}
