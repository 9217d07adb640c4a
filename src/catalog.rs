use crate::domain::Domain;
use crate::shift::ShiftDefinition;
use crate::time::ClockTime;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Yarn {
    pub quality: String,
    pub counts_per_roll: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftAssignment {
    pub shift: ShiftDefinition,
    pub worker_id: String,
    pub supervisor_id: String,
}

/// Read-only configuration of one entity, owned by the tenant admin service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    pub entity_id: String,
    pub tenant_id: String,
    pub yarn: Option<Yarn>,
    pub assignments: Vec<ShiftAssignment>,
}

#[async_trait]
pub trait EntityCatalog: Send + Sync {
    /// Configuration for exactly the listed entities. Unknown ids are simply absent.
    async fn load_entities(
        &self,
        tenant: &str,
        domain: Domain,
        entity_ids: &[String],
    ) -> Result<Vec<EntityConfig>>;
}

#[derive(Clone)]
pub struct PgEntityCatalog {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct EntityShiftRow {
    entity_id: String,
    tenant_id: String,
    yarn_quality: Option<String>,
    counts_per_roll: Option<f64>,
    shift_name: Option<String>,
    start_hour: Option<i32>,
    start_minute: Option<i32>,
    end_hour: Option<i32>,
    end_minute: Option<i32>,
    worker_id: Option<String>,
    supervisor_id: Option<String>,
}

impl PgEntityCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityCatalog for PgEntityCatalog {
    async fn load_entities(
        &self,
        tenant: &str,
        domain: Domain,
        entity_ids: &[String],
    ) -> Result<Vec<EntityConfig>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<EntityShiftRow> = sqlx::query_as(
            r#"
            SELECT
                e.id AS entity_id,
                e.tenant_id,
                e.yarn_quality,
                e.counts_per_roll,
                s.name AS shift_name,
                s.start_hour,
                s.start_minute,
                s.end_hour,
                s.end_minute,
                es.worker_id,
                es.supervisor_id
            FROM floor_entities e
            LEFT JOIN floor_entity_shifts es ON es.entity_id = e.id
            LEFT JOIN floor_shifts s ON s.id = es.shift_id
            WHERE e.tenant_id = $1
              AND e.domain = $2
              AND e.id = ANY($3)
            ORDER BY e.id, s.start_hour, s.start_minute
            "#,
        )
        .bind(tenant)
        .bind(domain.as_str())
        .bind(entity_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(group_rows(rows))
    }
}

fn group_rows(rows: Vec<EntityShiftRow>) -> Vec<EntityConfig> {
    let mut configs: BTreeMap<String, EntityConfig> = BTreeMap::new();
    for row in rows {
        let config = configs
            .entry(row.entity_id.clone())
            .or_insert_with(|| EntityConfig {
                entity_id: row.entity_id.clone(),
                tenant_id: row.tenant_id.clone(),
                yarn: row.yarn_quality.clone().map(|quality| Yarn {
                    quality,
                    counts_per_roll: row.counts_per_roll.unwrap_or(0.0),
                }),
                assignments: Vec::new(),
            });

        let Some(name) = row.shift_name else {
            continue;
        };
        let start = clock_time(row.start_hour, row.start_minute);
        let end = clock_time(row.end_hour, row.end_minute);
        let (Some(start), Some(end)) = (start, end) else {
            tracing::warn!(entity = %row.entity_id, shift = %name, "ignoring shift with invalid hours");
            continue;
        };
        config.assignments.push(ShiftAssignment {
            shift: ShiftDefinition::new(name, start, end),
            worker_id: row.worker_id.unwrap_or_default(),
            supervisor_id: row.supervisor_id.unwrap_or_default(),
        });
    }
    configs.into_values().collect()
}

fn clock_time(hour: Option<i32>, minute: Option<i32>) -> Option<ClockTime> {
    let hour = u32::try_from(hour?).ok()?;
    let minute = u32::try_from(minute?).ok()?;
    ClockTime::new(hour, minute)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(entity: &str, shift: Option<(&str, i32, i32, i32, i32)>) -> EntityShiftRow {
        EntityShiftRow {
            entity_id: entity.to_string(),
            tenant_id: "org".to_string(),
            yarn_quality: Some("40s combed".to_string()),
            counts_per_roll: Some(2500.0),
            shift_name: shift.map(|s| s.0.to_string()),
            start_hour: shift.map(|s| s.1),
            start_minute: shift.map(|s| s.2),
            end_hour: shift.map(|s| s.3),
            end_minute: shift.map(|s| s.4),
            worker_id: shift.map(|_| "w-1".to_string()),
            supervisor_id: shift.map(|_| "s-1".to_string()),
        }
    }

    #[test]
    fn rows_group_into_one_config_per_entity() {
        let configs = group_rows(vec![
            row("m1", Some(("day", 6, 0, 14, 0))),
            row("m1", Some(("night", 22, 0, 6, 0))),
            row("m2", None),
        ]);
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].assignments.len(), 2);
        assert!(configs[0].assignments[1].shift.is_overnight());
        assert_eq!(configs[0].yarn.as_ref().unwrap().counts_per_roll, 2500.0);
        assert!(configs[1].assignments.is_empty());
    }

    #[test]
    fn invalid_shift_hours_are_skipped() {
        let configs = group_rows(vec![row("m1", Some(("broken", 25, 0, 6, 0)))]);
        assert_eq!(configs.len(), 1);
        assert!(configs[0].assignments.is_empty());
    }
}
