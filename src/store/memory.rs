use super::codec::{decode_reading, decode_state, encode_reading, encode_state};
use super::{EntityKey, LiveEntry, LiveKey, LiveStateStore, StoreError};
use crate::ingest::{Reading, State, WindowBuffer};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    states: BTreeMap<LiveKey, BTreeMap<String, String>>,
    windows: HashMap<EntityKey, WindowBuffer>,
    readings: HashMap<EntityKey, Vec<String>>,
}

/// Single-process live state. Values go through the same codec as the Redis store so both
/// backends agree on what a malformed entry is.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an already-encoded value verbatim.
    pub async fn insert_raw(&self, key: &EntityKey, raw: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner
            .states
            .entry(key.live_key())
            .or_default()
            .insert(key.entity.clone(), raw.into());
    }

    pub async fn window_samples(&self, key: &EntityKey) -> Vec<i64> {
        let inner = self.inner.lock().await;
        inner
            .windows
            .get(key)
            .map(|buffer| buffer.samples().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LiveStateStore for MemoryStateStore {
    async fn get_state(&self, key: &EntityKey) -> Result<Option<State>, StoreError> {
        let inner = self.inner.lock().await;
        let raw = inner
            .states
            .get(&key.live_key())
            .and_then(|entities| entities.get(&key.entity));
        match raw {
            Some(raw) => Ok(Some(decode_state(&key.entity, raw)?)),
            None => Ok(None),
        }
    }

    async fn contains(&self, key: &EntityKey) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .states
            .get(&key.live_key())
            .is_some_and(|entities| entities.contains_key(&key.entity)))
    }

    async fn put_state(&self, key: &EntityKey, state: &State) -> Result<(), StoreError> {
        let encoded = encode_state(&key.entity, state)?;
        self.insert_raw(key, encoded).await;
        Ok(())
    }

    async fn load_all(&self, live: &LiveKey) -> Result<Vec<LiveEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .states
            .get(live)
            .map(|entities| {
                entities
                    .iter()
                    .map(|(entity_id, raw)| LiveEntry {
                        entity_id: entity_id.clone(),
                        state: decode_state(entity_id, raw),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn live_keys(&self) -> Result<Vec<LiveKey>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .states
            .iter()
            .filter(|(_, entities)| !entities.is_empty())
            .map(|(live, _)| live.clone())
            .collect())
    }

    async fn append_window(
        &self,
        key: &EntityKey,
        value: i64,
        capacity: usize,
    ) -> Result<WindowBuffer, StoreError> {
        let mut inner = self.inner.lock().await;
        let buffer = inner.windows.entry(key.clone()).or_default();
        buffer.push(value, capacity);
        Ok(buffer.clone())
    }

    async fn push_reading(
        &self,
        key: &EntityKey,
        reading: &Reading,
        max_len: usize,
    ) -> Result<(), StoreError> {
        let encoded = encode_reading(&key.entity, reading)?;
        let mut inner = self.inner.lock().await;
        let list = inner.readings.entry(key.clone()).or_default();
        list.push(encoded);
        if max_len > 0 && list.len() > max_len {
            let excess = list.len() - max_len;
            list.drain(..excess);
        }
        Ok(())
    }

    async fn recent_readings(&self, key: &EntityKey) -> Result<Vec<Reading>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(list) = inner.readings.get(key) else {
            return Ok(Vec::new());
        };
        let mut readings = Vec::with_capacity(list.len());
        for raw in list {
            match decode_reading(&key.entity, raw) {
                Ok(reading) => readings.push(reading),
                Err(err) => tracing::warn!(entity = %key, error = %err, "skipping malformed reading"),
            }
        }
        Ok(readings)
    }

    async fn clear_entities(
        &self,
        live: &LiveKey,
        entity_ids: &[String],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let emptied = match inner.states.get_mut(live) {
            Some(entities) => {
                for entity in entity_ids {
                    entities.remove(entity);
                }
                entities.is_empty()
            }
            None => false,
        };
        if emptied {
            inner.states.remove(live);
        }
        for entity in entity_ids {
            let key = live.entity(entity.clone());
            inner.windows.remove(&key);
            inner.readings.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use chrono::{TimeZone, Utc};

    fn reading(count: i64) -> Reading {
        Reading {
            rate: 1.0,
            count,
            input_count: None,
            received_at: Utc.with_ymd_and_hms(2025, 10, 9, 6, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn reading_list_respects_max_len() {
        let store = MemoryStateStore::new();
        let key = EntityKey::new("org", Domain::RevolutionCounter, "m1");
        for count in 0..5 {
            store.push_reading(&key, &reading(count), 3).await.unwrap();
        }
        let counts: Vec<i64> = store
            .recent_readings(&key)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.count)
            .collect();
        assert_eq!(counts, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn clear_entities_removes_everything_for_listed_ids() {
        let store = MemoryStateStore::new();
        let live = LiveKey::new("org", Domain::RevolutionCounter);
        let m1 = live.entity("m1");
        let m2 = live.entity("m2");
        store.insert_raw(&m1, "{}").await;
        store.insert_raw(&m2, "{}").await;
        store.append_window(&m1, 10, 13).await.unwrap();
        store.push_reading(&m1, &reading(10), 0).await.unwrap();

        store
            .clear_entities(&live, &["m1".to_string()])
            .await
            .unwrap();

        assert!(!store.contains(&m1).await.unwrap());
        assert!(store.contains(&m2).await.unwrap());
        assert!(store.window_samples(&m1).await.is_empty());
        assert!(store.recent_readings(&m1).await.unwrap().is_empty());
        assert_eq!(store.live_keys().await.unwrap(), vec![live]);
    }

    #[tokio::test]
    async fn load_all_surfaces_malformed_entries_individually() {
        let store = MemoryStateStore::new();
        let live = LiveKey::new("org", Domain::Workforce);
        store.insert_raw(&live.entity("bad"), "{oops").await;
        let entries = store.load_all(&live).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_id, "bad");
        assert!(entries[0].state.is_err());
    }
}
