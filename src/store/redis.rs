use super::codec::{decode_reading, decode_state, encode_reading, encode_state};
use super::{EntityKey, LiveEntry, LiveKey, LiveStateStore, StoreError};
use crate::domain::Domain;
use crate::ingest::{Reading, State, WindowBuffer};
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

const SCAN_COUNT: usize = 200;

/// Live state in a shared Redis, laid out as `{tenant}:{domain}` hashes plus per-entity
/// window and reading lists.
#[derive(Clone)]
pub struct RedisStateStore {
    conn: ConnectionManager,
}

impl RedisStateStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    async fn scan_hashes(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .arg("TYPE")
                .arg("hash")
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

#[async_trait]
impl LiveStateStore for RedisStateStore {
    async fn get_state(&self, key: &EntityKey) -> Result<Option<State>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(key.live_key().hash_key(), &key.entity).await?;
        match raw {
            Some(raw) => Ok(Some(decode_state(&key.entity, &raw)?)),
            None => Ok(None),
        }
    }

    async fn contains(&self, key: &EntityKey) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .hexists(key.live_key().hash_key(), &key.entity)
            .await?;
        Ok(exists)
    }

    async fn put_state(&self, key: &EntityKey, state: &State) -> Result<(), StoreError> {
        let encoded = encode_state(&key.entity, state)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(key.live_key().hash_key(), &key.entity, encoded)
            .await?;
        Ok(())
    }

    async fn load_all(&self, live: &LiveKey) -> Result<Vec<LiveEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(live.hash_key()).await?;
        let mut entries: Vec<LiveEntry> = raw
            .into_iter()
            .map(|(entity_id, value)| {
                let state = decode_state(&entity_id, &value);
                LiveEntry { entity_id, state }
            })
            .collect();
        entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(entries)
    }

    async fn live_keys(&self) -> Result<Vec<LiveKey>, StoreError> {
        let mut found = BTreeSet::new();
        for domain in Domain::ALL {
            let pattern = format!("*:{domain}");
            for raw in self.scan_hashes(&pattern).await? {
                match LiveKey::parse_hash_key(&raw) {
                    Some(live) => {
                        found.insert(live);
                    }
                    None => tracing::debug!(key = %raw, "ignoring unrecognised live hash"),
                }
            }
        }
        Ok(found.into_iter().collect())
    }

    async fn append_window(
        &self,
        key: &EntityKey,
        value: i64,
        capacity: usize,
    ) -> Result<WindowBuffer, StoreError> {
        let window_key = key.window_key();
        let keep = capacity.max(1) as isize;
        let mut conn = self.conn.clone();
        let (samples,): (Vec<i64>,) = ::redis::pipe()
            .atomic()
            .rpush(&window_key, value)
            .ignore()
            .ltrim(&window_key, -keep, -1)
            .ignore()
            .lrange(&window_key, 0, -1)
            .query_async(&mut conn)
            .await?;
        Ok(WindowBuffer::from_samples(samples))
    }

    async fn push_reading(
        &self,
        key: &EntityKey,
        reading: &Reading,
        max_len: usize,
    ) -> Result<(), StoreError> {
        let encoded = encode_reading(&key.entity, reading)?;
        let list_key = key.reading_list_key();
        let mut pipe = ::redis::pipe();
        pipe.rpush(&list_key, encoded).ignore();
        if max_len > 0 {
            pipe.ltrim(&list_key, -(max_len as isize), -1).ignore();
        }
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn recent_readings(&self, key: &EntityKey) -> Result<Vec<Reading>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(key.reading_list_key(), 0, -1).await?;
        let mut readings = Vec::with_capacity(raw.len());
        for value in raw {
            match decode_reading(&key.entity, &value) {
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
        if entity_ids.is_empty() {
            return Ok(());
        }
        let lists: Vec<String> = entity_ids
            .iter()
            .flat_map(|entity| {
                let key = live.entity(entity.clone());
                [key.window_key(), key.reading_list_key()]
            })
            .collect();
        let mut conn = self.conn.clone();
        let _: () = ::redis::pipe()
            .atomic()
            .hdel(live.hash_key(), entity_ids)
            .ignore()
            .del(lists)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
