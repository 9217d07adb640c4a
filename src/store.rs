pub mod codec;
pub mod memory;
pub mod redis;

use crate::domain::Domain;
use crate::ingest::{Reading, State, WindowBuffer};
use async_trait::async_trait;
use std::fmt;

pub use codec::CodecError;
pub use memory::MemoryStateStore;
pub use self::redis::RedisStateStore;

const WINDOW_SUFFIX: &str = "window";
const READING_LIST_SUFFIX: &str = "readingList";

/// One `(tenant, domain)` hash of live states.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveKey {
    pub tenant: String,
    pub domain: Domain,
}

/// One entity's live state inside a [`LiveKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub tenant: String,
    pub domain: Domain,
    pub entity: String,
}

impl LiveKey {
    pub fn new(tenant: impl Into<String>, domain: Domain) -> Self {
        Self {
            tenant: tenant.into(),
            domain,
        }
    }

    pub fn entity(&self, entity: impl Into<String>) -> EntityKey {
        EntityKey {
            tenant: self.tenant.clone(),
            domain: self.domain,
            entity: entity.into(),
        }
    }

    /// Redis hash name, `{tenant}:{domain}`.
    pub fn hash_key(&self) -> String {
        format!("{}:{}", self.tenant, self.domain)
    }

    pub fn parse_hash_key(raw: &str) -> Option<Self> {
        let (tenant, domain) = raw.rsplit_once(':')?;
        if tenant.is_empty() {
            return None;
        }
        Some(Self::new(tenant, domain.parse::<Domain>().ok()?))
    }
}

impl EntityKey {
    pub fn new(tenant: impl Into<String>, domain: Domain, entity: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            domain,
            entity: entity.into(),
        }
    }

    pub fn live_key(&self) -> LiveKey {
        LiveKey::new(self.tenant.clone(), self.domain)
    }

    pub fn window_key(&self) -> String {
        format!("{}:{}:{}:{WINDOW_SUFFIX}", self.tenant, self.domain, self.entity)
    }

    pub fn reading_list_key(&self) -> String {
        format!(
            "{}:{}:{}:{READING_LIST_SUFFIX}",
            self.tenant, self.domain, self.entity
        )
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.domain, self.entity)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("live state store unavailable: {0}")]
    Unavailable(String),
}

/// A live state that may not have decoded. Bulk readers keep going past bad entries.
#[derive(Debug)]
pub struct LiveEntry {
    pub entity_id: String,
    pub state: Result<State, CodecError>,
}

/// Keyed store for live per-entity aggregates, their trailing window and their recent readings.
#[async_trait]
pub trait LiveStateStore: Send + Sync {
    async fn get_state(&self, key: &EntityKey) -> Result<Option<State>, StoreError>;

    async fn contains(&self, key: &EntityKey) -> Result<bool, StoreError>;

    async fn put_state(&self, key: &EntityKey, state: &State) -> Result<(), StoreError>;

    async fn load_all(&self, live: &LiveKey) -> Result<Vec<LiveEntry>, StoreError>;

    async fn live_keys(&self) -> Result<Vec<LiveKey>, StoreError>;

    /// Appends to the window list, trims it to `capacity` and returns what remains.
    async fn append_window(
        &self,
        key: &EntityKey,
        value: i64,
        capacity: usize,
    ) -> Result<WindowBuffer, StoreError>;

    /// `max_len == 0` keeps the list unbounded.
    async fn push_reading(
        &self,
        key: &EntityKey,
        reading: &Reading,
        max_len: usize,
    ) -> Result<(), StoreError>;

    async fn recent_readings(&self, key: &EntityKey) -> Result<Vec<Reading>, StoreError>;

    /// Drops live state, window and reading log for every listed entity in one round trip.
    async fn clear_entities(&self, live: &LiveKey, entity_ids: &[String])
        -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_matches_the_shared_store() {
        let key = EntityKey::new("org-1", Domain::RevolutionCounter, "m-7");
        assert_eq!(key.live_key().hash_key(), "org-1:revolution_counter");
        assert_eq!(key.window_key(), "org-1:revolution_counter:m-7:window");
        assert_eq!(key.reading_list_key(), "org-1:revolution_counter:m-7:readingList");
    }

    #[test]
    fn parse_hash_key_requires_known_domain() {
        assert_eq!(
            LiveKey::parse_hash_key("org-1:workforce"),
            Some(LiveKey::new("org-1", Domain::Workforce))
        );
        assert_eq!(LiveKey::parse_hash_key("org-1:window"), None);
        assert_eq!(LiveKey::parse_hash_key(":workforce"), None);
        assert_eq!(LiveKey::parse_hash_key("workforce"), None);
    }
}
