use crate::ingest::{Reading, State};

#[derive(Debug, thiserror::Error)]
#[error("malformed stored value for `{entity_id}`: {source}")]
pub struct CodecError {
    pub entity_id: String,
    #[source]
    pub source: serde_json::Error,
}

pub fn encode_state(entity_id: &str, state: &State) -> Result<String, CodecError> {
    serde_json::to_string(state).map_err(|source| CodecError {
        entity_id: entity_id.to_string(),
        source,
    })
}

pub fn decode_state(entity_id: &str, raw: &str) -> Result<State, CodecError> {
    serde_json::from_str(raw).map_err(|source| CodecError {
        entity_id: entity_id.to_string(),
        source,
    })
}

pub fn encode_reading(entity_id: &str, reading: &Reading) -> Result<String, CodecError> {
    serde_json::to_string(reading).map_err(|source| CodecError {
        entity_id: entity_id.to_string(),
        source,
    })
}

pub fn decode_reading(entity_id: &str, raw: &str) -> Result<Reading, CodecError> {
    serde_json::from_str(raw).map_err(|source| CodecError {
        entity_id: entity_id.to_string(),
        source,
    })
}
