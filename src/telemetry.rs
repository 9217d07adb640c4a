use crate::domain::{CountMode, Domain, DomainProfile};
use crate::ingest::Reading;
use chrono::{DateTime, Utc};
use simd_json::prelude::ValueAsScalar;
use simd_json::BorrowedValue;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] simd_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing numeric field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("field `{0}` must not be negative")]
    Negative(&'static str),
}

/// Addressing carried by an inbound topic: `{prefix}/{domain}/{tenant}/{entity}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoute {
    pub domain: Domain,
    pub tenant: String,
    pub entity: String,
}

pub fn parse_topic(topic_prefix: &str, topic: &str) -> Option<TopicRoute> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() != 4 || parts[0] != topic_prefix {
        return None;
    }
    let domain = parts[1].parse::<Domain>().ok()?;
    let tenant = parts[2].trim();
    let entity = parts[3].trim();
    if tenant.is_empty() || entity.is_empty() {
        return None;
    }
    Some(TopicRoute {
        domain,
        tenant: tenant.to_string(),
        entity: entity.to_string(),
    })
}

/// Decodes one telemetry payload. The sender's timestamp, if any, is ignored: `received_at`
/// is the authoritative sample time.
pub fn parse_reading(
    profile: &DomainProfile,
    payload: &mut [u8],
    received_at: DateTime<Utc>,
) -> Result<Reading, NormalizeError> {
    let value = simd_json::to_borrowed_value(payload)?;
    let BorrowedValue::Object(obj) = value else {
        return Err(NormalizeError::NotAnObject);
    };

    let rate = obj
        .get(profile.rate_field)
        .and_then(number_as_f64)
        .ok_or(NormalizeError::MissingField(profile.rate_field))?;
    if !rate.is_finite() {
        return Err(NormalizeError::NonFinite(profile.rate_field));
    }

    let count = obj
        .get(profile.count_field)
        .and_then(number_as_i64)
        .ok_or(NormalizeError::MissingField(profile.count_field))?;

    let input_count = match profile.input_field {
        Some(field) => Some(
            obj.get(field)
                .and_then(number_as_i64)
                .ok_or(NormalizeError::MissingField(field))?,
        ),
        None => None,
    };

    if profile.count_mode == CountMode::Delta {
        if count < 0 {
            return Err(NormalizeError::Negative(profile.count_field));
        }
        if let (Some(field), Some(input)) = (profile.input_field, input_count) {
            if input < 0 {
                return Err(NormalizeError::Negative(field));
            }
        }
    }

    Ok(Reading {
        rate,
        count,
        input_count,
        received_at,
    })
}

fn number_as_f64(value: &BorrowedValue) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_i64().map(|v| v as f64))
        .or_else(|| value.as_u64().map(|v| v as f64))
}

fn number_as_i64(value: &BorrowedValue) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_u64().and_then(|v| i64::try_from(v).ok()))
        .or_else(|| {
            value
                .as_f64()
                .filter(|v| v.is_finite())
                .map(|v| v.round() as i64)
        })
}
