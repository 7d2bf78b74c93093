//! Lenient timestamp decoding.
//!
//! The backend emits RFC 3339 strings, naive ISO strings (implicitly UTC) and,
//! on the push channel, fractional unix seconds. Everything is normalized to
//! `DateTime<Utc>`.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserializer;
use serde::de::{Error as DeError, Unexpected, Visitor};

/// Parse a timestamp string in any of the formats the backend produces.
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    value.parse::<f64>().ok().and_then(from_secs_f64)
}

#[allow(clippy::cast_possible_truncation)]
fn from_secs_f64(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1_000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

struct TsVisitor;

impl<'de> Visitor<'de> for TsVisitor {
    type Value = Option<DateTime<Utc>>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a timestamp as ISO 8601 string or unix seconds")
    }

    fn visit_unit<E: DeError>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: DeError>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(Self)
    }

    fn visit_i64<E: DeError>(self, value: i64) -> Result<Self::Value, E> {
        Ok(Utc.timestamp_opt(value, 0).single())
    }

    fn visit_u64<E: DeError>(self, value: u64) -> Result<Self::Value, E> {
        Ok(i64::try_from(value).ok().and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
    }

    fn visit_f64<E: DeError>(self, value: f64) -> Result<Self::Value, E> {
        Ok(from_secs_f64(value))
    }

    fn visit_str<E: DeError>(self, value: &str) -> Result<Self::Value, E> {
        if value.trim().is_empty() {
            return Ok(None);
        }
        parse(value).map(Some).ok_or_else(|| E::invalid_value(Unexpected::Str(value), &self))
    }
}

/// Deserialize a required timestamp.
pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(TsVisitor)?.ok_or_else(|| D::Error::custom("missing timestamp"))
}

/// Deserialize an optional timestamp; `null`, absent and empty strings are `None`.
pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_option(TsVisitor)
}
