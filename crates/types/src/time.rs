//! Block timestamps.
//!
//! Stored values carry time as plain nanoseconds since the Unix epoch so
//! they stay SBOR-encodable; RFC 3339 conversion happens only at the JSON
//! boundary (genesis documents, query literals).

use chrono::{DateTime, SecondsFormat, Utc};
use sbor::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
#[sbor(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Parse an RFC 3339 timestamp.
    pub fn from_rfc3339(s: &str) -> Result<Self, TimeError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| TimeError::Parse(e.to_string()))?
            .with_timezone(&Utc);
        let nanos = dt
            .timestamp_nanos_opt()
            .ok_or_else(|| TimeError::OutOfRange(s.to_string()))?;
        Ok(Timestamp(nanos))
    }

    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.0.div_euclid(NANOS_PER_SEC);
        let nsecs = self.0.rem_euclid(NANOS_PER_SEC) as u32;
        // Any i64 nanosecond count splits into a representable (secs, nsecs).
        DateTime::from_timestamp(secs, nsecs).expect("nanosecond timestamp within chrono range")
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::from_rfc3339(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors from timestamp parsing.
#[derive(Debug, Error)]
pub enum TimeError {
    #[error("invalid RFC 3339 timestamp: {0}")]
    Parse(String),

    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trip() {
        let t = Timestamp::from_rfc3339("2024-06-01T12:30:45.123456789Z").unwrap();
        assert_eq!(Timestamp::from_rfc3339(&t.to_rfc3339()).unwrap(), t);
    }

    #[test]
    fn epoch_is_zero() {
        let t = Timestamp::from_rfc3339("1970-01-01T00:00:00Z").unwrap();
        assert_eq!(t.as_nanos(), 0);
    }

    #[test]
    fn ordering_follows_time() {
        let a = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        let b = Timestamp::from_rfc3339("2024-01-01T00:00:01Z").unwrap();
        assert!(a < b);
    }

    #[test]
    fn json_round_trip() {
        let t = Timestamp::from_nanos(1_717_245_045_000_000_001);
        let json = serde_json::to_string(&t).unwrap();
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
