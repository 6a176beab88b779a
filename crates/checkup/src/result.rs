//! Check result types shared by every plugin.
//!
//! A [`CheckResult`] is created exactly once by whoever ran the check and is
//! immutable afterwards. The builder-style helpers consume `self`, so a result
//! can only be shaped before it is handed over.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Free-form, protocol specific detail attached to a result
pub type RawData = Map<String, Value>;

/// Errors raised while building or decoding a check result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultError {
    #[error("Invalid status: {0}. Must be one of: success, warning, error")]
    InvalidStatus(String),

    #[error("Malformed check result: {0}")]
    Malformed(String),
}

/// Outcome tri-state of a check
///
/// Ordered from best to worst so that `max` picks the more severe status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Warning,
    Error,
}

impl CheckStatus {
    pub const ALL: [CheckStatus; 3] = [CheckStatus::Success, CheckStatus::Warning, CheckStatus::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Success => "success",
            CheckStatus::Warning => "warning",
            CheckStatus::Error => "error",
        }
    }

    /// Combine with another sub-check status without ever improving it.
    pub fn escalate(self, other: CheckStatus) -> CheckStatus {
        self.max(other)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = ResultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CheckStatus::Success),
            "warning" => Ok(CheckStatus::Warning),
            "error" => Ok(CheckStatus::Error),
            other => Err(ResultError::InvalidStatus(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for CheckStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Result of a single check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    status: CheckStatus,

    message: String,

    /// Wall-clock duration of the probe in seconds
    #[serde(default)]
    response_time: f64,

    #[serde(default)]
    raw_data: RawData,

    /// Creation time, serialized as RFC 3339
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl CheckResult {
    /// Create a new check result stamped with the current time
    pub fn new(
        status: CheckStatus,
        message: impl Into<String>,
        response_time: f64,
        raw_data: RawData,
    ) -> Self {
        Self { status, message: message.into(), response_time, raw_data, timestamp: Utc::now() }
    }

    /// Create a result from a textual status, rejecting anything outside the closed set
    pub fn from_status_str(
        status: &str,
        message: impl Into<String>,
        response_time: f64,
        raw_data: RawData,
    ) -> Result<Self, ResultError> {
        Ok(Self::new(status.parse()?, message, response_time, raw_data))
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Success, message, 0.0, RawData::new())
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Warning, message, 0.0, RawData::new())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Error, message, 0.0, RawData::new())
    }

    /// Error result carrying the fault description and a type tag in `raw_data`
    pub fn error_from(
        message: impl Into<String>,
        error: impl fmt::Display,
        error_type: impl Into<String>,
    ) -> Self {
        let mut raw_data = RawData::new();
        raw_data.insert("error".into(), Value::String(error.to_string()));
        raw_data.insert("error_type".into(), Value::String(error_type.into()));
        Self::new(CheckStatus::Error, message, 0.0, raw_data)
    }

    pub fn with_response_time(mut self, response_time: f64) -> Self {
        self.response_time = response_time;
        self
    }

    pub fn with_raw_data(mut self, raw_data: RawData) -> Self {
        self.raw_data = raw_data;
        self
    }

    /// Add a single entry to `raw_data`
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw_data.insert(key.into(), value.into());
        self
    }

    pub fn status(&self) -> CheckStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn response_time(&self) -> f64 {
        self.response_time
    }

    pub fn raw_data(&self) -> &RawData {
        &self.raw_data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_success(&self) -> bool {
        self.status == CheckStatus::Success
    }

    pub fn is_warning(&self) -> bool {
        self.status == CheckStatus::Warning
    }

    pub fn is_error(&self) -> bool {
        self.status == CheckStatus::Error
    }

    /// Convert the result to plain structured data
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("status".into(), Value::String(self.status.to_string()));
        map.insert("message".into(), Value::String(self.message.clone()));
        map.insert("response_time".into(), Value::from(self.response_time));
        map.insert("raw_data".into(), Value::Object(self.raw_data.clone()));
        map.insert("timestamp".into(), Value::String(self.timestamp.to_rfc3339()));
        Value::Object(map)
    }

    /// Rebuild a result from the structure produced by [`CheckResult::to_value`]
    pub fn from_value(value: Value) -> Result<Self, ResultError> {
        let Value::Object(mut map) = value else {
            return Err(ResultError::Malformed("expected an object".into()));
        };

        let status = map
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ResultError::Malformed("missing status".into()))?
            .parse::<CheckStatus>()?;

        let message = map.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
        let response_time = map.get("response_time").and_then(Value::as_f64).unwrap_or(0.0);

        let raw_data = match map.remove("raw_data") {
            None | Some(Value::Null) => RawData::new(),
            Some(Value::Object(raw)) => raw,
            Some(_) => return Err(ResultError::Malformed("raw_data must be an object".into())),
        };

        let timestamp = match map.get("timestamp").and_then(Value::as_str) {
            Some(ts) => DateTime::parse_from_rfc3339(ts)
                .map_err(|e| ResultError::Malformed(format!("invalid timestamp: {e}")))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        Ok(Self { status, message, response_time, raw_data, timestamp })
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CheckResult({}): {}", self.status, self.message)
    }
}

/// Turn a `json!` object into raw data; non-objects are wrapped under `value`.
pub fn into_raw_data(value: Value) -> RawData {
    match value {
        Value::Object(map) => map,
        Value::Null => RawData::new(),
        other => {
            let mut map = RawData::new();
            map.insert("value".into(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_ordering_escalates() {
        assert_eq!(CheckStatus::Success.escalate(CheckStatus::Warning), CheckStatus::Warning);
        assert_eq!(CheckStatus::Error.escalate(CheckStatus::Success), CheckStatus::Error);
        assert_eq!(CheckStatus::Warning.escalate(CheckStatus::Success), CheckStatus::Warning);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("warning".parse::<CheckStatus>().unwrap(), CheckStatus::Warning);
        assert_eq!(
            "ok".parse::<CheckStatus>(),
            Err(ResultError::InvalidStatus("ok".to_string()))
        );
        // Case matters, like the serialized form
        assert!("ERROR".parse::<CheckStatus>().is_err());
    }

    #[test]
    fn test_error_from_tags_raw_data() {
        let result = CheckResult::error_from("boom", "socket closed", "io::Error");
        assert!(result.is_error());
        assert_eq!(result.raw_data()["error"], json!("socket closed"));
        assert_eq!(result.raw_data()["error_type"], json!("io::Error"));
    }

    #[test]
    fn test_into_raw_data_wraps_scalars() {
        assert_eq!(into_raw_data(json!({"a": 1}))["a"], json!(1));
        assert_eq!(into_raw_data(json!(3))["value"], json!(3));
        assert!(into_raw_data(Value::Null).is_empty());
    }

    #[test]
    fn test_from_value_rejects_bad_shapes() {
        assert!(matches!(CheckResult::from_value(json!([1, 2])), Err(ResultError::Malformed(_))));
        assert!(matches!(
            CheckResult::from_value(json!({"status": "success", "raw_data": 5})),
            Err(ResultError::Malformed(_))
        ));
        assert!(matches!(
            CheckResult::from_value(json!({"status": "fine", "message": "x"})),
            Err(ResultError::InvalidStatus(_))
        ));
    }
}
