//! Launch parameters and the job key derived from them.
//!
//! A `JobParameters` map is kept sorted by key, so its canonical encoding (the
//! job key) depends only on its contents and never on insertion order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::JobInstanceId;

/// A typed launch parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    Text(String),
    Timestamp(DateTime<Utc>),
    Integer(i64),
    Float(f64),
}

impl ParameterValue {
    /// Pick a value slot from the runtime type of a JSON scalar.
    ///
    /// Integers and other numbers map to `Integer`/`Float`, RFC 3339 strings to
    /// `Timestamp`, any other string to `Text`. Everything else is stored as
    /// its JSON text rendering.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .unwrap_or_else(|| Self::Text(n.to_string())),
            },
            JsonValue::String(s) => match DateTime::parse_from_rfc3339(s) {
                Ok(ts) => Self::Timestamp(ts.with_timezone(&Utc)),
                Err(_) => Self::Text(s.clone()),
            },
            other => Self::Text(other.to_string()),
        }
    }

    /// Storage type code of the populated slot.
    pub fn type_code(&self) -> &'static str {
        match self {
            Self::Text(_) => "STRING",
            Self::Timestamp(_) => "DATE",
            Self::Integer(_) => "LONG",
            Self::Float(_) => "DOUBLE",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl core::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<DateTime<Utc>> for ParameterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Text(value.to_string())
    }
}

/// The parameter mapping a job is launched with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters(BTreeMap<String, ParameterValue>);

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParameterValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in lexical key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    /// Build from a JSON object, typing each value with [`ParameterValue::from_json`].
    pub fn from_json_map(map: &serde_json::Map<String, JsonValue>) -> Self {
        Self(
            map.iter()
                .map(|(k, v)| (k.clone(), ParameterValue::from_json(v)))
                .collect(),
        )
    }

    /// Canonical, order-independent encoding identifying a job instance.
    pub fn job_key(&self) -> String {
        let mut key = String::from("{");
        for (idx, (name, value)) in self.0.iter().enumerate() {
            if idx > 0 {
                key.push(',');
            }
            // Keys are JSON-escaped so delimiters inside names cannot collide.
            key.push_str(&JsonValue::String(name.clone()).to_string());
            key.push(':');
            key.push_str(value.type_code());
            key.push('=');
            key.push_str(&JsonValue::String(value.to_string()).to_string());
        }
        key.push('}');
        key
    }

    /// Rows to persist for a newly created instance.
    pub fn to_records(&self, job_instance_id: JobInstanceId) -> Vec<JobParameter> {
        self.0
            .iter()
            .map(|(key_name, value)| JobParameter {
                job_instance_id,
                key_name: key_name.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for JobParameters
where
    K: Into<String>,
    V: Into<ParameterValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Persisted parameter row, written once alongside its instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub job_instance_id: JobInstanceId,
    pub key_name: String,
    #[serde(flatten)]
    pub value: ParameterValue,
}
