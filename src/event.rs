//! Decoding of raw Spark listener events into a closed set of kinds.
//!
//! Spark writes one JSON object per event with the listener name under the
//! `Event` key. Field spellings drift between Spark versions, so each field
//! is read leniently and unknown kinds become `Unrecognized` data.
use serde_json::Value;

const APPLICATION_START: &str = "SparkListenerApplicationStart";
const APPLICATION_END: &str = "SparkListenerApplicationEnd";
const ENVIRONMENT_UPDATE: &str = "SparkListenerEnvironmentUpdate";
const STAGE_SUBMITTED: &str = "SparkListenerStageSubmitted";
const JOB_START: &str = "SparkListenerJobStart";
const EXECUTOR_ADDED: &str = "SparkListenerExecutorAdded";
const EXECUTOR_REMOVED: &str = "SparkListenerExecutorRemoved";

/// One recognised event from a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SparkEvent {
    ApplicationStart {
        app_id: Option<String>,
        app_name: Option<String>,
        timestamp: Option<i64>,
    },
    ApplicationEnd {
        timestamp: Option<i64>,
    },
    /// Environment snapshot, or per-stage/per-job properties. Both carry
    /// the resolved Spark configuration as key/value pairs.
    Config {
        properties: Vec<(String, String)>,
    },
    ExecutorAdded {
        executor_id: String,
        timestamp: Option<i64>,
        total_cores: Option<u32>,
    },
    ExecutorRemoved {
        executor_id: String,
        timestamp: Option<i64>,
    },
    Unrecognized {
        kind: String,
    },
}

impl SparkEvent {
    /// Timestamp carried by the event, if any.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            SparkEvent::ApplicationStart { timestamp, .. }
            | SparkEvent::ApplicationEnd { timestamp }
            | SparkEvent::ExecutorAdded { timestamp, .. }
            | SparkEvent::ExecutorRemoved { timestamp, .. } => *timestamp,
            SparkEvent::Config { .. } | SparkEvent::Unrecognized { .. } => None,
        }
    }
}

/// Why a single log entry could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    NotAnObject,
    MissingKind,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::NotAnObject => write!(f, "event is not a JSON object"),
            DecodeError::MissingKind => write!(f, "event has no `Event` tag"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode one JSON value into a `SparkEvent`.
pub fn decode(v: &Value) -> Result<SparkEvent, DecodeError> {
    if !v.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let kind = v
        .get("Event")
        .and_then(|k| k.as_str())
        .ok_or(DecodeError::MissingKind)?;

    let event = match kind {
        APPLICATION_START => SparkEvent::ApplicationStart {
            app_id: string_field(v, &["App ID", "App Id"]),
            app_name: string_field(v, &["App Name"]),
            timestamp: timestamp_field(v),
        },
        APPLICATION_END => SparkEvent::ApplicationEnd {
            timestamp: timestamp_field(v),
        },
        ENVIRONMENT_UPDATE => SparkEvent::Config {
            properties: property_pairs(v.get("Spark Properties")),
        },
        STAGE_SUBMITTED | JOB_START => SparkEvent::Config {
            properties: property_pairs(v.get("Properties")),
        },
        EXECUTOR_ADDED => SparkEvent::ExecutorAdded {
            executor_id: string_field(v, &["Executor ID"]).unwrap_or_default(),
            timestamp: timestamp_field(v),
            total_cores: v
                .get("Executor Info")
                .and_then(|info| info.get("Total Cores"))
                .and_then(as_i64)
                .and_then(|c| u32::try_from(c).ok()),
        },
        EXECUTOR_REMOVED => SparkEvent::ExecutorRemoved {
            executor_id: string_field(v, &["Executor ID"]).unwrap_or_default(),
            timestamp: timestamp_field(v),
        },
        other => SparkEvent::Unrecognized {
            kind: other.to_string(),
        },
    };
    Ok(event)
}

fn string_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| v.get(*k))
        .find_map(scalar_to_string)
}

fn timestamp_field(v: &Value) -> Option<i64> {
    v.get("Timestamp").and_then(as_i64)
}

/// Integers written as numbers, floats or numeric strings.
fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Properties arrive as an object, or as `[[key, value], ...]` in older logs.
fn property_pairs(v: Option<&Value>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = match v {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, val)| scalar_to_string(val).map(|s| (k.clone(), s)))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let pair = item.as_array()?;
                let key = pair.first()?.as_str()?;
                let val = scalar_to_string(pair.get(1)?)?;
                Some((key.to_string(), val))
            })
            .collect(),
        _ => Vec::new(),
    };
    pairs.sort();
    pairs
}
