use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Prefix carried by every failure message stored in a status record.
pub const ERROR_MARKER: &str = "Error:";

/// Status of a diagnosis job as seen by polling clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiagnosisStatus {
    Processing,
    Completed,
    Failed,
}

/// Cached state of one diagnosis job. Also the body of the status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRecord {
    pub status: DiagnosisStatus,
    /// Rendered HTML when completed, error message when failed.
    pub diagnosis: Option<String>,
}

impl StatusRecord {
    pub fn processing() -> Self {
        Self {
            status: DiagnosisStatus::Processing,
            diagnosis: None,
        }
    }

    pub fn completed(html: String) -> Self {
        Self {
            status: DiagnosisStatus::Completed,
            diagnosis: Some(html),
        }
    }

    pub fn failed(reason: impl fmt::Display) -> Self {
        Self {
            status: DiagnosisStatus::Failed,
            diagnosis: Some(format!("{ERROR_MARKER} {reason}")),
        }
    }
}

/// A raw cache value decoded into one of the shapes the service has written
/// over time.
///
/// Current entries are JSON objects. Entries left by older deployments are a
/// bare string: `"processing"`, an `"Error: ..."` message or the rendered
/// HTML itself.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedStatus {
    Structured {
        status: Option<String>,
        diagnosis: Option<String>,
    },
    Legacy(String),
    Unrecognized,
}

impl CachedStatus {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => CachedStatus::Structured {
                status: map.get("status").and_then(Value::as_str).map(str::to_owned),
                diagnosis: map
                    .get("diagnosis")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            Ok(Value::String(text)) => CachedStatus::Legacy(text),
            Ok(_) => CachedStatus::Unrecognized,
            // Pre-JSON entries were stored as plain text.
            Err(_) => CachedStatus::Legacy(raw.to_string()),
        }
    }

    pub fn into_record(self) -> StatusRecord {
        match self {
            CachedStatus::Structured { status, diagnosis } => StatusRecord {
                status: status
                    .as_deref()
                    .and_then(|s| DiagnosisStatus::from_str(s).ok())
                    .unwrap_or(DiagnosisStatus::Processing),
                diagnosis,
            },
            CachedStatus::Legacy(text) if text == "processing" => StatusRecord::processing(),
            CachedStatus::Legacy(text) if text.starts_with(ERROR_MARKER) => StatusRecord {
                status: DiagnosisStatus::Failed,
                diagnosis: Some(text),
            },
            CachedStatus::Legacy(text) => StatusRecord::completed(text),
            CachedStatus::Unrecognized => StatusRecord::processing(),
        }
    }
}

/// Payload handed to the background workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisJob {
    pub job_id: Uuid,
    /// Blob store paths of the uploaded images, in upload order.
    pub image_paths: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl DiagnosisJob {
    pub fn new(image_paths: Vec<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            image_paths,
            enqueued_at: Utc::now(),
        }
    }
}
