use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Comprehensive error types for export operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExportError {
    /// I/O related errors
    Io(String),
    /// Serialization errors
    Serialization(String),
    /// Communication channel closed unexpectedly
    ChannelClosed,
    /// Export queue is full
    QueueFull,
    /// Database error
    Database(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Io(msg) => write!(f, "I/O error: {}", msg),
            ExportError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ExportError::ChannelClosed => write!(f, "Communication channel closed"),
            ExportError::QueueFull => write!(f, "Export queue is full"),
            ExportError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<DomainError> for ExportError {
    fn from(error: DomainError) -> Self {
        ExportError::Database(error.to_string())
    }
}

impl From<std::io::Error> for ExportError {
    fn from(error: std::io::Error) -> Self {
        ExportError::Io(error.to_string())
    }
}

/// Export statistics for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportStats {
    pub records_written: usize,
    pub bytes_written: usize,
    /// Values whose column was not part of the header and were left out.
    pub dropped_fields: usize,
    pub duration_ms: u64,
}

/// How the CSV header is decided.
///
/// The header has to be on the wire before the first row, so the column set is
/// fixed once per export. Values whose key is not in the header are dropped
/// (and counted), header columns a record lacks are written empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvSchema {
    /// Columns known upfront. The header is written even when there are no rows.
    Fixed(Vec<String>),
    /// Columns taken from the first record's keys, in order. No rows, no header.
    Inferred,
}

impl CsvSchema {
    pub fn fixed<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fixed(columns.into_iter().map(Into::into).collect())
    }
}

/// Export job statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Pending => "pending",
            ExportStatus::Processing => "processing",
            ExportStatus::Done => "done",
            ExportStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExportStatus::Pending),
            "processing" => Some(ExportStatus::Processing),
            "done" => Some(ExportStatus::Done),
            "error" => Some(ExportStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Done | ExportStatus::Error)
    }
}

/// Row mapped to the `export_status` table; also the shape of the dashboard
/// status feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub export_id: String,
    pub survey_id: String,
    pub user_id: String,
    pub updated: DateTime<Utc>,
    pub status: ExportStatus,
    pub export_link: Option<String>,
    /// Name of the written file inside the export directory. Not part of the feed.
    #[serde(skip)]
    pub file_name: Option<String>,
}

/// A request to export one survey for its owner in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub export_id: String,
    pub user_id: String,
    pub survey_id: String,
}
