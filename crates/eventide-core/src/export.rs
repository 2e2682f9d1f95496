//! Export job records
//!
//! The export pipeline itself (rendering CSV/JSON/Excel/PDF) lives outside
//! this workspace; the core only tracks job rows so the expiry sweep can
//! reclaim completed exports and their files.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Json,
    Excel,
    Pdf,
    Parquet,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Excel => "excel",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Parquet => "parquet",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "excel" => Ok(ExportFormat::Excel),
            "pdf" => Ok(ExportFormat::Pdf),
            "parquet" => Ok(ExportFormat::Parquet),
            other => Err(Error::Validation(format!("Unknown export format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Pending => "pending",
            ExportStatus::Processing => "processing",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
            ExportStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ExportStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExportStatus::Pending),
            "processing" => Ok(ExportStatus::Processing),
            "completed" => Ok(ExportStatus::Completed),
            "failed" => Ok(ExportStatus::Failed),
            "cancelled" => Ok(ExportStatus::Cancelled),
            other => Err(Error::Validation(format!("Unknown export status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: String,
    pub name: String,
    pub export_type: String,
    pub format: ExportFormat,
    pub query_params: Option<serde_json::Value>,

    pub status: ExportStatus,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub row_count: Option<i64>,
    pub error_message: Option<String>,

    pub user_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Completed jobs past this instant are swept by the janitor.
    pub expires_at: Option<DateTime<Utc>>,
}
