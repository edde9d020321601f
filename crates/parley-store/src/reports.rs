//! Abuse reports filed against other users.
//!
//! Reports are write-mostly and reviewed out of band, so each one is a
//! standalone pretty-printed JSON file named by a generated id.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use parley_shared::UserId;

use crate::error::{Result, StoreError};
use crate::paths::child_file;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub reporter: UserId,
    pub reported: UserId,
    pub reason: String,
    /// Client-supplied timestamp, kept as sent.
    #[serde(default)]
    pub time: Option<serde_json::Value>,
}

/// A persisted report together with the id it was filed under.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredReport {
    pub id: String,
    #[serde(flatten)]
    pub report: Report,
}

#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!(path = %dir.display(), "Report store initialized");
        Ok(Self { dir })
    }

    /// Persist a report and return its generated id.
    pub async fn save(&self, report: &Report) -> Result<String> {
        let id = generate_id();
        let path = child_file(&self.dir, &format!("{id}.json"))?;
        let data = serde_json::to_vec_pretty(report)?;
        fs::write(&path, data).await?;

        info!(
            id = %id,
            reporter = %report.reporter,
            reported = %report.reported,
            "Report filed"
        );
        Ok(id)
    }

    pub async fn load(&self, id: &str) -> Result<Report> {
        let path = child_file(&self.dir, &format!("{id}.json"))?;
        if !path.exists() {
            return Err(StoreError::NotFound);
        }
        let raw = fs::read(&path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Every readable report, oldest first. Files that do not parse are
    /// skipped.
    pub async fn list(&self) -> Result<Vec<StoredReport>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut reports = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(".json"))
            else {
                continue;
            };

            let raw = fs::read(&path).await?;
            match serde_json::from_slice::<Report>(&raw) {
                Ok(report) => reports.push(StoredReport {
                    id: id.to_string(),
                    report,
                }),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable report"),
            }
        }
        reports.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(reports)
    }
}

/// `<epoch millis>-<random>`, sortable by filing time.
pub(crate) fn generate_id() -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &nonce[..10])
}
