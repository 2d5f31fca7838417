//! Durable record of a submission.
//!
//! One [`SubmitStatusFile`] exists per submitted simulation. The planner adds every file it discovers (skipped
//! files included) before the transfer starts, and the driver moves the status through
//! `unknown -> inprogress -> completed`, or to `errored` from any state. Each transition is persisted by
//! overwriting `mdrepo-submission.<token>.json` in the submission's target collection.

use anyhow::{Context, Result, anyhow};
use tracing::instrument;

use crate::config::{SUBMISSION_STATUS_PREFIX, SUBMISSION_STATUS_SUFFIX};
use crate::error::{Error, from_remote};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubmitStatus {
    #[default]
    Unknown,
    InProgress,
    Errored,
    Completed,
}

impl SubmitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitStatus::Unknown => "unknown",
            SubmitStatus::InProgress => "inprogress",
            SubmitStatus::Errored => "errored",
            SubmitStatus::Completed => "completed",
        }
    }

    fn can_become(&self, next: SubmitStatus) -> bool {
        matches!(
            (self, next),
            (_, SubmitStatus::Errored)
                | (SubmitStatus::Unknown, SubmitStatus::InProgress)
                | (SubmitStatus::InProgress, SubmitStatus::Completed)
        ) || *self == next
    }
}

impl std::str::FromStr for SubmitStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "unknown" => Ok(SubmitStatus::Unknown),
            "inprogress" => Ok(SubmitStatus::InProgress),
            "errored" => Ok(SubmitStatus::Errored),
            "completed" => Ok(SubmitStatus::Completed),
            _ => Err(Error::InvalidSubmitStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SubmitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for SubmitStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for SubmitStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubmitStatusEntry {
    /// Path relative to the submission's target collection
    #[serde(rename = "irods_path")]
    pub relative_path: String,
    pub size: u64,
    #[serde(rename = "md5_hash")]
    pub md5: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubmitStatusFile {
    #[serde(rename = "total_filenum")]
    pub total_file_count: u64,
    #[serde(rename = "total_filesize")]
    pub total_file_size: u64,
    #[serde(default)]
    pub token: String,
    pub status: SubmitStatus,
    #[serde(default)]
    pub files: Vec<SubmitStatusEntry>,
    #[serde(default = "chrono::Utc::now")]
    pub time: chrono::DateTime<chrono::Utc>,
}

impl SubmitStatusFile {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            total_file_count: 0,
            total_file_size: 0,
            token: token.into(),
            status: SubmitStatus::Unknown,
            files: Vec::new(),
            time: chrono::Utc::now(),
        }
    }

    pub fn add_file(&mut self, entry: SubmitStatusEntry) {
        self.total_file_count += 1;
        self.total_file_size += entry.size;
        self.files.push(entry);
    }

    pub fn status(&self) -> SubmitStatus {
        self.status
    }

    pub fn set_status(&mut self, next: SubmitStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(anyhow!(
                "submission status cannot change from {} to {}",
                self.status,
                next
            ));
        }
        self.status = next;
        Ok(())
    }

    pub fn set_in_progress(&mut self) -> Result<()> {
        self.set_status(SubmitStatus::InProgress)
    }

    pub fn set_completed(&mut self) -> Result<()> {
        self.set_status(SubmitStatus::Completed)
    }

    pub fn set_errored(&mut self) {
        self.status = SubmitStatus::Errored;
    }

    /// `mdrepo-submission.<token>.json`; characters unsafe in a file name are replaced.
    pub fn filename(&self) -> String {
        let scope: String = self
            .token
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "-_.=".contains(c) { c } else { '_' })
            .collect();
        let scope = if scope.is_empty() { "unknown".to_string() } else { scope };
        format!("{SUBMISSION_STATUS_PREFIX}{scope}{SUBMISSION_STATUS_SUFFIX}")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize submission status")
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("failed to parse submission status")
    }

    /// Writes the record into `target_dir`, replacing any previous version.
    #[instrument(skip(self, session), fields(status = %self.status))]
    pub async fn persist<S: remote::RemoteFilesystem>(&mut self, session: &S, target_dir: &str) -> Result<()> {
        self.time = chrono::Utc::now();
        let path = remote::join(target_dir, &self.filename());
        let json = self.to_json()?;
        session
            .upload_from_buffer(json.as_bytes(), &path)
            .await
            .map_err(from_remote)
            .with_context(|| format!("failed to write submission status to {:?}", path))?;
        tracing::debug!("persisted submission status {} to {:?}", self.status, path);
        Ok(())
    }
}
