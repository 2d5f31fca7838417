//! Submission metadata (`mdrepo-metadata.toml`)
//!
//! The file is TOML-shaped, but only a handful of keys matter to the transfer, so it is read with a small
//! line-oriented grammar instead of a full TOML parser:
//!
//! - blank lines and lines starting with `#` are ignored
//! - `[name]` opens a table, `[[name]]` opens a new element of an array of tables
//! - `key = value` assigns; the first `=` is the delimiter, the key may be quoted, the value may be a basic
//!   (`"..."`) or literal (`'...'`) string or a bare word, and a trailing `# comment` after it is dropped
//! - a value opening a multi-line string (`"""` or `'''`) extends to the line that closes it
//! - anything else (array continuation lines, inline tables spread over lines) is skipped
//!
//! Recognized keys:
//!
//! | section              | key                          | meaning                                  |
//! |----------------------|------------------------------|------------------------------------------|
//! | top level, `[initial]` | `lead_contributor_orcid`   | submitter ORC-ID                         |
//! | top level, `[initial]` | `primary_contributor_orcid`| submitter ORC-ID, used when no lead      |
//! | `[required_files]`   | `trajectory_file_name`       | required, relative to the submission dir |
//! | `[required_files]`   | `structure_file_name`        | required                                 |
//! | `[required_files]`   | `topology_file_name`         | required                                 |
//! | `[required_files]`   | any other key                | extra required file                      |
//! | `[[additional_files]]` | `additional_file_name`     | optional file, one per table             |
//!
//! Every other key and section is accepted and ignored.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::SUBMISSION_METADATA_FILENAME;
use crate::error::{Error, from_io};

pub const LEAD_CONTRIBUTOR_ORCID: &str = "lead_contributor_orcid";
pub const PRIMARY_CONTRIBUTOR_ORCID: &str = "primary_contributor_orcid";
pub const REQUIRED_FILE_KEYS: [&str; 3] = [
    "trajectory_file_name",
    "structure_file_name",
    "topology_file_name",
];
pub const ADDITIONAL_FILE_NAME: &str = "additional_file_name";

const INITIAL_SECTION: &str = "initial";
const REQUIRED_FILES_SECTION: &str = "required_files";
const ADDITIONAL_FILES_SECTION: &str = "additional_files";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitMetadata {
    /// Directory holding the metadata file; file names are relative to it
    pub submission_dir: PathBuf,
    pub lead_contributor_orcid: Option<String>,
    pub primary_contributor_orcid: Option<String>,
    /// `(key, file name)` pairs from `[required_files]`, in file order
    pub required_files: Vec<(String, String)>,
    pub additional_files: Vec<String>,
}

pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(SUBMISSION_METADATA_FILENAME)
}

/// A directory is a simulation when it holds a non-empty metadata file.
pub async fn has_metadata(dir: &Path) -> bool {
    match tokio::fs::metadata(metadata_path(dir)).await {
        Ok(md) => md.is_file() && md.len() > 0,
        Err(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Section {
    Root,
    Table(String),
    ArrayElement(String),
}

/// Parses the value part of an assignment; returns `None` for values the grammar skips.
fn parse_value(raw: &str) -> Option<String> {
    let raw = raw.trim();
    for quote in ['"', '\''] {
        if let Some(rest) = raw.strip_prefix(quote) {
            let end = rest.find(quote)?;
            return Some(rest[..end].to_string());
        }
    }
    if raw.starts_with('[') || raw.starts_with('{') {
        return None;
    }
    let bare = match raw.find('#') {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    Some(bare.trim().to_string())
}

fn parse_key(raw: &str) -> String {
    raw.trim().trim_matches(|c| c == '"' || c == '\'').to_string()
}

impl SubmitMetadata {
    pub fn parse(text: &str, submission_dir: &Path) -> Self {
        let mut metadata = SubmitMetadata {
            submission_dir: submission_dir.to_path_buf(),
            ..Default::default()
        };
        let mut section = Section::Root;
        let mut open_multiline: Option<&str> = None;
        for line in text.lines() {
            let line = line.trim();
            if let Some(delimiter) = open_multiline {
                if line.contains(delimiter) {
                    open_multiline = None;
                }
                continue;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix("[[").and_then(|l| l.split("]]").next()) {
                section = Section::ArrayElement(name.trim().to_string());
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.split(']').next()) {
                section = Section::Table(name.trim().to_string());
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = parse_key(key);
            let value_text = value.trim();
            if let Some(delimiter) = ["\"\"\"", "'''"].into_iter().find(|d| value_text.starts_with(d)) {
                if !value_text[3..].contains(delimiter) {
                    open_multiline = Some(delimiter);
                }
                continue;
            }
            let Some(value) = parse_value(value_text) else {
                continue;
            };
            metadata.assign(&section, &key, value);
        }
        metadata
    }

    fn assign(&mut self, section: &Section, key: &str, value: String) {
        let in_initial = match section {
            Section::Root => true,
            Section::Table(name) => name == INITIAL_SECTION,
            Section::ArrayElement(_) => false,
        };
        match (section, key) {
            (_, LEAD_CONTRIBUTOR_ORCID) if in_initial => {
                self.lead_contributor_orcid.get_or_insert(value);
            }
            (_, PRIMARY_CONTRIBUTOR_ORCID) if in_initial => {
                self.primary_contributor_orcid.get_or_insert(value);
            }
            (Section::Table(name), _) if name == REQUIRED_FILES_SECTION => {
                self.required_files.push((key.to_string(), value));
            }
            (Section::ArrayElement(name), ADDITIONAL_FILE_NAME) if name == ADDITIONAL_FILES_SECTION => {
                self.additional_files.push(value);
            }
            _ => {}
        }
    }

    /// Reads `mdrepo-metadata.toml` from a submission directory.
    pub async fn read_dir(dir: &Path) -> Result<Self> {
        let path = metadata_path(dir);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| from_io(&path, err))
            .with_context(|| format!("failed to read submission metadata {:?}", path))?;
        Ok(Self::parse(&text, dir))
    }

    pub fn orcid(&self) -> Option<&str> {
        self.lead_contributor_orcid
            .as_deref()
            .or(self.primary_contributor_orcid.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Data files named by the metadata (required first, then additional).
    pub fn files(&self) -> Vec<String> {
        self.required_files
            .iter()
            .map(|(_, file)| file.clone())
            .chain(self.additional_files.iter().cloned())
            .collect()
    }

    /// Everything a submission uploads: the data files plus the metadata file itself.
    pub fn upload_files(&self) -> Vec<String> {
        let mut files = self.files();
        files.push(SUBMISSION_METADATA_FILENAME.to_string());
        files
    }

    /// Checks required keys, file presence and total size, reporting every problem at once.
    pub async fn validate_files(&self, max_simulation_size: u64) -> Result<(), Error> {
        let mut problems = Vec::new();
        let mut total_size = 0u64;
        for required in REQUIRED_FILE_KEYS {
            if !self.required_files.iter().any(|(key, _)| key == required) {
                problems.push(format!("field '{required}' not found"));
            }
        }
        let described = self
            .required_files
            .iter()
            .map(|(key, file)| ("required", key.as_str(), file))
            .chain(
                self.additional_files
                    .iter()
                    .map(|file| ("additional", ADDITIONAL_FILE_NAME, file)),
            );
        for (kind, key, file) in described {
            let path = self.submission_dir.join(file);
            match tokio::fs::metadata(&path).await {
                Ok(md) if md.is_file() => total_size += md.len(),
                Ok(_) => problems.push(format!("{kind} file {key:?} at {path:?} is not a file")),
                Err(_) => problems.push(format!("{kind} file {key:?} described in metadata {path:?} not found")),
            }
        }
        if total_size > max_simulation_size {
            problems.push(format!(
                "total size of each simulation must not exceed {} bytes, current {}",
                max_simulation_size, total_size
            ));
        }
        if problems.is_empty() {
            return Ok(());
        }
        for problem in &problems {
            tracing::error!("{}: {}", self.submission_dir.display(), problem);
        }
        Err(Error::InvalidSubmitMetadata(problems))
    }
}
