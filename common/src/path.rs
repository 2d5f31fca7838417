//! Canonical forms for local and store paths.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{LANDING_PATH, RELEASE_PATH};
use crate::error::from_remote;

/// Lexically cleans a `/`-separated store path: drops `.` and empty segments, resolves `..`.
pub fn clean_remote(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn make_rooted(root: &str, path: &str) -> String {
    if path.starts_with('/') {
        clean_remote(path)
    } else {
        clean_remote(&format!("{root}/{path}"))
    }
}

/// Store path of an upload target; relative paths are taken under the landing root, absolute ones are cleaned.
pub fn make_landing_path(path: &str) -> String {
    make_rooted(LANDING_PATH, path)
}

/// Store path of a download source; relative paths are taken under the release root.
pub fn make_release_path(path: &str) -> String {
    make_rooted(RELEASE_PATH, path)
}

/// Location of a released simulation relative to the release root, used to lay out downloads locally.
pub fn simulation_rel_path(path: &str) -> String {
    let cleaned = make_release_path(path);
    match cleaned.strip_prefix(RELEASE_PATH) {
        Some(rest) if !rest.trim_matches('/').is_empty() => rest.trim_matches('/').to_string(),
        _ => remote::basename(&cleaned).to_string(),
    }
}

/// Absolute, lexically cleaned local path.
pub fn make_local_path(path: &Path) -> Result<PathBuf> {
    let absolute =
        std::path::absolute(path).with_context(|| format!("failed to make {:?} absolute", path))?;
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    Ok(cleaned)
}

/// Destination of a single-file download: inside `target` when it is an existing directory.
pub async fn target_local_file_path(source: &str, target: &Path) -> PathBuf {
    match tokio::fs::metadata(target).await {
        Ok(md) if md.is_dir() => target.join(remote::basename(source)),
        _ => target.to_path_buf(),
    }
}

/// Destination of a single-file upload: inside `target` when it is an existing collection.
pub async fn target_remote_file_path<S: remote::RemoteFilesystem>(
    session: &S,
    source: &Path,
    target: &str,
) -> Result<String> {
    match session.stat(target).await {
        Ok(entry) if entry.is_dir => {
            let name = source
                .file_name()
                .with_context(|| format!("{:?} has no file name", source))?;
            Ok(remote::join(target, &name.to_string_lossy()))
        }
        Ok(_) => Ok(target.to_string()),
        Err(err) if err.is_not_found() => Ok(target.to_string()),
        Err(err) => Err(from_remote(err)).with_context(|| format!("failed to stat {:?}", target)),
    }
}

/// True for submission status file names.
pub fn is_status_file(name: &str) -> bool {
    name.starts_with(crate::config::SUBMISSION_STATUS_PREFIX)
        && name.ends_with(crate::config::SUBMISSION_STATUS_SUFFIX)
}
