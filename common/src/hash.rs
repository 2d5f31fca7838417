//! Content digests for skip decisions and integrity checks.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::instrument;

pub use remote::checksum::{Checksum, ChecksumAlgorithm};

use crate::error::from_io;

#[instrument]
pub async fn hash_file(path: &Path, algorithm: ChecksumAlgorithm) -> Result<Checksum> {
    remote::checksum::hash_file(path, algorithm)
        .await
        .map_err(|err| from_io(path, err))
        .with_context(|| format!("failed to compute {} of {:?}", algorithm, path))
}

/// Hex MD5 of a local file, as recorded in submission status files.
pub async fn md5_hex(path: &Path) -> Result<String> {
    Ok(hash_file(path, ChecksumAlgorithm::Md5).await?.encoded())
}

/// Whether an existing local file has the given size and checksum.
///
/// A missing file, a different size or an absent/empty checksum all mean "does not match".
#[instrument(skip(expected))]
pub async fn local_file_matches(path: &Path, size: u64, expected: Option<&Checksum>) -> Result<bool> {
    let md = match tokio::fs::metadata(path).await {
        Ok(md) => md,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(from_io(path, err)),
    };
    if !md.is_file() || md.len() != size {
        return Ok(false);
    }
    let Some(expected) = expected.filter(|c| !c.is_empty()) else {
        tracing::debug!("no checksum advertised for {:?}, cannot skip", path);
        return Ok(false);
    };
    let actual = hash_file(path, expected.algorithm).await?;
    Ok(actual == *expected)
}

/// The checksum a store advertises for `entry`, or one it computes on request.
pub async fn remote_checksum<S: remote::RemoteFilesystem>(session: &S, entry: &remote::Entry) -> Result<Checksum> {
    match &entry.checksum {
        Some(checksum) if !checksum.is_empty() => Ok(checksum.clone()),
        _ => session
            .checksum(&entry.path)
            .await
            .map_err(crate::error::from_remote)
            .with_context(|| format!("failed to checksum {:?}", entry.path)),
    }
}

/// Fails unless the local file's digest equals `expected`.
pub async fn verify_file(path: &Path, expected: &Checksum) -> Result<()> {
    if expected.is_empty() {
        return Err(anyhow!("no {} checksum to verify {:?} against", expected.algorithm, path));
    }
    let actual = hash_file(path, expected.algorithm).await?;
    if actual != *expected {
        return Err(anyhow!(
            "checksum mismatch for {:?}: expected {}, got {}",
            path,
            expected,
            actual
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn matching_rules() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("f.txt");
        tokio::fs::write(&path, "0123456789").await?;
        let md5 = remote::checksum::hash_bytes(b"0123456789", ChecksumAlgorithm::Md5);
        let sha = remote::checksum::hash_bytes(b"0123456789", ChecksumAlgorithm::Sha256);
        assert!(local_file_matches(&path, 10, Some(&md5)).await?);
        assert!(local_file_matches(&path, 10, Some(&sha)).await?);
        assert!(!local_file_matches(&path, 11, Some(&md5)).await?);
        assert!(!local_file_matches(&path, 10, None).await?);
        let other = remote::checksum::hash_bytes(b"9876543210", ChecksumAlgorithm::Md5);
        assert!(!local_file_matches(&path, 10, Some(&other)).await?);
        assert!(!local_file_matches(&tmp.path().join("missing"), 10, Some(&md5)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn verify_reports_mismatch() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("f.txt");
        tokio::fs::write(&path, "abc").await?;
        verify_file(&path, &remote::checksum::hash_bytes(b"abc", ChecksumAlgorithm::Sha1)).await?;
        assert!(
            verify_file(&path, &remote::checksum::hash_bytes(b"abd", ChecksumAlgorithm::Sha1))
                .await
                .is_err()
        );
        assert_eq!(md5_hex(&path).await?, "900150983cd24fb0d6963f7d28e17f72");
        Ok(())
    }
}
