//! Error kinds surfaced to the user.
//!
//! Errors are raised as one of the [`Error`] variants at the point of origin and then travel upward inside an
//! [`anyhow::Error`], each layer adding context with `with_context(|| format!(...))`. Context never changes the
//! kind: [`kind`] finds the original variant anywhere in the chain, which is what the binary matches on when it
//! renders the final message.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid ticket string {0:?}")]
    InvalidTicket(String),
    #[error("failed to decrypt ticket payload: {0}")]
    DecryptFailed(String),
    #[error("service error: {0}")]
    Service(String),
    #[error("failed to reach {url}")]
    Dial {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("WebDAV request to {url} failed with status {status}")]
    WebDav { url: String, status: u16 },
    #[error("{0:?} does not exist")]
    NotFound(String),
    #[error("{0:?} is not a directory")]
    NotDirectory(String),
    #[error("{0:?} is not a file")]
    NotFile(String),
    #[error("expected {expected} simulation(s) but found {}", valid.len())]
    SimulationCountMismatch {
        expected: usize,
        valid: Vec<PathBuf>,
        invalid: Vec<(PathBuf, String)>,
    },
    #[error("invalid submission metadata: {}", .0.join("; "))]
    InvalidSubmitMetadata(Vec<String>),
    #[error("submission metadata rejected by the service: {}", .0.join("; "))]
    MetadataVerification(Vec<String>),
    #[error("token not provided")]
    TokenNotProvided,
    #[error("invalid ORC-ID: {0}")]
    InvalidOrcId(String),
    #[error("invalid submission status {0:?}")]
    InvalidSubmitStatus(String),
}

/// Finds the error kind anywhere in a context chain.
pub fn kind(error: &anyhow::Error) -> Option<&Error> {
    error.chain().find_map(|cause| cause.downcast_ref::<Error>())
}

/// Translates a remote store failure, keeping existence and type mismatches as their own kinds.
pub fn from_remote(error: remote::Error) -> anyhow::Error {
    match error {
        remote::Error::NotFound(path) => Error::NotFound(path).into(),
        remote::Error::NotADirectory(path) => Error::NotDirectory(path).into(),
        remote::Error::NotAFile(path) => Error::NotFile(path).into(),
        other => other.into(),
    }
}

/// Same as [`from_remote`] for local i/o.
pub fn from_io(path: &std::path::Path, error: std::io::Error) -> anyhow::Error {
    match error.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()).into(),
        _ => anyhow::Error::new(error).context(format!("i/o failure on {:?}", path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_survives_context() {
        let err: anyhow::Result<()> = Err(Error::NotFound("/x".to_string()).into());
        let err = err
            .context("failed to stat")
            .with_context(|| format!("failed to get {:?}", "/x"))
            .unwrap_err();
        assert!(matches!(kind(&err), Some(Error::NotFound(path)) if path == "/x"));
    }

    #[test]
    fn remote_kinds_are_translated() {
        let err = from_remote(remote::Error::NotAFile("/a".to_string()));
        assert!(matches!(kind(&err), Some(Error::NotFile(_))));
        let err = from_remote(remote::Error::Released);
        assert!(kind(&err).is_none());
    }

    #[test]
    fn metadata_errors_are_listed() {
        let err = Error::InvalidSubmitMetadata(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "invalid submission metadata: a; b");
    }
}
