#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0:?} does not exist")]
    NotFound(String),
    #[error("{0:?} is not a collection")]
    NotADirectory(String),
    #[error("{0:?} is not a data object")]
    NotAFile(String),
    #[error("{path:?} is not an absolute path inside zone {zone:?}")]
    OutsideZone { path: String, zone: String },
    #[error("{path:?} is outside the collection {collection:?} granted by the ticket")]
    OutsideTicket { path: String, collection: String },
    #[error("unknown checksum algorithm {0:?}")]
    UnknownChecksumAlgorithm(String),
    #[error("malformed checksum string {0:?}")]
    MalformedChecksum(String),
    #[error("session has been released")]
    Released,
    #[error("connection pool is unavailable")]
    Pool(#[from] throttle::Error),
    #[error("i/o failure on {path:?}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Maps a local i/o failure, keeping "not found" as its own kind.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path),
            _ => Error::Io { path, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
