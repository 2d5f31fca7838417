//! Remote store sessions
//!
//! This crate is the boundary between the transfer core and the ticket-scoped remote store. It defines what a
//! session can do ([`RemoteFilesystem`]), how sessions are opened ([`Connector`]), and the records that cross
//! the boundary ([`Entry`], [`checksum::Checksum`]).
//!
//! # Connection model
//!
//! Every session owns two pools:
//!
//! - **I/O connections** (`SessionConfig::io_connections`): one per concurrent transfer stream. A parallel
//!   transfer with `threads = n` opens up to `n` streams.
//! - **Metadata connections** (`SessionConfig::metadata_connections`, normally 2): used for stat/list so
//!   directory walking keeps progressing while all I/O connections are busy.
//!
//! The total connection ceiling of a session is therefore `io_connections + metadata_connections`.
//!
//! # Implementations
//!
//! [`mount::MountConnector`] serves a zone that is mounted into the local filesystem (FUSE/NFS mount of the
//! data store, or a plain directory in tests). Remote paths such as `/iplant/home/...` are resolved below the
//! mount root.

pub mod checksum;
mod error;
pub mod mount;

pub use checksum::{Checksum, ChecksumAlgorithm};
pub use error::Error;

/// Progress notifications for a single transfer: `(processed_bytes, total_bytes)`.
pub type ProgressCallback = std::sync::Arc<dyn Fn(i64, i64) + Send + Sync>;

/// Identity used to open a session; `ticket` grants access to `collection` and everything below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub host: String,
    pub port: u16,
    pub zone: String,
    pub user: String,
    pub ticket: String,
    /// Absolute store path the ticket was issued for; sessions refuse paths outside it.
    pub collection: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub io_connections: usize,
    pub metadata_connections: usize,
    pub tcp_buffer_size: usize,
    /// Algorithm the store uses when advertising checksums.
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl SessionConfig {
    pub const METADATA_CONNECTIONS: usize = 2;

    pub fn new(io_connections: usize, tcp_buffer_size: usize) -> Self {
        Self {
            io_connections: io_connections.max(1),
            metadata_connections: Self::METADATA_CONNECTIONS,
            tcp_buffer_size: tcp_buffer_size.max(4096),
            checksum_algorithm: ChecksumAlgorithm::Md5,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.io_connections + self.metadata_connections
    }
}

/// A collection or data object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// Checksum the store has at hand; when absent, [`RemoteFilesystem::checksum`] computes one.
    pub checksum: Option<Checksum>,
    pub modified: Option<std::time::SystemTime>,
}

/// Operations available on an open session.
///
/// Paths are absolute, `/`-separated store paths.
pub trait RemoteFilesystem: Send + Sync + 'static {
    fn stat(&self, path: &str) -> impl Future<Output = Result<Entry, Error>> + Send;

    /// Children of a collection, sorted by name.
    fn list(&self, path: &str) -> impl Future<Output = Result<Vec<Entry>, Error>> + Send;

    fn exists(&self, path: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Checksum of a data object, computed by the store if it has none recorded.
    fn checksum(&self, path: &str) -> impl Future<Output = Result<Checksum, Error>> + Send;

    fn make_dir(&self, path: &str, recurse: bool) -> impl Future<Output = Result<(), Error>> + Send;

    /// Uploads a local file using up to `threads` concurrent streams; returns bytes written.
    fn upload_parallel(
        &self,
        local: &std::path::Path,
        remote: &str,
        threads: usize,
        callback: Option<ProgressCallback>,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Downloads a data object using up to `threads` concurrent streams; returns bytes written.
    fn download_parallel(
        &self,
        remote: &str,
        local: &std::path::Path,
        threads: usize,
        callback: Option<ProgressCallback>,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Writes (or overwrites) a small data object from memory.
    fn upload_from_buffer(
        &self,
        data: &[u8],
        remote: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn download_to_buffer(&self, remote: &str) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;

    /// Closes the connection pools; later calls fail with [`Error::Released`].
    fn release(&self);
}

/// Opens sessions, one per ticket.
pub trait Connector: Send + Sync {
    type Session: RemoteFilesystem;

    fn connect(
        &self,
        account: &Account,
        config: &SessionConfig,
    ) -> impl Future<Output = Result<Self::Session, Error>> + Send;
}

/// Last component of a store path.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Parent collection of a store path; `/` for top-level entries.
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &trimmed[..idx],
    }
}

/// Joins a child name onto a store path.
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        assert_eq!(basename("/iplant/home/a.txt"), "a.txt");
        assert_eq!(basename("/iplant/home/dir/"), "dir");
        assert_eq!(basename("name"), "name");
        assert_eq!(dirname("/iplant/home/a.txt"), "/iplant/home");
        assert_eq!(dirname("/iplant"), "/");
        assert_eq!(join("/iplant", "x"), "/iplant/x");
        assert_eq!(join("/", "x"), "/x");
    }

    #[test]
    fn session_reserves_metadata_connections() {
        let config = SessionConfig::new(5, 1024 * 1024);
        assert_eq!(config.max_connections(), 7);
        assert_eq!(SessionConfig::new(0, 0).io_connections, 1);
    }
}
