use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

use crate::checksum::{self, Checksum, ChecksumAlgorithm};
use crate::{Account, Connector, Entry, Error, ProgressCallback, RemoteFilesystem, SessionConfig};

/// Opens sessions on a zone mounted below `root`.
#[derive(Debug, Clone)]
pub struct MountConnector {
    root: PathBuf,
}

impl MountConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Connector for MountConnector {
    type Session = MountedFilesystem;

    #[instrument(skip(self, account), fields(host = %account.host, zone = %account.zone))]
    async fn connect(
        &self,
        account: &Account,
        config: &SessionConfig,
    ) -> Result<MountedFilesystem, Error> {
        let root_display = self.root.display().to_string();
        let md = tokio::fs::metadata(&self.root)
            .await
            .map_err(|err| Error::io(root_display.clone(), err))?;
        if !md.is_dir() {
            return Err(Error::NotADirectory(root_display));
        }
        tracing::debug!(
            "opened session as {:?} on {:?} with {} connection(s)",
            account.user,
            self.root,
            config.max_connections()
        );
        Ok(MountedFilesystem {
            root: self.root.clone(),
            zone: account.zone.clone(),
            collection: PathBuf::from(&account.collection),
            io_pool: throttle::Limiter::new(config.io_connections),
            metadata_pool: throttle::Limiter::new(config.metadata_connections),
            buffer_size: config.tcp_buffer_size,
            checksum_algorithm: config.checksum_algorithm,
            released: AtomicBool::new(false),
        })
    }
}

/// Session over a mounted zone.
#[derive(Debug)]
pub struct MountedFilesystem {
    root: PathBuf,
    zone: String,
    collection: PathBuf,
    io_pool: throttle::Limiter,
    metadata_pool: throttle::Limiter,
    buffer_size: usize,
    checksum_algorithm: ChecksumAlgorithm,
    released: AtomicBool,
}

impl MountedFilesystem {
    fn check_open(&self) -> Result<(), Error> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::Released);
        }
        Ok(())
    }

    /// Maps a store path to its location under the mount root.
    fn local_path(&self, path: &str) -> Result<PathBuf, Error> {
        let outside = || Error::OutsideZone {
            path: path.to_string(),
            zone: self.zone.clone(),
        };
        let relative = path.strip_prefix('/').ok_or_else(outside)?;
        let mut components = Path::new(relative).components();
        match components.next() {
            Some(Component::Normal(first)) if first == self.zone.as_str() => {}
            _ => return Err(outside()),
        }
        if components.any(|c| !matches!(c, Component::Normal(_))) {
            return Err(outside());
        }
        if !Path::new(path).starts_with(&self.collection) {
            return Err(Error::OutsideTicket {
                path: path.to_string(),
                collection: self.collection.display().to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    /// A mounted zone records no checksums; they are computed by [`RemoteFilesystem::checksum`].
    fn make_entry(path: &str, md: &std::fs::Metadata) -> Entry {
        Entry {
            path: path.trim_end_matches('/').to_string(),
            name: crate::basename(path).to_string(),
            size: if md.is_dir() { 0 } else { md.len() },
            is_dir: md.is_dir(),
            checksum: None,
            modified: md.modified().ok(),
        }
    }

    async fn require_dir(path: &Path, display: &str) -> Result<(), Error> {
        let md = tokio::fs::metadata(path)
            .await
            .map_err(|err| Error::io(display, err))?;
        if !md.is_dir() {
            return Err(Error::NotADirectory(display.to_string()));
        }
        Ok(())
    }

    /// Copies `src` to `dst` in up to `threads` byte ranges, one I/O connection per range.
    async fn parallel_copy(
        &self,
        src: &Path,
        dst: &Path,
        threads: usize,
        callback: Option<ProgressCallback>,
    ) -> Result<u64, Error> {
        let src_display = src.display().to_string();
        let dst_display = dst.display().to_string();
        let size = tokio::fs::metadata(src)
            .await
            .map_err(|err| Error::io(src_display.clone(), err))?
            .len();
        let file = tokio::fs::File::create(dst)
            .await
            .map_err(|err| Error::io(dst_display.clone(), err))?;
        file.set_len(size)
            .await
            .map_err(|err| Error::io(dst_display.clone(), err))?;
        drop(file);
        if size == 0 {
            if let Some(callback) = &callback {
                callback(0, 0);
            }
            return Ok(0);
        }
        let streams = (threads.clamp(1, self.io_pool.capacity()) as u64).min(size);
        let range_len = size.div_ceil(streams);
        tracing::debug!(
            "copying {} byte(s) from {:?} to {:?} in {} stream(s)",
            size,
            src,
            dst,
            streams
        );
        let done = Arc::new(AtomicU64::new(0));
        let mut join_set = tokio::task::JoinSet::new();
        for idx in 0..streams {
            let start = idx * range_len;
            let end = (start + range_len).min(size);
            if start >= end {
                continue;
            }
            let range = RangeCopy {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
                start,
                end,
                total: size,
                buffer_size: self.buffer_size,
            };
            let pool = self.io_pool.clone();
            let done = done.clone();
            let callback = callback.clone();
            join_set.spawn(async move {
                let _connection = pool.acquire(1).await?;
                range.run(&done, callback.as_ref()).await
            });
        }
        let mut first_error = None;
        while let Some(res) = join_set.join_next().await {
            let res = res.map_err(|err| Error::io(dst_display.clone(), std::io::Error::other(err)));
            if let Err(error) = res.and_then(|inner| inner) {
                tracing::debug!("range copy failed: {:#}", &error);
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(size),
        }
    }
}

struct RangeCopy {
    src: PathBuf,
    dst: PathBuf,
    start: u64,
    end: u64,
    total: u64,
    buffer_size: usize,
}

impl RangeCopy {
    async fn run(&self, done: &AtomicU64, callback: Option<&ProgressCallback>) -> Result<(), Error> {
        let src_display = self.src.display().to_string();
        let dst_display = self.dst.display().to_string();
        let read_err = |err| Error::io(src_display.clone(), err);
        let write_err = |err| Error::io(dst_display.clone(), err);
        let mut reader = tokio::fs::File::open(&self.src).await.map_err(read_err)?;
        reader
            .seek(SeekFrom::Start(self.start))
            .await
            .map_err(read_err)?;
        let mut writer = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.dst)
            .await
            .map_err(write_err)?;
        writer
            .seek(SeekFrom::Start(self.start))
            .await
            .map_err(write_err)?;
        let mut buffer = vec![0u8; self.buffer_size];
        let mut remaining = self.end - self.start;
        while remaining > 0 {
            let want = (remaining as usize).min(buffer.len());
            let n = reader.read(&mut buffer[..want]).await.map_err(read_err)?;
            if n == 0 {
                return Err(read_err(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
            writer.write_all(&buffer[..n]).await.map_err(write_err)?;
            remaining -= n as u64;
            let processed = done.fetch_add(n as u64, Ordering::AcqRel) + n as u64;
            if let Some(callback) = callback {
                callback(processed as i64, self.total as i64);
            }
        }
        writer.flush().await.map_err(write_err)?;
        Ok(())
    }
}

impl RemoteFilesystem for MountedFilesystem {
    #[instrument(skip(self))]
    async fn stat(&self, path: &str) -> Result<Entry, Error> {
        self.check_open()?;
        let local = self.local_path(path)?;
        let _connection = self.metadata_pool.acquire(1).await?;
        let md = tokio::fs::metadata(&local)
            .await
            .map_err(|err| Error::io(path, err))?;
        Ok(Self::make_entry(path, &md))
    }

    #[instrument(skip(self))]
    async fn list(&self, path: &str) -> Result<Vec<Entry>, Error> {
        self.check_open()?;
        let local = self.local_path(path)?;
        let _connection = self.metadata_pool.acquire(1).await?;
        Self::require_dir(&local, path).await?;
        let mut dir = tokio::fs::read_dir(&local)
            .await
            .map_err(|err| Error::io(path, err))?;
        let mut entries = Vec::new();
        while let Some(child) = dir.next_entry().await.map_err(|err| Error::io(path, err))? {
            let name = child.file_name().to_string_lossy().to_string();
            let child_path = crate::join(path.trim_end_matches('/'), &name);
            let md = tokio::fs::metadata(child.path())
                .await
                .map_err(|err| Error::io(child_path.clone(), err))?;
            entries.push(Self::make_entry(&child_path, &md));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool, Error> {
        self.check_open()?;
        let local = self.local_path(path)?;
        let _connection = self.metadata_pool.acquire(1).await?;
        tokio::fs::try_exists(&local)
            .await
            .map_err(|err| Error::io(path, err))
    }

    #[instrument(skip(self))]
    async fn checksum(&self, path: &str) -> Result<Checksum, Error> {
        self.check_open()?;
        let local = self.local_path(path)?;
        let _connection = self.io_pool.acquire(1).await?;
        let md = tokio::fs::metadata(&local)
            .await
            .map_err(|err| Error::io(path, err))?;
        if md.is_dir() {
            return Err(Error::NotAFile(path.to_string()));
        }
        checksum::hash_file(&local, self.checksum_algorithm)
            .await
            .map_err(|err| Error::io(path, err))
    }

    #[instrument(skip(self))]
    async fn make_dir(&self, path: &str, recurse: bool) -> Result<(), Error> {
        self.check_open()?;
        let local = self.local_path(path)?;
        let _connection = self.metadata_pool.acquire(1).await?;
        let res = if recurse {
            tokio::fs::create_dir_all(&local).await
        } else {
            tokio::fs::create_dir(&local).await
        };
        res.map_err(|err| Error::io(path, err))
    }

    #[instrument(skip(self, callback))]
    async fn upload_parallel(
        &self,
        local: &Path,
        remote: &str,
        threads: usize,
        callback: Option<ProgressCallback>,
    ) -> Result<u64, Error> {
        self.check_open()?;
        let target = self.local_path(remote)?;
        if let Some(parent) = target.parent() {
            Self::require_dir(parent, crate::dirname(remote)).await?;
        }
        if tokio::fs::metadata(&target)
            .await
            .map(|md| md.is_dir())
            .unwrap_or(false)
        {
            return Err(Error::NotAFile(remote.to_string()));
        }
        self.parallel_copy(local, &target, threads, callback).await
    }

    #[instrument(skip(self, callback))]
    async fn download_parallel(
        &self,
        remote: &str,
        local: &Path,
        threads: usize,
        callback: Option<ProgressCallback>,
    ) -> Result<u64, Error> {
        self.check_open()?;
        let source = self.local_path(remote)?;
        let md = tokio::fs::metadata(&source)
            .await
            .map_err(|err| Error::io(remote, err))?;
        if md.is_dir() {
            return Err(Error::NotAFile(remote.to_string()));
        }
        self.parallel_copy(&source, local, threads, callback).await
    }

    async fn upload_from_buffer(&self, data: &[u8], remote: &str) -> Result<(), Error> {
        self.check_open()?;
        let target = self.local_path(remote)?;
        let _connection = self.io_pool.acquire(1).await?;
        tokio::fs::write(&target, data)
            .await
            .map_err(|err| Error::io(remote, err))
    }

    async fn download_to_buffer(&self, remote: &str) -> Result<Vec<u8>, Error> {
        self.check_open()?;
        let source = self.local_path(remote)?;
        let _connection = self.io_pool.acquire(1).await?;
        tokio::fs::read(&source)
            .await
            .map_err(|err| Error::io(remote, err))
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            tracing::debug!("releasing session on {:?}", self.root);
            self.io_pool.close();
            self.metadata_pool.close();
        }
    }
}
