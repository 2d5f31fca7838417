//! Download planner and driver.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_recursion::async_recursion;
use futures::FutureExt;
use remote::{Connector, RemoteFilesystem};
use tracing::instrument;

use crate::config::{Config, RetryConfig, StoreConfig, TransferConfig, TransferMode};
use crate::error::{Error, from_io, from_remote};
use crate::progress::{JobProgress, ProgressDisplay};
use crate::scheduler::{JobScheduler, TransferJob};
use crate::ticket::Ticket;
use crate::transfer::{Summary, threads_required};
use crate::webdav::WebDavDownloader;
use crate::{hash, path, retry, service};

/// Walks a store subtree and schedules one download per data object.
pub struct GetPlanner<S> {
    session: Arc<S>,
    transfer: TransferConfig,
    webdav: Option<Arc<WebDavDownloader>>,
}

impl<S: RemoteFilesystem> GetPlanner<S> {
    pub fn new(session: Arc<S>, transfer: TransferConfig, webdav: Option<WebDavDownloader>) -> Self {
        Self {
            session,
            transfer,
            webdav: webdav.map(Arc::new),
        }
    }

    /// Plans `source` (object or collection) into the existing local `target`.
    #[instrument(skip(self, scheduler))]
    #[async_recursion]
    pub async fn get(&self, scheduler: &JobScheduler, source: &str, target: &Path) -> Result<Summary> {
        let entry = self
            .session
            .stat(source)
            .await
            .map_err(from_remote)
            .with_context(|| format!("failed to stat {:?}", source))?;
        if !entry.is_dir {
            return self.get_file(scheduler, entry, target).await;
        }
        require_local_dir(target).await?;
        let children = self
            .session
            .list(source)
            .await
            .map_err(from_remote)
            .with_context(|| format!("failed to list {:?}", source))?;
        let mut summary = Summary::default();
        for child in children {
            if !child.is_dir {
                summary = summary + self.get_file(scheduler, child, target).await?;
                continue;
            }
            let local = target.join(&child.name);
            match tokio::fs::create_dir(&local).await {
                Ok(()) => summary.directories_created += 1,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    require_local_dir(&local).await?;
                }
                Err(err) => {
                    return Err(from_io(&local, err))
                        .with_context(|| format!("cannot create directory {:?}", local));
                }
            }
            summary = summary + self.get(scheduler, &child.path, &local).await?;
        }
        Ok(summary)
    }

    async fn get_file(&self, scheduler: &JobScheduler, mut entry: remote::Entry, target: &Path) -> Result<Summary> {
        let local = path::target_local_file_path(&entry.path, target).await;
        if let Some(parent) = local.parent() {
            require_local_dir(parent).await?;
        }
        let existing = match tokio::fs::metadata(&local).await {
            Ok(md) if md.is_dir() => return Err(Error::NotFile(local.display().to_string()).into()),
            Ok(md) => Some(md.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(from_io(&local, err)),
        };
        // only a same-sized local copy needs the remote checksum
        let unchanged = match existing {
            Some(size) if !self.transfer.force && size == entry.size => {
                let checksum = hash::remote_checksum(self.session.as_ref(), &entry).await?;
                let matches = hash::local_file_matches(&local, size, Some(&checksum)).await?;
                entry.checksum = Some(checksum);
                matches
            }
            _ => false,
        };
        if unchanged {
            scheduler.notice(&format!(
                "skip downloading {} to {}: unchanged",
                entry.path,
                local.display()
            ));
            return Ok(Summary {
                files_skipped: 1,
                ..Default::default()
            });
        }
        let weight = threads_required(entry.size, &self.transfer);
        let job = TransferJob {
            name: entry.name.clone(),
            source: entry.path.clone(),
            target: local.display().to_string(),
            size: entry.size,
            weight,
            task: match &self.webdav {
                Some(webdav) => {
                    let webdav = webdav.clone();
                    let session = self.session.clone();
                    Box::new(move |progress: JobProgress| {
                        async move {
                            entry.checksum = Some(hash::remote_checksum(session.as_ref(), &entry).await?);
                            webdav.download(&entry, &local, Some(progress.callback())).await
                        }
                        .boxed()
                    })
                }
                None => {
                    let session = self.session.clone();
                    Box::new(move |progress: JobProgress| {
                        async move {
                            session
                                .download_parallel(&entry.path, &local, weight, Some(progress.callback()))
                                .await
                                .map_err(from_remote)
                        }
                        .boxed()
                    })
                }
            },
        };
        scheduler.schedule(job)?;
        Ok(Summary::default())
    }
}

async fn require_local_dir(path: &Path) -> Result<()> {
    let md = tokio::fs::metadata(path)
        .await
        .map_err(|err| from_io(path, err))
        .with_context(|| format!("destination {:?} is unavailable", path))?;
    if !md.is_dir() {
        return Err(Error::NotDirectory(path.display().to_string()).into());
    }
    Ok(())
}

/// Downloads every ticket's subtree into `target`.
///
/// Ticket `/iplant/.../release/<sim>` lands in `<target>/<sim>`. Credentials are resolved once; the transfer
/// phase is retried as a whole.
#[instrument(skip(connector, config, store, transfer, retry))]
pub async fn get<C: Connector>(
    connector: &C,
    config: &mut Config,
    store: &StoreConfig,
    transfer: &TransferConfig,
    retry: &RetryConfig,
    target: &Path,
) -> Result<Summary> {
    transfer
        .validate()
        .map_err(|err| anyhow!("invalid transfer settings: {}", err))?;
    let target = path::make_local_path(target)?;
    let tickets = service::resolve_download_tickets(config).await?;
    require_local_dir(&target).await?;
    retry::run_with_retry(retry, |attempt| {
        tracing::info!("download attempt {}", attempt);
        get_all(connector, &tickets, store, transfer, &target)
    })
    .await
}

async fn get_all<C: Connector>(
    connector: &C,
    tickets: &[Ticket],
    store: &StoreConfig,
    transfer: &TransferConfig,
    target: &Path,
) -> Result<Summary> {
    let mut summary = Summary::default();
    for ticket in tickets {
        let session_config = remote::SessionConfig::new(transfer.effective_threads(), transfer.tcp_buffer_size);
        let session = connector
            .connect(&store.account(ticket), &session_config)
            .await
            .map_err(from_remote)
            .with_context(|| format!("failed to open a session for {}", ticket.path))?;
        let session = Arc::new(session);
        let res = get_ticket(&session, ticket, store, transfer, target).await;
        session.release();
        summary = summary + res?;
    }
    Ok(summary)
}

#[instrument(skip(session, ticket, store, transfer), fields(path = %ticket.path))]
async fn get_ticket<S: RemoteFilesystem>(
    session: &Arc<S>,
    ticket: &Ticket,
    store: &StoreConfig,
    transfer: &TransferConfig,
    target: &Path,
) -> Result<Summary> {
    let source = path::make_release_path(&ticket.path);
    let entry = session
        .stat(&source)
        .await
        .map_err(from_remote)
        .with_context(|| format!("failed to stat {:?}", source))?;
    let mut summary = Summary::default();
    let local: PathBuf = if entry.is_dir {
        let local = target.join(path::simulation_rel_path(&source));
        if !tokio::fs::try_exists(&local).await.map_err(|err| from_io(&local, err))? {
            tokio::fs::create_dir_all(&local)
                .await
                .map_err(|err| from_io(&local, err))
                .with_context(|| format!("cannot create directory {:?}", local))?;
            summary.directories_created += 1;
        }
        local
    } else {
        target.to_path_buf()
    };
    let webdav = (transfer.mode == TransferMode::Webdav).then(|| WebDavDownloader::new(store, &ticket.credential));
    let planner = GetPlanner::new(session.clone(), *transfer, webdav);
    let mut scheduler = JobScheduler::new(
        transfer.effective_threads(),
        transfer.show_progress.then(|| ProgressDisplay::new(transfer.show_path)),
    );
    scheduler.start()?;
    let planned = planner.get(&scheduler, &source, &local).await;
    scheduler.done_scheduling()?;
    let planned = match planned {
        Ok(planned) => planned,
        Err(err) => {
            if let Err(wait_err) = scheduler.wait().await {
                tracing::error!("while aborting after a planning error: {:#}", wait_err);
            }
            return Err(err);
        }
    };
    let transferred = scheduler.wait().await?;
    Ok(summary + planned + transferred)
}
