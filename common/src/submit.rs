//! Upload planner and submission driver.
//!
//! A submission pairs each ticket with one simulation directory (in sorted order), uploads the files named by
//! the directory's metadata into the ticket's landing collection, and keeps a status file next to them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_recursion::async_recursion;
use futures::FutureExt;
use remote::{Connector, RemoteFilesystem};
use tracing::instrument;

use crate::config::{Config, RetryConfig, StoreConfig, SubmitConfig, TransferConfig};
use crate::error::{Error, from_io, from_remote};
use crate::metadata::{self, SubmitMetadata};
use crate::progress::{JobProgress, ProgressDisplay};
use crate::scheduler::{JobScheduler, TransferJob};
use crate::status::{SubmitStatusEntry, SubmitStatusFile};
use crate::ticket::Ticket;
use crate::transfer::{Summary, threads_required};
use crate::{hash, path, retry, service};

/// Walks a local tree and schedules one upload per file, recording every file in the status record.
pub struct SubmitPlanner<S> {
    session: Arc<S>,
    transfer: TransferConfig,
    /// Landing collection; status entries are relative to it
    target_root: String,
}

impl<S: RemoteFilesystem> SubmitPlanner<S> {
    pub fn new(session: Arc<S>, transfer: TransferConfig, target_root: impl Into<String>) -> Self {
        Self {
            session,
            transfer,
            target_root: target_root.into(),
        }
    }

    /// Plans `source` (file or directory) into the existing collection `target`.
    #[instrument(skip(self, scheduler, status))]
    #[async_recursion]
    pub async fn submit(
        &self,
        scheduler: &JobScheduler,
        status: &mut SubmitStatusFile,
        source: &Path,
        target: &str,
    ) -> Result<Summary> {
        let md = tokio::fs::metadata(source)
            .await
            .map_err(|err| from_io(source, err))
            .with_context(|| format!("failed to stat {:?}", source))?;
        if !md.is_dir() {
            return self.submit_file(scheduler, status, source, md.len(), target).await;
        }
        require_remote_dir(self.session.as_ref(), target).await?;
        let mut children = Vec::new();
        let mut entries = tokio::fs::read_dir(source)
            .await
            .map_err(|err| from_io(source, err))
            .with_context(|| format!("cannot open directory {:?} for reading", source))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| from_io(source, err))
            .with_context(|| format!("failed traversing directory {:?}", source))?
        {
            children.push(entry.path());
        }
        children.sort();
        let mut summary = Summary::default();
        for child in children {
            let is_dir = tokio::fs::metadata(&child)
                .await
                .map_err(|err| from_io(&child, err))?
                .is_dir();
            let child_target = if is_dir {
                let name = child
                    .file_name()
                    .with_context(|| format!("{:?} has no file name", child))?;
                remote::join(target, &name.to_string_lossy())
            } else {
                target.to_string()
            };
            summary = summary + self.submit(scheduler, status, &child, &child_target).await?;
        }
        Ok(summary)
    }

    async fn submit_file(
        &self,
        scheduler: &JobScheduler,
        status: &mut SubmitStatusFile,
        source: &Path,
        size: u64,
        target: &str,
    ) -> Result<Summary> {
        let remote_path = path::target_remote_file_path(self.session.as_ref(), source, target).await?;
        require_remote_dir(self.session.as_ref(), remote::dirname(&remote_path)).await?;
        let existing = match self.session.stat(&remote_path).await {
            Ok(entry) if entry.is_dir => return Err(Error::NotFile(remote_path).into()),
            Ok(entry) => Some(entry),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                return Err(from_remote(err)).with_context(|| format!("failed to stat {:?}", remote_path));
            }
        };
        let md5 = hash::md5_hex(source).await?;
        status.add_file(SubmitStatusEntry {
            relative_path: self.relative(&remote_path),
            size,
            md5,
        });
        let unchanged = match &existing {
            Some(entry) if !self.transfer.force && entry.size == size => {
                let checksum = hash::remote_checksum(self.session.as_ref(), entry).await?;
                hash::local_file_matches(source, size, Some(&checksum)).await?
            }
            _ => false,
        };
        if unchanged {
            scheduler.notice(&format!(
                "skip uploading {} to {}: unchanged",
                source.display(),
                remote_path
            ));
            return Ok(Summary {
                files_skipped: 1,
                ..Default::default()
            });
        }
        let weight = threads_required(size, &self.transfer);
        let session = self.session.clone();
        let local = source.to_path_buf();
        let job = TransferJob {
            name: remote::basename(&remote_path).to_string(),
            source: source.display().to_string(),
            target: remote_path.clone(),
            size,
            weight,
            task: Box::new(move |progress: JobProgress| {
                async move {
                    session
                        .upload_parallel(&local, &remote_path, weight, Some(progress.callback()))
                        .await
                        .map_err(from_remote)
                }
                .boxed()
            }),
        };
        scheduler.schedule(job)?;
        Ok(Summary::default())
    }

    fn relative(&self, remote_path: &str) -> String {
        remote_path
            .strip_prefix(self.target_root.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .filter(|rest| !rest.is_empty())
            .unwrap_or_else(|| remote::basename(remote_path))
            .to_string()
    }
}

async fn require_remote_dir<S: RemoteFilesystem>(session: &S, path: &str) -> Result<()> {
    let entry = session
        .stat(path)
        .await
        .map_err(from_remote)
        .with_context(|| format!("destination collection {:?} is unavailable", path))?;
    if !entry.is_dir {
        return Err(Error::NotDirectory(path.to_string()).into());
    }
    Ok(())
}

/// Simulation directories found among the submission sources.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SourceScan {
    /// Sorted, without duplicates
    pub valid: Vec<PathBuf>,
    pub invalid: Vec<(PathBuf, String)>,
}

async fn has_subdirs(dir: &Path) -> Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|err| from_io(dir, err))?;
    while let Some(entry) = entries.next_entry().await.map_err(|err| from_io(dir, err))? {
        if entry.file_type().await.map_err(|err| from_io(&entry.path(), err))?.is_dir() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Why `dir` is not a simulation directory, if it isn't one.
async fn simulation_problem(dir: &Path) -> Result<Option<String>> {
    if !metadata::has_metadata(dir).await {
        return Ok(Some(format!(
            "no {} found",
            crate::config::SUBMISSION_METADATA_FILENAME
        )));
    }
    if has_subdirs(dir).await? {
        return Ok(Some("simulation directory must not contain subdirectories".to_string()));
    }
    Ok(None)
}

/// Classifies each source as a simulation directory or a parent of simulation directories.
#[instrument]
pub async fn scan_sources(sources: &[PathBuf]) -> Result<SourceScan> {
    let mut scan = SourceScan::default();
    for source in sources {
        let source = path::make_local_path(source)?;
        let md = tokio::fs::metadata(&source)
            .await
            .map_err(|err| from_io(&source, err))
            .with_context(|| format!("source {:?} is unavailable", source))?;
        if !md.is_dir() {
            return Err(Error::NotDirectory(source.display().to_string()).into());
        }
        if metadata::has_metadata(&source).await {
            match simulation_problem(&source).await? {
                None => scan.valid.push(source),
                Some(problem) => scan.invalid.push((source, problem)),
            }
            continue;
        }
        let mut subdirs = Vec::new();
        let mut entries = tokio::fs::read_dir(&source)
            .await
            .map_err(|err| from_io(&source, err))?;
        while let Some(entry) = entries.next_entry().await.map_err(|err| from_io(&source, err))? {
            if entry.file_type().await.map_err(|err| from_io(&entry.path(), err))?.is_dir() {
                subdirs.push(entry.path());
            }
        }
        if subdirs.is_empty() {
            scan.invalid.push((
                source,
                format!("no {} found", crate::config::SUBMISSION_METADATA_FILENAME),
            ));
            continue;
        }
        subdirs.sort();
        for dir in subdirs {
            match simulation_problem(&dir).await? {
                None => scan.valid.push(dir),
                Some(problem) => scan.invalid.push((dir, problem)),
            }
        }
    }
    scan.valid.sort();
    scan.valid.dedup();
    Ok(scan)
}

/// The submitter's ORC-ID: the override, else the one every metadata file agrees on.
pub fn resolve_orcid(metadata: &[SubmitMetadata], override_orcid: Option<&str>) -> Result<Option<String>, Error> {
    if let Some(orcid) = override_orcid.filter(|id| !id.is_empty()) {
        return Ok(Some(orcid.to_string()));
    }
    let mut found: Option<&str> = None;
    for meta in metadata {
        match (found, meta.orcid()) {
            (_, None) => {}
            (None, Some(orcid)) => found = Some(orcid),
            (Some(previous), Some(orcid)) if previous == orcid => {}
            (Some(previous), Some(orcid)) => {
                return Err(Error::InvalidOrcId(format!(
                    "simulations name different contributors ({previous} in one, {orcid} in {:?})",
                    meta.submission_dir
                )));
            }
        }
    }
    Ok(found.map(str::to_string))
}

async fn validate_all(metadata: &[SubmitMetadata], max_simulation_size: u64) -> Result<(), Error> {
    let mut problems = Vec::new();
    for meta in metadata {
        match meta.validate_files(max_simulation_size).await {
            Ok(()) => {}
            Err(Error::InvalidSubmitMetadata(found)) => problems.extend(
                found
                    .into_iter()
                    .map(|problem| format!("{}: {}", meta.submission_dir.display(), problem)),
            ),
            Err(other) => return Err(other),
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidSubmitMetadata(problems))
    }
}

/// Validates and uploads the simulations found in `sources`.
#[instrument(skip(connector, config, store, transfer, options, retry))]
pub async fn submit<C: Connector>(
    connector: &C,
    config: &mut Config,
    store: &StoreConfig,
    transfer: &TransferConfig,
    options: &SubmitConfig,
    retry: &RetryConfig,
    sources: &[PathBuf],
) -> Result<Summary> {
    transfer
        .validate()
        .map_err(|err| anyhow!("invalid transfer settings: {}", err))?;
    let scan = scan_sources(sources).await?;
    for (dir, problem) in &scan.invalid {
        tracing::warn!("skipping {:?}: {}", dir, problem);
    }
    let count_mismatch = |expected: usize, scan: SourceScan| Error::SimulationCountMismatch {
        expected,
        valid: scan.valid,
        invalid: scan.invalid,
    };
    // without an explicit count every directory given must be a simulation
    let expected = options
        .expected_simulations
        .unwrap_or_else(|| (scan.valid.len() + scan.invalid.len()).max(1));
    if expected != scan.valid.len() {
        return Err(count_mismatch(expected, scan).into());
    }
    let mut metadata = Vec::with_capacity(scan.valid.len());
    for dir in &scan.valid {
        metadata.push(SubmitMetadata::read_dir(dir).await?);
    }
    validate_all(&metadata, options.max_simulation_size).await?;
    let orcid = resolve_orcid(&metadata, options.orcid.as_deref())?;
    if !config.is_resolved() && config.token().is_some() && orcid.is_none() {
        return Err(Error::InvalidOrcId("no contributor ORC-ID in the submission metadata".to_string()).into());
    }
    let tickets = service::resolve_submit_tickets(config, orcid.as_deref().unwrap_or_default()).await?;
    if let Some(token) = config.token() {
        service::ServiceClient::new(&config.service_url)?
            .verify_metadata(&scan.valid, token)
            .await?;
    }
    if tickets.len() != scan.valid.len() {
        return Err(count_mismatch(tickets.len(), scan))
            .with_context(|| format!("{} ticket(s) were issued for this submission", tickets.len()));
    }
    let token = config.token().unwrap_or_default().to_string();
    retry::run_with_retry(retry, |attempt| {
        tracing::info!("submission attempt {}", attempt);
        submit_all(connector, &tickets, &metadata, store, transfer, &token)
    })
    .await
}

async fn submit_all<C: Connector>(
    connector: &C,
    tickets: &[Ticket],
    metadata: &[SubmitMetadata],
    store: &StoreConfig,
    transfer: &TransferConfig,
    token: &str,
) -> Result<Summary> {
    let mut summary = Summary::default();
    for (ticket, meta) in tickets.iter().zip(metadata) {
        let session_config = remote::SessionConfig::new(transfer.effective_threads(), transfer.tcp_buffer_size);
        let session = connector
            .connect(&store.account(ticket), &session_config)
            .await
            .map_err(from_remote)
            .with_context(|| format!("failed to open a session for {}", ticket.path))?;
        let session = Arc::new(session);
        let res = submit_ticket(&session, ticket, meta, transfer, token).await;
        session.release();
        summary = summary + res?;
    }
    Ok(summary)
}

async fn mark_errored<S: RemoteFilesystem>(status: &mut SubmitStatusFile, session: &S, target: &str) {
    status.set_errored();
    if let Err(err) = status.persist(session, target).await {
        tracing::error!("failed to record the errored submission status: {:#}", err);
    }
}

#[instrument(skip(session, ticket, meta, transfer, token), fields(path = %ticket.path))]
async fn submit_ticket<S: RemoteFilesystem>(
    session: &Arc<S>,
    ticket: &Ticket,
    meta: &SubmitMetadata,
    transfer: &TransferConfig,
    token: &str,
) -> Result<Summary> {
    let target = path::make_landing_path(&ticket.path);
    require_remote_dir(session.as_ref(), &target).await?;
    let mut status = SubmitStatusFile::new(token);
    let planner = SubmitPlanner::new(session.clone(), *transfer, target.clone());
    let mut scheduler = JobScheduler::new(
        transfer.effective_threads(),
        transfer.show_progress.then(|| ProgressDisplay::new(transfer.show_path)),
    );
    scheduler.start()?;
    let mut planned = Ok(Summary::default());
    for file in meta.upload_files() {
        let source = meta.submission_dir.join(&file);
        planned = match planned {
            Ok(summary) => planner
                .submit(&scheduler, &mut status, &source, &target)
                .await
                .map(|more| summary + more),
            failed => failed,
        };
    }
    scheduler.done_scheduling()?;
    let started = match planned {
        Ok(planned) => match status.set_in_progress() {
            Ok(()) => status.persist(session.as_ref(), &target).await.map(|()| planned),
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };
    let planned = match started {
        Ok(planned) => planned,
        Err(err) => {
            if let Err(wait_err) = scheduler.wait().await {
                tracing::error!("while aborting the submission: {:#}", wait_err);
            }
            mark_errored(&mut status, session.as_ref(), &target).await;
            return Err(err);
        }
    };
    let finished = match scheduler.wait().await {
        Ok(transferred) => mark_completed(&mut status, session.as_ref(), &target)
            .await
            .map(|()| planned + transferred),
        Err(err) => Err(err),
    };
    if finished.is_err() {
        mark_errored(&mut status, session.as_ref(), &target).await;
    }
    finished
}

async fn mark_completed<S: RemoteFilesystem>(status: &mut SubmitStatusFile, session: &S, target: &str) -> Result<()> {
    status.set_completed()?;
    status
        .persist(session, target)
        .await
        .context("failed to record the completed submission status")
}
