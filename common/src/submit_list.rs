//! `submitls`: what has landed for a submission so far.

use std::fmt::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_recursion::async_recursion;
use remote::{Connector, RemoteFilesystem};
use tracing::instrument;

use crate::config::{Config, StoreConfig};
use crate::error::from_remote;
use crate::status::SubmitStatusFile;
use crate::ticket::Ticket;
use crate::{hash, path, service};

fn format_time(time: Option<std::time::SystemTime>) -> String {
    match time {
        Some(time) => chrono::DateTime::<chrono::Utc>::from(time)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}

#[async_recursion]
async fn list_collection<S: RemoteFilesystem>(
    session: &S,
    root: &str,
    collection: &str,
    out: &mut String,
) -> Result<()> {
    let entries = session
        .list(collection)
        .await
        .map_err(from_remote)
        .with_context(|| format!("failed to list {:?}", collection))?;
    for entry in &entries {
        let name = entry
            .path
            .strip_prefix(root)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(entry.name.as_str());
        let checksum = if entry.is_dir {
            String::new()
        } else {
            hash::remote_checksum(session, entry).await?.to_wire()
        };
        writeln!(
            out,
            "{:<4}\t{:<50}\t{:>12}\t{:<40}\t{}",
            if entry.is_dir { "C" } else { "D" },
            name,
            entry.size,
            checksum,
            format_time(entry.modified)
        )?;
    }
    for entry in entries.iter().filter(|entry| entry.is_dir) {
        list_collection(session, root, &entry.path, out).await?;
    }
    Ok(())
}

/// Listing of one landing collection followed by its status record, if any.
#[instrument(skip(session))]
pub async fn describe_landing<S: RemoteFilesystem>(session: &S, target: &str) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "[{target}]")?;
    writeln!(
        out,
        "{:<4}\t{:<50}\t{:>12}\t{:<40}\t{}",
        "TYPE", "NAME", "SIZE", "CHECKSUM", "LAST_MODIFIED"
    )?;
    list_collection(session, target, target, &mut out).await?;
    let entries = session
        .list(target)
        .await
        .map_err(from_remote)
        .with_context(|| format!("failed to list {:?}", target))?;
    if let Some(entry) = entries
        .iter()
        .find(|entry| !entry.is_dir && path::is_status_file(&entry.name))
    {
        let data = session
            .download_to_buffer(&entry.path)
            .await
            .map_err(from_remote)
            .with_context(|| format!("failed to read {:?}", entry.path))?;
        let status = SubmitStatusFile::from_json(&data)?;
        writeln!(out, "\nSubmission status ({}):\n{}", entry.name, status.to_json()?)?;
    }
    Ok(out)
}

/// Describes the landing collection of every submission ticket.
///
/// With a token the ticket service needs the submitter's ORC-ID, same as for `submit`.
pub async fn submit_list<C: Connector>(
    connector: &C,
    config: &mut Config,
    store: &StoreConfig,
    orcid: Option<&str>,
    io_connections: usize,
) -> Result<String> {
    let tickets = match orcid {
        Some(orcid) => service::resolve_submit_tickets(config, orcid).await?,
        None => service::resolve_download_tickets(config).await?,
    };
    let mut out = String::new();
    for ticket in &tickets {
        out.push_str(&list_ticket(connector, store, ticket, io_connections).await?);
    }
    Ok(out)
}

async fn list_ticket<C: Connector>(
    connector: &C,
    store: &StoreConfig,
    ticket: &Ticket,
    io_connections: usize,
) -> Result<String> {
    let session = connector
        .connect(&store.account(ticket), &remote::SessionConfig::new(io_connections, 0))
        .await
        .map_err(from_remote)
        .with_context(|| format!("failed to open a session for {}", ticket.path))?;
    let session = Arc::new(session);
    let res = describe_landing(session.as_ref(), &path::make_landing_path(&ticket.path)).await;
    session.release();
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LANDING_PATH;
    use crate::status::SubmitStatusEntry;
    use crate::testutils::{setup_store, store_path};

    #[tokio::test]
    async fn lists_landing_and_status() -> Result<()> {
        let store_root = tempfile::tempdir()?;
        let store = setup_store(store_root.path()).await?;
        let landing = format!("{LANDING_PATH}/sim");
        let local = store_path(store_root.path(), &landing);
        tokio::fs::create_dir_all(local.join("extra")).await?;
        tokio::fs::write(local.join("traj.xtc"), "frames").await?;
        tokio::fs::write(local.join("extra").join("notes.txt"), "notes").await?;
        let mut status = SubmitStatusFile::new("tok");
        status.add_file(SubmitStatusEntry {
            relative_path: "traj.xtc".to_string(),
            size: 6,
            md5: "x".to_string(),
        });
        tokio::fs::write(local.join(status.filename()), status.to_json()?).await?;
        let mut config = Config::new("http://127.0.0.1:1");
        config.ticket_string = Some(format!("tkt:{landing}"));
        let out = submit_list(
            &remote::mount::MountConnector::new(store_root.path()),
            &mut config,
            &store,
            None,
            1,
        )
        .await?;
        assert!(out.contains(&format!("[{landing}]")), "{out}");
        assert!(out.lines().any(|line| line.starts_with("C   \textra")), "{out}");
        assert!(out.lines().any(|line| line.starts_with("D   \textra/notes.txt")), "{out}");
        let digest = remote::checksum::hash_bytes(b"frames", remote::ChecksumAlgorithm::Md5).to_wire();
        assert!(
            out.lines().any(|line| line.starts_with("D   \ttraj.xtc") && line.contains(&digest)),
            "{out}"
        );
        assert!(out.contains("Submission status (mdrepo-submission.tok.json)"), "{out}");
        assert!(out.contains("\"irods_path\": \"traj.xtc\""), "{out}");
        Ok(())
    }
}
