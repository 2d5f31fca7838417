use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::{LANDING_PATH, RELEASE_PATH, StoreConfig};

/// Serves `router` on an ephemeral local port and returns its base url.
pub async fn serve(router: axum::Router) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!("test server failed: {:#}", err);
        }
    });
    Ok(format!("http://{addr}"))
}

/// Maps a store path onto the mounted zone under `root`.
pub fn store_path(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Mounted zone with empty landing and release collections.
pub async fn setup_store(root: &Path) -> Result<StoreConfig> {
    tokio::fs::create_dir_all(store_path(root, LANDING_PATH)).await?;
    tokio::fs::create_dir_all(store_path(root, RELEASE_PATH)).await?;
    Ok(StoreConfig::new(root))
}

// sim
// |- mdrepo-metadata.toml
// |- traj.xtc
// |- top.pdb
// |- structure.gro
// |- notes.txt
pub async fn setup_simulation(parent: &Path, name: &str, orcid: &str) -> Result<PathBuf> {
    let dir = parent.join(name);
    tokio::fs::create_dir_all(&dir).await?;
    let metadata = format!(
        "lead_contributor_orcid = \"{orcid}\"\n\
         \n\
         [required_files]\n\
         trajectory_file_name = \"traj.xtc\"\n\
         structure_file_name = \"structure.gro\"\n\
         topology_file_name = \"top.pdb\"\n\
         \n\
         [[additional_files]]\n\
         additional_file_name = \"notes.txt\"\n"
    );
    tokio::fs::write(crate::metadata::metadata_path(&dir), metadata).await?;
    tokio::fs::write(dir.join("traj.xtc"), vec![7u8; 4096]).await?;
    tokio::fs::write(dir.join("top.pdb"), format!("ATOM {name}\n")).await?;
    tokio::fs::write(dir.join("structure.gro"), "structure\n").await?;
    tokio::fs::write(dir.join("notes.txt"), "notes\n").await?;
    Ok(dir)
}
