//! End-to-end tests of the `mdrepo` binary against a data store mounted in a temporary directory.
//!
//! Tickets are passed with `--ticket-string` so no MD-Repo service is contacted.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

const LANDING: &str = "/iplant/home/shared/mdrepo/prod/landing";
const RELEASE: &str = "/iplant/home/shared/mdrepo/prod/release";
const ORCID: &str = "0000-0002-9100-4108";

fn mdrepo() -> Command {
    let mut cmd = Command::cargo_bin("mdrepo").unwrap();
    cmd.env_remove("MDREPO_STORE_ROOT").env_remove("RUST_LOG");
    cmd
}

fn store_path(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

fn setup_store() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(store_path(root.path(), LANDING)).unwrap();
    std::fs::create_dir_all(store_path(root.path(), RELEASE)).unwrap();
    root
}

fn setup_simulation(parent: &Path, name: &str) -> PathBuf {
    let dir = parent.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("mdrepo-metadata.toml"),
        format!(
            "lead_contributor_orcid = \"{ORCID}\"\n\
             \n\
             [required_files]\n\
             trajectory_file_name = \"traj.xtc\"\n\
             structure_file_name = \"structure.gro\"\n\
             topology_file_name = \"top.pdb\"\n"
        ),
    )
    .unwrap();
    std::fs::write(dir.join("traj.xtc"), vec![3u8; 2048]).unwrap();
    std::fs::write(dir.join("structure.gro"), "structure\n").unwrap();
    std::fs::write(dir.join("top.pdb"), format!("ATOM {name}\n")).unwrap();
    dir
}

#[test]
fn submit_uploads_and_records_status() {
    let store = setup_store();
    let landing = format!("{LANDING}/sim1");
    std::fs::create_dir_all(store_path(store.path(), &landing)).unwrap();
    let src = tempfile::tempdir().unwrap();
    let sim = setup_simulation(src.path(), "sim1");
    mdrepo()
        .args(["submit", "--ticket-string", &format!("tkt1:{landing}"), "-n", "1", "--summary"])
        .arg("--store-root")
        .arg(store.path())
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("files transferred: 4"));
    let landed = store_path(store.path(), &landing);
    assert_eq!(
        std::fs::read(landed.join("traj.xtc")).unwrap(),
        std::fs::read(sim.join("traj.xtc")).unwrap()
    );
    let status: serde_json::Value =
        serde_json::from_slice(&std::fs::read(landed.join("mdrepo-submission.unknown.json")).unwrap()).unwrap();
    assert_eq!(status["status"], "completed");
}

#[test]
fn submit_rejects_unexpected_simulation_count() {
    let store = setup_store();
    let src = tempfile::tempdir().unwrap();
    setup_simulation(src.path(), "sim1");
    mdrepo()
        .args(["submit", "--ticket-string", &format!("tkt1:{LANDING}/sim1"), "-n", "2"])
        .arg("--store-root")
        .arg(store.path())
        .arg(src.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Expected 2 simulation(s)"))
        .stderr(predicate::str::contains("sim1"));
}

#[test]
fn get_downloads_released_simulation() {
    let store = setup_store();
    let release = format!("{RELEASE}/sim7");
    let released = store_path(store.path(), &release);
    std::fs::create_dir_all(released.join("frames")).unwrap();
    std::fs::write(released.join("top.pdb"), "ATOM\n").unwrap();
    std::fs::write(released.join("frames").join("f1.xtc"), vec![9u8; 1500]).unwrap();
    let dest = tempfile::tempdir().unwrap();
    mdrepo()
        .args(["get", "--ticket-string", &format!("tkt7:{release}")])
        .arg("--store-root")
        .arg(store.path())
        .arg(dest.path())
        .assert()
        .success();
    assert_eq!(std::fs::read(dest.path().join("sim7/top.pdb")).unwrap(), b"ATOM\n");
    assert_eq!(std::fs::read(dest.path().join("sim7/frames/f1.xtc")).unwrap().len(), 1500);
}

#[test]
fn get_without_credentials_fails() {
    let store = setup_store();
    let dest = tempfile::tempdir().unwrap();
    mdrepo()
        .arg("get")
        .arg("--store-root")
        .arg(store.path())
        .arg(dest.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("A token is required"));
}

#[test]
fn get_without_store_root_fails() {
    let dest = tempfile::tempdir().unwrap();
    mdrepo()
        .args(["get", "--ticket-string", &format!("tkt:{RELEASE}/sim")])
        .arg(dest.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("MDREPO_STORE_ROOT"));
}

#[test]
fn quiet_suppresses_error_output() {
    mdrepo()
        .args(["-q", "describe-ticket"])
        .assert()
        .code(1)
        .stderr(predicate::str::is_empty());
}

#[test]
fn describe_ticket_prints_table() {
    mdrepo()
        .args([
            "describe-ticket",
            "--ticket-string",
            &format!("tkt1:{RELEASE}/sim1;tkt2:{RELEASE}/sim2"),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("TICKET"))
        .stdout(predicate::str::contains("tkt1"))
        .stdout(predicate::str::contains(format!("{RELEASE}/sim2")));
}

#[test]
fn describe_ticket_rejects_malformed_string() {
    mdrepo()
        .args(["describe-ticket", "--ticket-string", "no-separator-here"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("is invalid"));
}

#[test]
fn submitls_lists_landing_collection() {
    let store = setup_store();
    let landing = format!("{LANDING}/sim1");
    let landed = store_path(store.path(), &landing);
    std::fs::create_dir_all(landed.join("extra")).unwrap();
    std::fs::write(landed.join("traj.xtc"), vec![1u8; 64]).unwrap();
    mdrepo()
        .args(["submitls", "--ticket-string", &format!("tkt1:{landing}")])
        .arg("--store-root")
        .arg(store.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("[{landing}]")))
        .stdout(predicate::str::contains("traj.xtc"))
        .stdout(predicate::str::contains("extra"));
}
