//! Core of the `mdrepo` tool: moving simulation data between a local disk and the MD-Repo data store.
//!
//! # Flow
//!
//! 1. Credentials: a ticket string is given directly or resolved from a bearer token through the MD-Repo
//!    service ([`service`]). A ticket list ([`ticket`]) pairs short-lived store credentials with the collection
//!    each of them opens.
//! 2. For every ticket a session is opened on the store ([`remote::Connector`]) and released before the next.
//! 3. A planner ([`get::GetPlanner`], [`submit::SubmitPlanner`]) walks the source tree and turns every file
//!    that is not already present with the same content into a [`scheduler::TransferJob`].
//! 4. The [`scheduler::JobScheduler`] runs those jobs with weighted concurrency: a job for a large file may
//!    open several streams and is charged for each.
//! 5. Submissions keep a status record ([`status`]) in the landing collection, so an interrupted submission
//!    is visible on the server side.
//!
//! The transfer phase is retried in process ([`retry`]); already transferred files are skipped on the next
//! attempt.
//!
//! # Configuration
//!
//! Everything is passed explicitly. The binary builds [`config::Config`] (credentials),
//! [`config::TransferConfig`], [`config::StoreConfig`], [`config::RetryConfig`] and, for submissions,
//! [`config::SubmitConfig`], and hands them to [`get::get`], [`submit::submit`] or
//! [`submit_list::submit_list`] inside [`run`].

pub mod config;
pub mod crypto;
pub mod error;
pub mod get;
pub mod hash;
pub mod metadata;
pub mod path;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod submit;
pub mod submit_list;
pub mod ticket;
pub mod transfer;
pub mod version;
pub mod webdav;

#[cfg(test)]
pub mod testutils;

pub use config::{OutputConfig, RuntimeConfig};
pub use transfer::Summary;

fn log_filter(output: &OutputConfig) -> tracing_subscriber::EnvFilter {
    if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match (output.quiet, output.verbose) {
        (true, 0) => "off",
        (_, 0) => "error",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };
    tracing_subscriber::EnvFilter::new(level)
}

/// Runs `func` on a tokio runtime built from `runtime`, with logging set up from `output`.
///
/// Returns `None` on failure after printing `render_error(&error)` to stderr (unless quiet); the summary is
/// printed when requested or when running verbose.
pub fn run<T, Fut>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    render_error: impl FnOnce(&anyhow::Error) -> String,
    func: impl FnOnce() -> Fut,
) -> Option<T>
where
    T: std::fmt::Display,
    Fut: Future<Output = anyhow::Result<T>>,
{
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&output))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("failed to initialize logging: {err}");
    }
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!("failed to create the tokio runtime: {:#}", err);
            eprintln!("failed to create the tokio runtime: {err}");
            return None;
        }
    };
    let res = rt.block_on(func());
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(err) => {
            tracing::debug!("failed: {:?}", err);
            if !output.quiet {
                eprintln!("{}", render_error(&err));
            }
            None
        }
    }
}
