//! Configuration values and fixed locations
//!
//! Everything here is built once by the binary and passed down explicitly; nothing is read from global state.

pub const ZONE: &str = "iplant";
pub const ZONE_ROOT: &str = "/iplant/";
pub const HOME_PATH: &str = "/iplant/home/shared/mdrepo/prod";
pub const LANDING_PATH: &str = "/iplant/home/shared/mdrepo/prod/landing";
pub const RELEASE_PATH: &str = "/iplant/home/shared/mdrepo/prod/release";

pub const SERVICE_URL: &str = "https://mdrepo.org";
pub const GET_TICKET_API: &str = "/api/v1/get_ticket";
pub const VERIFY_METADATA_API: &str = "/api/v1/verify_metadata";

pub const STORE_HOST: &str = "data.cyverse.org";
pub const STORE_PORT: u16 = 1247;
pub const STORE_USER: &str = "md-uploader";
pub const WEBDAV_URL: &str = "https://data.cyverse.org";
pub const WEBDAV_PREFIX: &str = "/dav-anon";

pub const SUBMISSION_METADATA_FILENAME: &str = "mdrepo-metadata.toml";
pub const SUBMISSION_STATUS_PREFIX: &str = "mdrepo-submission.";
pub const SUBMISSION_STATUS_SUFFIX: &str = ".json";

pub const TRANSFER_THREAD_NUM_DEFAULT: usize = 5;
pub const TRANSFER_THREAD_NUM_PER_FILE_DEFAULT: usize = 5;
pub const TRANSFER_THREAD_NUM_MAX: usize = 20;
pub const TCP_BUFFER_SIZE_DEFAULT: &str = "4MB";
/// Files below this size are always transferred with a single stream.
pub const PARALLEL_TRANSFER_MIN_SIZE: u64 = 80 * 1024 * 1024;
pub const MAX_SIMULATION_SIZE_DEFAULT: &str = "100GiB";

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Credential state of one invocation.
///
/// `ticket_string` is filled at most once, either from the command line or by resolving `token` against the
/// ticket service; once set it is reused by every retry attempt.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub token: Option<String>,
    pub ticket_string: Option<String>,
    pub ticket_password: Option<String>,
    pub service_url: String,
}

impl Config {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            ..Default::default()
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.ticket_string.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TransferMode {
    /// Parallel transfer through the store's native protocol
    #[default]
    Icat,
    /// Native protocol, redirected to the resource server
    Redirect,
    /// Single connection over HTTP (downloads only)
    Webdav,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferMode::Icat => "icat",
            TransferMode::Redirect => "redirect",
            TransferMode::Webdav => "webdav",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub thread_num: usize,
    pub thread_num_per_file: usize,
    pub tcp_buffer_size: usize,
    pub mode: TransferMode,
    pub single_threaded: bool,
    pub force: bool,
    pub show_progress: bool,
    pub show_path: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            thread_num: TRANSFER_THREAD_NUM_DEFAULT,
            thread_num_per_file: TRANSFER_THREAD_NUM_PER_FILE_DEFAULT,
            tcp_buffer_size: 4_000_000,
            mode: TransferMode::Icat,
            single_threaded: false,
            force: false,
            show_progress: false,
            show_path: false,
        }
    }
}

impl TransferConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.thread_num == 0 {
            return Err("thread_num must be at least 1".to_string());
        }
        if self.thread_num_per_file == 0 {
            return Err("thread_num_per_file must be at least 1".to_string());
        }
        if self.thread_num > TRANSFER_THREAD_NUM_MAX {
            return Err(format!(
                "thread_num must not exceed {TRANSFER_THREAD_NUM_MAX}"
            ));
        }
        if self.tcp_buffer_size == 0 {
            return Err("tcp_buffer_size must be positive".to_string());
        }
        Ok(())
    }

    /// Scheduler width; 1 when running single threaded.
    pub fn effective_threads(&self) -> usize {
        if self.single_threaded {
            1
        } else {
            self.thread_num.max(1)
        }
    }
}

pub fn parse_size(text: &str) -> Result<u64, String> {
    text.trim()
        .parse::<bytesize::ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|err| format!("invalid size {text:?}: {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub count: u32,
    pub interval: std::time::Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            count: 0,
            interval: std::time::Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Parses a human readable interval such as "5s" or "1min".
    pub fn parse_interval(text: &str) -> Result<std::time::Duration, String> {
        humantime::parse_duration(text.trim()).map_err(|err| format!("invalid interval {text:?}: {err}"))
    }
}

/// Where the remote store lives.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub zone: String,
    pub user: String,
    /// Local mount point of the zone
    pub mount_root: std::path::PathBuf,
    pub webdav_url: String,
    pub webdav_prefix: String,
}

impl StoreConfig {
    pub fn new(mount_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            host: STORE_HOST.to_string(),
            port: STORE_PORT,
            zone: ZONE.to_string(),
            user: STORE_USER.to_string(),
            mount_root: mount_root.into(),
            webdav_url: WEBDAV_URL.to_string(),
            webdav_prefix: WEBDAV_PREFIX.to_string(),
        }
    }

    pub fn account(&self, ticket: &crate::ticket::Ticket) -> remote::Account {
        remote::Account {
            host: self.host.clone(),
            port: self.port,
            zone: self.zone.clone(),
            user: self.user.clone(),
            ticket: ticket.credential.clone(),
            collection: crate::path::clean_remote(&ticket.path),
        }
    }
}

/// Options specific to submissions.
#[derive(Debug, Clone, Default)]
pub struct SubmitConfig {
    pub expected_simulations: Option<usize>,
    pub orcid: Option<String>,
    pub max_simulation_size: u64,
}
