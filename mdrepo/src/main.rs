use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use common::config::{self, Config, RetryConfig, StoreConfig, SubmitConfig, TransferConfig, TransferMode};
use common::error::Error;

const STORE_ROOT_ENV: &str = "MDREPO_STORE_ROOT";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mdrepo",
    version,
    about = "Download released simulations from MD-Repo and submit new ones",
    long_about = "`mdrepo` moves molecular dynamics simulation data between your disk and the MD-Repo data store.

Access is granted through short-lived tickets. Pass the token you received from MD-Repo with --token (it is \
exchanged for tickets automatically) or a ticket string with --ticket-string.

EXAMPLES:
    # Download the simulations granted by a token into ./data
    mdrepo get --token <TOKEN> ./data --progress

    # Submit every simulation directory found in ./sims, expecting 3 of them
    mdrepo submit --token <TOKEN> -n 3 ./sims --progress

    # Show what has been uploaded so far
    mdrepo submitls --token <TOKEN> --orcid 0000-0002-9100-4108"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print summary at the end
    #[arg(long, global = true, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", global = true, help_heading = "Progress & output")]
    quiet: bool,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        global = true,
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        global = true,
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Download simulations granted by a ticket into a local directory
    Get(GetArgs),
    /// Validate and upload simulation directories
    Submit(SubmitArgs),
    /// List what has been uploaded for a submission
    #[command(name = "submitls", alias = "submit-list")]
    SubmitList(SubmitListArgs),
    /// Print the tickets contained in a ticket string or granted by a token
    #[command(alias = "describe_ticket")]
    DescribeTicket(DescribeArgs),
    /// Print build version information as JSON
    Version,
}

#[derive(Args, Debug, Clone)]
struct CredentialArgs {
    /// MD-Repo token, exchanged for tickets through the MD-Repo service
    #[arg(short = 't', long, help_heading = "Credentials")]
    token: Option<String>,

    /// Ticket string (`ticket:path[;ticket:path...]`), used instead of a token
    #[arg(long, alias = "ticket_string", value_name = "TICKETS", help_heading = "Credentials")]
    ticket_string: Option<String>,

    /// Password of an encrypted ticket string
    #[arg(long, help_heading = "Credentials")]
    password: Option<String>,

    /// MD-Repo service URL
    #[arg(
        long,
        alias = "svc_url",
        default_value = config::SERVICE_URL,
        value_name = "URL",
        help_heading = "Credentials"
    )]
    service_url: String,
}

impl CredentialArgs {
    fn config(&self) -> Config {
        let mut config = Config::new(self.service_url.clone());
        config.token = self.token.clone();
        config.ticket_string = self.ticket_string.clone();
        config.ticket_password = self.password.clone();
        config
    }
}

#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// Local mount point of the data store zone (default: $MDREPO_STORE_ROOT)
    #[arg(long, value_name = "DIR", help_heading = "Data store")]
    store_root: Option<PathBuf>,

    /// WebDAV gateway used with --mode webdav
    #[arg(long, default_value = config::WEBDAV_URL, value_name = "URL", help_heading = "Data store")]
    webdav_url: String,
}

impl StoreArgs {
    fn config(&self) -> anyhow::Result<StoreConfig> {
        let root = self
            .store_root
            .clone()
            .or_else(|| std::env::var_os(STORE_ROOT_ENV).map(PathBuf::from))
            .with_context(|| format!("no data store mount given, use --store-root or set {STORE_ROOT_ENV}"))?;
        let mut store = StoreConfig::new(root);
        store.webdav_url = self.webdav_url.clone();
        Ok(store)
    }
}

#[derive(Args, Debug, Clone)]
struct TransferArgs {
    /// Total number of concurrent transfer streams
    #[arg(
        long,
        alias = "thread_num",
        default_value_t = config::TRANSFER_THREAD_NUM_DEFAULT,
        value_name = "N",
        help_heading = "Transfer options"
    )]
    thread_num: usize,

    /// Maximum number of streams for a single large file
    #[arg(
        long,
        alias = "thread_num_per_file",
        default_value_t = config::TRANSFER_THREAD_NUM_PER_FILE_DEFAULT,
        value_name = "N",
        help_heading = "Transfer options"
    )]
    thread_num_per_file: usize,

    /// TCP socket buffer size
    #[arg(
        long,
        alias = "tcp_buffer_size",
        default_value = config::TCP_BUFFER_SIZE_DEFAULT,
        value_name = "SIZE",
        help_heading = "Transfer options"
    )]
    tcp_buffer_size: bytesize::ByteSize,

    /// Transfer method
    #[arg(long, value_enum, default_value_t = TransferMode::Icat, help_heading = "Transfer options")]
    mode: TransferMode,

    /// Transfer every file with a single stream
    #[arg(long, alias = "single_threaded", help_heading = "Transfer options")]
    single_threaded: bool,

    /// Transfer files even when the destination already has the same content
    #[arg(short, long, help_heading = "Transfer options")]
    force: bool,

    /// Retry the transfer up to N more times on failure
    #[arg(long, default_value = "0", value_name = "N", help_heading = "Transfer options")]
    retry: u32,

    /// Delay between retries, e.g. "5s" or "1min"
    #[arg(
        long,
        default_value = "5s",
        value_name = "DELAY",
        value_parser = RetryConfig::parse_interval,
        help_heading = "Transfer options"
    )]
    retry_interval: std::time::Duration,

    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Label progress bars with full paths
    #[arg(long, alias = "show_path", help_heading = "Progress & output")]
    show_path: bool,
}

impl TransferArgs {
    fn config(&self) -> anyhow::Result<TransferConfig> {
        let tcp_buffer_size = usize::try_from(self.tcp_buffer_size.as_u64())
            .map_err(|_| anyhow!("--tcp-buffer-size {} is too large", self.tcp_buffer_size))?;
        let transfer = TransferConfig {
            thread_num: self.thread_num,
            thread_num_per_file: self.thread_num_per_file,
            tcp_buffer_size,
            mode: self.mode,
            single_threaded: self.single_threaded,
            force: self.force,
            show_progress: self.progress,
            show_path: self.show_path,
        };
        transfer.validate().map_err(|err| anyhow!("invalid transfer options: {err}"))?;
        Ok(transfer)
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig {
            count: self.retry,
            interval: self.retry_interval,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct GetArgs {
    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    transfer: TransferArgs,

    /// Existing local directory to download into
    #[arg(default_value = ".")]
    target: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct SubmitArgs {
    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    transfer: TransferArgs,

    /// Number of simulations the sources must contain
    #[arg(short = 'n', long, alias = "expected_simulations", value_name = "N", help_heading = "Submission")]
    expected_simulations: Option<usize>,

    /// Submitter ORC-ID, overriding the one in the metadata
    #[arg(long, help_heading = "Submission")]
    orcid: Option<String>,

    /// Largest total size of one simulation's files
    #[arg(
        long,
        default_value = config::MAX_SIMULATION_SIZE_DEFAULT,
        value_name = "SIZE",
        help_heading = "Submission"
    )]
    max_simulation_size: bytesize::ByteSize,

    /// Simulation directories, or directories containing them
    #[arg(required = true)]
    sources: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct SubmitListArgs {
    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(flatten)]
    store: StoreArgs,

    /// Submitter ORC-ID, needed to exchange a token for submission tickets
    #[arg(long)]
    orcid: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct DescribeArgs {
    #[command(flatten)]
    credentials: CredentialArgs,
}

fn render_lines(title: &str, problems: &[String]) -> String {
    let mut out = title.to_string();
    for problem in problems {
        out.push_str("\n  - ");
        out.push_str(problem);
    }
    out
}

/// User-facing message for a failed command.
fn render_error(err: &anyhow::Error) -> String {
    let Some(kind) = common::error::kind(err) else {
        return format!("Error: {err:#}");
    };
    let message = match kind {
        Error::InvalidTicket(raw) => format!(
            "The ticket string {raw:?} is invalid. Check the token or ticket you were given."
        ),
        Error::DecryptFailed(reason) => {
            format!("The ticket could not be decrypted ({reason}). Is the password correct?")
        }
        Error::Service(message) => format!("The MD-Repo service rejected the request: {message}"),
        Error::Dial { url, .. } => {
            format!("Could not connect to {url}. Check your network connection and try again.")
        }
        Error::WebDav { url, status } => format!("Download from {url} failed with HTTP status {status}."),
        Error::NotFound(path) => format!("{path} does not exist."),
        Error::NotDirectory(path) => format!("{path} is not a directory."),
        Error::NotFile(path) => format!("{path} is not a file."),
        Error::SimulationCountMismatch {
            expected,
            valid,
            invalid,
        } => {
            let mut out = format!(
                "Expected {expected} simulation(s), but found {} valid simulation director{}:",
                valid.len(),
                if valid.len() == 1 { "y" } else { "ies" }
            );
            for dir in valid {
                out.push_str(&format!("\n  + {}", dir.display()));
            }
            for (dir, reason) in invalid {
                out.push_str(&format!("\n  - {} ({})", dir.display(), reason));
            }
            out
        }
        Error::InvalidSubmitMetadata(problems) => render_lines("The submission metadata is invalid:", problems),
        Error::MetadataVerification(problems) => {
            render_lines("The MD-Repo service rejected the submission metadata:", problems)
        }
        Error::TokenNotProvided => "A token is required. Pass it with --token.".to_string(),
        Error::InvalidOrcId(reason) => {
            format!("Could not determine the submitter ORC-ID: {reason}. Use --orcid to set it.")
        }
        Error::InvalidSubmitStatus(status) => format!("The submission status file is corrupt (status {status:?})."),
    };
    format!("Error: {message}\n\nDetails: {err:#}")
}

async fn async_main(command: Command) -> anyhow::Result<common::Summary> {
    match command {
        Command::Get(args) => {
            let store = args.store.config()?;
            let connector = remote::mount::MountConnector::new(store.mount_root.clone());
            common::get::get(
                &connector,
                &mut args.credentials.config(),
                &store,
                &args.transfer.config()?,
                &args.transfer.retry(),
                &args.target,
            )
            .await
        }
        Command::Submit(args) => {
            let store = args.store.config()?;
            let connector = remote::mount::MountConnector::new(store.mount_root.clone());
            let options = SubmitConfig {
                expected_simulations: args.expected_simulations,
                orcid: args.orcid.clone(),
                max_simulation_size: args.max_simulation_size.as_u64(),
            };
            common::submit::submit(
                &connector,
                &mut args.credentials.config(),
                &store,
                &args.transfer.config()?,
                &options,
                &args.transfer.retry(),
                &args.sources,
            )
            .await
        }
        Command::SubmitList(args) => {
            let store = args.store.config()?;
            let connector = remote::mount::MountConnector::new(store.mount_root.clone());
            let listing = common::submit_list::submit_list(
                &connector,
                &mut args.credentials.config(),
                &store,
                args.orcid.as_deref(),
                config::TRANSFER_THREAD_NUM_DEFAULT,
            )
            .await?;
            print!("{listing}");
            Ok(common::Summary::default())
        }
        Command::DescribeTicket(args) => {
            let mut config = args.credentials.config();
            let tickets = common::service::resolve_download_tickets(&mut config).await?;
            print!("{}", common::ticket::describe_ticket_list(&tickets));
            Ok(common::Summary::default())
        }
        Command::Version => {
            println!("{}", common::version::BuildVersion::current().to_json()?);
            Ok(common::Summary::default())
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    let output = common::OutputConfig {
        quiet: cli.quiet,
        verbose: cli.verbose,
        print_summary: cli.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: cli.max_workers,
        max_blocking_threads: cli.max_blocking_threads,
    };
    let command = cli.command.clone();
    tracing::trace!("running {:?}", &command);
    let res = common::run(output, runtime, render_error, || async_main(command));
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
