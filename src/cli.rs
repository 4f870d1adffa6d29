//! CLI implementation for gridrun

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use gridrun::config::GridEnv;
use gridrun::flags::OptionFlags;
use gridrun::ops::OpArgs;
use gridrun::stream::{run_stream, StreamOptions};
use gridrun::{DEFAULT_MAX_CONNECT_TIME, MIN_BUFFER_SIZE};

// Exit codes
#[repr(i32)]
#[allow(dead_code)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
}

#[derive(Parser)]
#[command(name = "gridrun")]
#[command(about = "Batch executor for a data-grid storage service")]
#[command(version)]
pub struct Cli {
    /// Close and reopen the connection after this many seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECT_TIME)]
    max_connect_time: u64,

    /// Transfer buffer size in bytes
    #[arg(long, default_value_t = gridrun::DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Zone qualifier for catalog queries
    #[arg(long)]
    zone: Option<String>,

    /// TCP connect timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Flush stdout after every response
    #[arg(long)]
    unbuffered: bool,

    /// Report access control lists in listings by default
    #[arg(long)]
    acl: bool,

    /// Report metadata AVUs in listings by default
    #[arg(long)]
    avu: bool,

    /// Report checksums in listings by default
    #[arg(long)]
    checksum: bool,

    /// Report collection contents in listings by default
    #[arg(long)]
    contents: bool,

    /// Report replicas in listings by default
    #[arg(long)]
    replicates: bool,

    /// Report sizes in listings by default
    #[arg(long)]
    size: bool,

    /// Report timestamps in listings by default
    #[arg(long)]
    timestamp: bool,

    /// Verbose logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn default_flags(&self) -> OptionFlags {
        OptionFlags {
            print_acl: self.acl,
            print_avu: self.avu,
            print_checksum: self.checksum,
            calculate_checksum: self.checksum,
            print_contents: self.contents,
            print_replicate: self.replicates,
            print_size: self.size,
            print_timestamp: self.timestamp,
            flush: self.unbuffered,
            ..OptionFlags::default()
        }
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Log to stderr to keep stdout clean for response JSON
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let env = GridEnv::load();
    tracing::debug!(
        host = %env.host,
        port = env.port,
        zone = %env.zone,
        user = %env.user,
        "Loaded grid environment"
    );

    let options = StreamOptions {
        defaults: OpArgs {
            flags: cli.default_flags(),
            buffer_size: cli.buffer_size.max(MIN_BUFFER_SIZE),
            zone: cli.zone.clone(),
            path: None,
        },
        max_connect_time: cli.max_connect_time,
        connect_timeout: Duration::from_secs(cli.connect_timeout),
    };

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let errors = run_stream(stdin.lock(), stdout.lock(), &env, &options)?;

    if errors > 0 {
        std::process::exit(ExitCode::GeneralError as i32);
    }
    Ok(())
}
