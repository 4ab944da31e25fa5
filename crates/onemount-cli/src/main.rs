//! OneMount CLI — the `onemount` binary (spec section 6, "CLI surface").
//!
//! Invoked with a mount-point positional argument, it builds a [`Config`]
//! from flags (falling back to a YAML config file and defaults) and runs
//! the daemon in the foreground. The `stats` subcommand instead opens the
//! persistent store and content cache read-only and reports on them,
//! without mounting anything.

mod stats;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use onemount_core::config::Config;

/// Native Linux filesystem for Microsoft OneDrive.
#[derive(Debug, Parser)]
#[command(name = "onemount", version, about = "Native Linux filesystem for Microsoft OneDrive")]
struct Cli {
    /// Directory to mount the OneDrive filesystem at. Required unless a
    /// subcommand is given.
    mount_point: Option<PathBuf>,

    /// Alternate YAML configuration file (defaults to the platform config
    /// directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the content-cache directory.
    #[arg(long = "cache-dir")]
    cache_dir: Option<PathBuf>,

    /// Days after which an unused cached file body is evicted (1-30).
    #[arg(long = "cache-expiration-days")]
    cache_expiration_days: Option<u32>,

    /// Hours between cache-eviction sweeps (1-720).
    #[arg(long = "cache-cleanup-interval-hours")]
    cache_cleanup_interval_hours: Option<u32>,

    /// Content-cache ceiling in bytes; 0 means unlimited.
    #[arg(long = "max-cache-size-bytes")]
    max_cache_size_bytes: Option<u64>,

    /// Skip interactive OAuth and expect pre-provisioned credentials.
    #[arg(long = "headless-auth")]
    headless_auth: bool,

    /// Disable the push channel and rely solely on interval polling.
    #[arg(long = "polling-only")]
    polling_only: bool,

    /// Seconds between delta polls while the push channel is unhealthy
    /// (30-7200).
    #[arg(long = "push-fallback-interval-secs")]
    push_fallback_interval_secs: Option<u64>,

    /// Metadata request timeout in seconds (1-300).
    #[arg(long = "metadata-timeout-secs")]
    metadata_timeout_secs: Option<u64>,

    /// Download-worker graceful shutdown timeout in seconds (1-300).
    #[arg(long = "download-shutdown-secs")]
    download_shutdown_secs: Option<u64>,

    /// Upload-manager graceful shutdown timeout in seconds (1-300).
    #[arg(long = "upload-shutdown-secs")]
    upload_shutdown_secs: Option<u64>,

    /// Filesystem unmount timeout in seconds (1-300).
    #[arg(long = "filesystem-shutdown-secs")]
    filesystem_shutdown_secs: Option<u64>,

    /// Emit machine-readable JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print cache and sync statistics, then exit. Read-only: does not
    /// mount the filesystem or touch the network.
    Stats,
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(mount_point) = &cli.mount_point {
        config.mount.mount_point = mount_point.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.mount.cache_dir = dir.clone();
    }
    config.mount.headless_auth |= cli.headless_auth;

    if let Some(days) = cli.cache_expiration_days {
        config.cache.expiration_days = days;
    }
    if let Some(hours) = cli.cache_cleanup_interval_hours {
        config.cache.cleanup_interval_hours = hours;
    }
    if let Some(bytes) = cli.max_cache_size_bytes {
        config.cache.max_cache_size_bytes = bytes;
    }

    config.delta.polling_only |= cli.polling_only;
    if let Some(secs) = cli.push_fallback_interval_secs {
        config.delta.push_fallback_interval_secs = secs;
    }

    if let Some(secs) = cli.metadata_timeout_secs {
        config.timeouts.metadata_request_secs = secs;
    }
    if let Some(secs) = cli.download_shutdown_secs {
        config.timeouts.download_worker_shutdown_secs = secs;
    }
    if let Some(secs) = cli.upload_shutdown_secs {
        config.timeouts.upload_graceful_shutdown_secs = secs;
    }
    if let Some(secs) = cli.filesystem_shutdown_secs {
        config.timeouts.filesystem_shutdown_secs = secs;
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if std::env::var("ONEMOUNT_DEBUG").is_ok() { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let mut config = cli
        .config
        .clone()
        .map(|path| Config::load_or_default(&path))
        .unwrap_or_else(|| Config::load_or_default(&Config::default_path()));
    apply_overrides(&mut config, &cli);

    match &cli.command {
        Some(Command::Stats) => {
            let runtime = tokio::runtime::Runtime::new().expect("failed to start async runtime");
            match runtime.block_on(stats::run(&config)) {
                Ok(report) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
                    } else {
                        stats::print_human(&report);
                    }
                }
                Err(e) => {
                    eprintln!("failed to read stats: {e:#}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            if cli.mount_point.is_none() {
                eprintln!("a mount point is required unless a subcommand is given");
                std::process::exit(1);
            }

            let errors = config.validate();
            if !errors.is_empty() {
                for e in &errors {
                    eprintln!("invalid configuration: {e}");
                }
                std::process::exit(1);
            }

            let runtime = tokio::runtime::Runtime::new().expect("failed to start async runtime");
            if let Err(e) = runtime.block_on(onemount_daemon::run(config)) {
                eprintln!("onemount failed: {e:#}");
                std::process::exit(onemount_daemon::exit_code_for(&e));
            }
        }
    }
}
