use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uio_core::{DiscoveryConfig, ScanPolicy};

mod commands;

#[derive(Parser)]
#[command(name = "lsuio")]
#[command(about = "List and probe Linux userspace-I/O devices", long_about = None)]
struct Cli {
    /// sysfs mount point (default: $UIO_SYSFS_ROOT or /sys)
    #[arg(long, global = true)]
    sysfs_root: Option<PathBuf>,

    /// Device node directory (default: $UIO_DEV_ROOT or /dev)
    #[arg(long, global = true)]
    dev_root: Option<PathBuf>,

    /// JSON discovery configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fail instead of skipping devices with unreadable metadata
    #[arg(long, global = true)]
    strict: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List UIO devices (default)
    List {
        /// Show each device's memory regions
        #[arg(short = 'm', long)]
        maps: bool,

        /// Open each device and check that its regions can be mapped
        #[arg(long)]
        mmap: bool,
    },

    /// Wait for interrupts on a device
    Irq {
        /// Device name (e.g., "uio0")
        device: String,

        /// Timeout per wait in milliseconds (waits forever if omitted)
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Number of interrupts to wait for
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Do not enable the interrupt before waiting
        #[arg(long)]
        no_enable: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn discovery_config(cli: &Cli) -> Result<DiscoveryConfig> {
    let mut config = match &cli.config {
        Some(path) => DiscoveryConfig::load(path)?,
        None => DiscoveryConfig::from_env(),
    };

    if let Some(root) = &cli.sysfs_root {
        config = config.with_sysfs_root(root);
    }
    if let Some(root) = &cli.dev_root {
        config = config.with_dev_root(root);
    }
    if cli.strict {
        config = config.with_policy(ScanPolicy::Abort);
    }

    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = discovery_config(&cli)?;
    tracing::debug!(?config, "Resolved discovery configuration");

    match cli.command {
        None => commands::list(&config, false, false)?,

        Some(Commands::List { maps, mmap }) => {
            commands::list(&config, maps, mmap)?;
        }

        Some(Commands::Irq { device, timeout_ms, count, no_enable }) => {
            commands::irq(&config, &device, timeout_ms, count, !no_enable)?;
        }
    }

    Ok(())
}
