#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use gimme_core::{Config, InstallConfig};
use miette::Result;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "gimme")]
#[command(author, version, about = "Resolve and install package.json dependencies", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Install the dependencies declared in package.json
    Install {
        /// Registry base URL (default: GIMME_REGISTRY or the public npm registry)
        #[arg(long, value_name = "URL")]
        registry: Option<String>,

        /// Maximum concurrent archive downloads (default: GIMME_CONCURRENCY or 4)
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// Attempts per request before giving up, including the first
        #[arg(long, value_name = "N")]
        retries: Option<u32>,

        /// Abort the whole run on the first package failure
        #[arg(long)]
        strict: bool,

        /// Overall run budget in seconds (default: GIMME_RUN_TIMEOUT_SECS or none)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Also install devDependencies
        #[arg(long)]
        dev: bool,

        /// Resolve and print the plan without downloading or writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Install {
            registry,
            concurrency,
            retries,
            strict,
            timeout,
            dev,
            dry_run,
        }) => {
            let mut install = InstallConfig::from_env()
                .with_strict(strict)
                .with_dev(dev)
                .with_dry_run(dry_run);
            if let Some(registry) = registry {
                install = install.with_registry(registry);
            }
            if let Some(n) = concurrency {
                install = install.with_download_concurrency(n);
            }
            if let Some(attempts) = retries {
                let mut retry = install.retry;
                retry.max_attempts = attempts.max(1);
                install = install.with_retry(retry);
            }
            if let Some(secs) = timeout {
                install = install.with_run_timeout((secs > 0).then(|| Duration::from_secs(secs)));
            }

            let code = commands::install::run(&config, &install, cli.json)?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}
