//! `gimme install`: run the install pipeline and print its report.

use gimme_core::pkg::AbortSignal;
use gimme_core::{install_with_signal, Config, Error, InstallConfig, InstallOutcome, InstallReport};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing::warn;

/// Exit code when the run finished with failures or was cancelled.
pub const EXIT_FAILED: i32 = 1;

/// Exit code when the run could not start.
pub const EXIT_ABORTED: i32 = 2;

/// JSON output when the run could not start.
#[derive(Debug, Serialize)]
struct InstallErrorJson {
    ok: bool,
    error: ErrorInfo,
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    code: String,
    message: String,
}

/// Run an install for `config.cwd` and return the process exit code.
pub fn run(config: &Config, install: &InstallConfig, json: bool) -> Result<i32> {
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;

    let result = runtime.block_on(async {
        let signal = AbortSignal::new(install.run_timeout);

        let watcher = signal.clone();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling remaining work");
                watcher.abort();
            }
        });

        let result = install_with_signal(&config.cwd, install, signal).await;
        ctrl_c.abort();
        result
    });

    match result {
        Ok(outcome) => {
            if json {
                print_json(&outcome.report)?;
            } else {
                print_human(&outcome);
            }
            Ok(if outcome.report.ok { 0 } else { EXIT_FAILED })
        }
        Err(e) => {
            print_error(&e, json)?;
            Ok(EXIT_ABORTED)
        }
    }
}

fn print_json(report: &InstallReport) -> Result<()> {
    let out = serde_json::to_string_pretty(report).into_diagnostic()?;
    println!("{out}");
    Ok(())
}

fn print_error(e: &Error, json: bool) -> Result<()> {
    if json {
        let output = InstallErrorJson {
            ok: false,
            error: ErrorInfo {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        };
        let out = serde_json::to_string_pretty(&output).into_diagnostic()?;
        println!("{out}");
    } else {
        eprintln!("error: {} {}", e.code(), e);
    }
    Ok(())
}

fn print_human(outcome: &InstallOutcome) {
    let report = &outcome.report;

    if report.dry_run {
        println!("gimme install (dry run)");
        print!("{}", outcome.graph.render_tree());
        for placement in &outcome.layout.placements {
            println!("  {} -> {}", placement.key, placement.path.display());
        }
    } else {
        println!("gimme install");
    }

    println!(
        "  packages: {} total, {} resolved, {} installed, {} failed",
        report.counts.nodes, report.counts.resolved, report.counts.materialized, report.counts.failed
    );

    if !report.dry_run {
        for pkg in &report.installed {
            println!("  + {}@{}", pkg.name, pkg.version);
        }
    }

    for warning in &report.warnings {
        println!("  note: skipped {}: {}", warning.name, warning.message);
    }

    for failure in &report.failures {
        eprintln!("  ! {}: {} {}", failure.key, failure.code, failure.message);
        for requester in &failure.requesters {
            eprintln!("      required by {requester}");
        }
    }

    if !report.unfinished.is_empty() {
        eprintln!("  unfinished: {}", report.unfinished.join(", "));
    }

    if report.all_failed {
        eprintln!("  every dependency failed");
    }

    if report.cancelled {
        eprintln!("  run cancelled");
    }
}
