use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use esa_export::Exporter;
use tracing::{debug, info, warn};

use crate::app::{exit_handler, progress_manager, terminal};
use crate::cli::Args;
use crate::{ProcessExit, output};

pub(crate) async fn run_export() -> Result<ProcessExit> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let default_level = terminal::resolve_default_log_level(args.quiet, args.verbose);
    let no_color = terminal::no_color_env_requested() || terminal::is_dumb_terminal();
    terminal::init_tracing(default_level, no_color);

    let config = args.to_config();
    config.validate()?;
    let query = config.search_query()?;
    debug!(
        team = %config.team,
        query = %config.query,
        output = %config.output_root.display(),
        dry_run = config.dry_run,
        "configuration validated"
    );
    info!("esa-export starting");

    let client = Arc::new(
        config
            .build_client()
            .context("Failed to initialize the API client")?,
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let exporter =
        Exporter::new(client, config.export_options()).with_interrupt_flag(Arc::clone(&interrupted));

    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_spinner, exporter.stats(), config.limit);

    let result = exporter.run(&query).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let report = result?;

    if !args.quiet || report.dry_run {
        output::print_completion_summary(&report, &config.output_root, args.verbose > 0);
    }

    if interrupted.load(Ordering::SeqCst) {
        warn!("{}", output::interrupted_notice(report.saved()));
    }

    Ok(exit_handler::determine_exit_outcome(&report))
}
