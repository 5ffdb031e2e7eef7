use crate::model::{HostConfig, WorkerSpec, WritePolicy};
use crate::orchestrator::{run_host, HostContext, UiCommand};
use crate::storage;
use crate::worker::WorkerHandle;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Spawn a blocking writer for the display channel (stdout) to avoid blocking async tasks.
/// Each message is written as exactly one line.
fn spawn_display_writer() -> (mpsc::UnboundedSender<String>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let mut out = std::io::LineWriter::new(stdout.lock());
        while let Some(line) = rx.blocking_recv() {
            if writeln!(out, "{}", line).is_err() {
                break;
            }
        }
        let _ = out.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "companion-host",
    version,
    about = "Host process for a game companion: runs the data worker and relays its JSON lines"
)]
pub struct Cli {
    /// Directory holding the build store, talent cache and worker data
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Build-string store (defaults to <data-dir>/talent_builds.json)
    #[arg(long)]
    pub builds_file: Option<PathBuf>,

    /// Talent-tree cache directory (defaults to <data-dir>/talent_cache)
    #[arg(long)]
    pub tree_cache_dir: Option<PathBuf>,

    /// Worker executable (defaults to this binary's `worker` subcommand)
    #[arg(long)]
    pub worker_program: Option<PathBuf>,

    /// Argument passed to the worker; repeat for several
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    pub worker_args: Vec<String>,

    /// What to do with a command when the worker's input can't take it
    #[arg(long, value_enum, default_value_t = WritePolicy::DropNewest)]
    pub write_policy: WritePolicy,

    /// Commands that may wait for the worker's input before the policy applies
    #[arg(long, default_value_t = 16)]
    pub write_queue: usize,

    /// Push saved builds and cached talent trees on startup.
    /// Use --preload true or --preload false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub preload: bool,

    /// Log filter used when RUST_LOG is not set (e.g. info, companion_host=debug)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Mode>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Mode {
    /// Run the local backend worker over stdin/stdout
    Worker,
}

/// Logs go to stderr; stdout is reserved for envelopes.
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Build a `HostConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<HostConfig> {
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(storage::default_data_dir);

    let worker = match &args.worker_program {
        Some(program) => WorkerSpec {
            program: program.clone(),
            args: args.worker_args.clone(),
        },
        None => WorkerSpec {
            program: std::env::current_exe().context("locate current executable")?,
            args: vec![
                "--data-dir".to_string(),
                data_dir.display().to_string(),
                "worker".to_string(),
            ],
        },
    };

    Ok(HostConfig {
        builds_file: args
            .builds_file
            .clone()
            .unwrap_or_else(|| data_dir.join(storage::BUILDS_FILE)),
        tree_cache_dir: args
            .tree_cache_dir
            .clone()
            .unwrap_or_else(|| data_dir.join(storage::TREE_CACHE_DIR)),
        data_dir,
        worker,
        write_policy: args.write_policy,
        write_queue: args.write_queue,
        preload: args.preload,
    })
}

pub async fn run(args: Cli) -> Result<()> {
    init_tracing(&args.log_level);

    match &args.command {
        Some(Mode::Worker) => {
            let data_dir = args
                .data_dir
                .clone()
                .unwrap_or_else(storage::default_data_dir);
            crate::backend::run(data_dir).await
        }
        None => run_host_process(args).await,
    }
}

async fn run_host_process(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    debug!(?cfg, "host configuration");

    let (worker, worker_events) =
        WorkerHandle::spawn(&cfg.worker, cfg.write_policy, cfg.write_queue)?;
    let (display_tx, display_handle) = spawn_display_writer();
    let (ui_tx, ui_rx) = mpsc::unbounded_channel::<UiCommand>();

    if cfg.preload {
        let _ = ui_tx.send(UiCommand::DisplayLoaded);
    }

    // UI commands arrive one per line on stdin; EOF means the UI went away.
    let stdin_tx = ui_tx.clone();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if stdin_tx.send(UiCommand::Submit(line)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("ui input read failed: {e}");
                    break;
                }
            }
        }
        let _ = stdin_tx.send(UiCommand::Quit);
    });

    let signal_tx = ui_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            let _ = signal_tx.send(UiCommand::Quit);
        }
    });
    drop(ui_tx);

    let ctx = HostContext::new(cfg, display_tx);
    run_host(ctx, worker, worker_events, ui_rx).await?;

    let _ = display_handle.await;
    Ok(())
}
