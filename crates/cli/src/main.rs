//! clamwire CLI - talk to a clamd daemon.

mod cli;

use clamwire_client::ClamdClient;
use clamwire_core::{ClamdResult, ClientConfig, ScanMode, ScanResult};
use clamwire_service::{
    DirCycleProcessor, FsDirCycler, Lifecycle, ProcessorConfig, ScanEvent, TerminationEvent,
};
use clap::Parser;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const EXIT_INFECTED: u8 = 1;
const EXIT_ERROR: u8 = 2;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("CLAMWIRE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    init_tracing();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(i32::from(EXIT_ERROR));
    }));

    let cli = cli::Cli::parse();
    let config = match cli.client_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("clamwire: {e}");
            return ExitCode::from(EXIT_ERROR);
        }
    };
    debug!(host = %config.host, port = config.port, "resolved config");

    match cli.command {
        cli::Command::Ping => run_ping(&config),
        cli::Command::Version => report(ClamdClient::new(&config).version()),
        cli::Command::Commands => report(
            ClamdClient::new(&config)
                .version_commands()
                .map(|cmds| cmds.join("\n")),
        ),
        cli::Command::Stats => report(ClamdClient::new(&config).stats()),
        cli::Command::Reload => report(
            ClamdClient::new(&config)
                .reload_virus_databases()
                .map(|()| "RELOADING".to_string()),
        ),
        cli::Command::Shutdown => report(
            ClamdClient::new(&config)
                .shutdown_server()
                .map(|()| "shutdown requested".to_string()),
        ),
        cli::Command::Scan { paths, mode, json } => run_scan(&config, &paths, mode.into(), json),
        cli::Command::Stream {
            file,
            chunk_size,
            json,
        } => run_stream(&config, file.as_deref(), chunk_size, json),
        cli::Command::Watch {
            root,
            mode,
            idle_secs,
            rollover_secs,
            error_backoff_secs,
            state_file,
            run_for_secs,
        } => {
            let intervals = ProcessorConfig {
                idle_sleep: Duration::from_secs(idle_secs),
                rollover_sleep: Duration::from_secs(rollover_secs),
                error_backoff: Duration::from_secs(error_backoff_secs),
            };
            run_watch(
                &config,
                root,
                mode.into(),
                intervals,
                state_file,
                run_for_secs.map(Duration::from_secs),
            )
        }
    }
}

fn report(outcome: ClamdResult<String>) -> ExitCode {
    match outcome {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            warn!(%e, "command failed");
            eprintln!("clamwire: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run_ping(config: &ClientConfig) -> ExitCode {
    match ClamdClient::new(config).ping() {
        Ok(true) => {
            println!("PONG");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("clamwire: clamd did not answer PONG");
            ExitCode::from(EXIT_ERROR)
        }
        Err(e) => report(Err(e)),
    }
}

/// Print `result` and map it to the exit status.
fn print_result(label: &str, result: &ScanResult, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("clamwire: failed to serialize result: {e}");
                return ExitCode::from(EXIT_ERROR);
            }
        }
    }
    match result.detections() {
        None => {
            if !json {
                println!("{label}: OK");
            }
            ExitCode::SUCCESS
        }
        Some(detections) => {
            if !json {
                for (object, signatures) in detections {
                    for signature in signatures {
                        println!("{object}: {signature} FOUND");
                    }
                }
            }
            ExitCode::from(EXIT_INFECTED)
        }
    }
}

fn run_scan(config: &ClientConfig, paths: &[PathBuf], mode: ScanMode, json: bool) -> ExitCode {
    info!(count = paths.len(), ?mode, "scanning paths");
    let client = ClamdClient::new(config);
    match client.scan_all(paths, mode) {
        Ok(result) => {
            let label = match paths {
                [single] => single.display().to_string(),
                _ => format!("{} paths", paths.len()),
            };
            print_result(&label, &result, json)
        }
        Err(e) => {
            warn!(%e, "scan failed");
            eprintln!("clamwire: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run_stream(
    config: &ClientConfig,
    file: Option<&Path>,
    chunk_size: Option<usize>,
    json: bool,
) -> ExitCode {
    let chunk_size = chunk_size.unwrap_or(config.chunk_size);
    let client = ClamdClient::new(config);
    let (label, source): (String, Box<dyn Read>) = match file {
        Some(path) => match File::open(path) {
            Ok(f) => (path.display().to_string(), Box::new(f)),
            Err(e) => {
                eprintln!("clamwire: cannot open {}: {e}", path.display());
                return ExitCode::from(EXIT_ERROR);
            }
        },
        None => ("stream".to_string(), Box::new(std::io::stdin().lock())),
    };

    debug!(%label, chunk_size, "streaming to clamd");
    match client.scan_stream_chunked(source, chunk_size) {
        Ok(result) => print_result(&label, &result, json),
        Err(e) => {
            warn!(%e, "stream scan failed");
            eprintln!("clamwire: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Scan one emitted directory, printing detections.
fn scan_dir(client: &ClamdClient, mode: ScanMode, event: &ScanEvent) {
    match client.scan(&event.dir, mode) {
        Ok(result) => match result.detections() {
            None => info!(dir = %event.dir.display(), "clean"),
            Some(detections) => {
                for (object, signatures) in detections {
                    for signature in signatures {
                        println!("{object}: {signature} FOUND");
                    }
                }
            }
        },
        Err(e) => warn!(dir = %event.dir.display(), %e, "directory scan failed"),
    }
}

fn run_watch(
    config: &ClientConfig,
    root: PathBuf,
    mode: ScanMode,
    intervals: ProcessorConfig,
    state_file: Option<PathBuf>,
    run_for: Option<Duration>,
) -> ExitCode {
    let client = Arc::new(ClamdClient::new(config));
    if !client.is_reachable() {
        warn!(host = %config.host, port = config.port, "clamd not reachable yet");
    }

    let mut cycler = FsDirCycler::new(root);
    if let Some(path) = state_file {
        cycler = cycler.with_state_file(path);
    }

    let (done_tx, done_rx) = mpsc::channel::<TerminationEvent>();
    let done_tx = Mutex::new(done_tx);
    let scanner = Arc::clone(&client);
    let processor = DirCycleProcessor::new("watch", cycler, intervals, move |event| {
        scan_dir(&scanner, mode, &event);
    })
    .on_error(|event| eprintln!("clamwire: {}: {}", event.service, event.message))
    .on_termination(move |event| {
        let _ = done_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(event);
    });

    if let Err(e) = processor.start() {
        eprintln!("clamwire: {e}");
        return ExitCode::from(EXIT_ERROR);
    }

    let finished = match run_for {
        Some(limit) => done_rx.recv_timeout(limit).is_ok(),
        None => done_rx.recv().is_ok(),
    };
    if !finished {
        if let Err(e) = processor.close() {
            eprintln!("clamwire: {e}");
            return ExitCode::from(EXIT_ERROR);
        }
        if !processor.service().await_workers(Duration::from_secs(30)) {
            warn!("watch worker still busy, exiting anyway");
        }
    }
    info!("watch stopped");
    ExitCode::SUCCESS
}
