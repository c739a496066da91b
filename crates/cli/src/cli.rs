//! CLI argument parsing.

use clamwire_core::config::default_config_path;
use clamwire_core::{ClientConfig, ScanMode, ServerFileSeparator};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

fn positive_chunk(s: &str) -> Result<usize, String> {
    let val: usize = s.parse().map_err(|e| format!("{e}"))?;
    if val == 0 || u32::try_from(val).is_err() {
        Err(format!("chunk size must be between 1 and {}, got {val}", u32::MAX))
    } else {
        Ok(val)
    }
}

#[derive(Parser)]
#[command(name = "clamwire", about = "Client for the clamd virus scanning daemon", version)]
pub struct Cli {
    /// TOML config file (default: ~/.config/clamwire/config.toml, if present)
    #[arg(long, env = "CLAMWIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// clamd host
    #[arg(long, env = "CLAMD_HOST")]
    pub host: Option<String>,

    /// clamd TCP port
    #[arg(long, env = "CLAMD_PORT")]
    pub port: Option<u16>,

    /// Connect timeout in milliseconds (0 = none)
    #[arg(long, env = "CLAMD_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Read timeout in milliseconds (0 = none)
    #[arg(long, env = "CLAMD_READ_TIMEOUT_MS")]
    pub read_timeout_ms: Option<u64>,

    /// Path convention of the clamd host (native, unix, windows)
    #[arg(long)]
    pub separator: Option<ServerFileSeparator>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Config file, then flags and environment on top.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named config file cannot be loaded,
    /// or if the default one exists but is invalid.
    pub fn client_config(&self) -> eyre::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => ClientConfig::load(&path)?,
                None => ClientConfig::default(),
            },
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.read_timeout_ms {
            config.read_timeout_ms = ms;
        }
        if let Some(separator) = self.separator {
            config.file_separator = separator;
        }
        Ok(config)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Mode {
    Scan,
    Cont,
    Multi,
    AllMatch,
}

impl From<Mode> for ScanMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Scan => Self::Scan,
            Mode::Cont => Self::Cont,
            Mode::Multi => Self::Multi,
            Mode::AllMatch => Self::AllMatch,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Check that clamd answers PONG
    Ping,
    /// Print the clamd and signature database version
    Version,
    /// List the commands clamd supports
    Commands,
    /// Print clamd's thread pool and memory statistics
    Stats,
    /// Ask clamd to reload its signature databases
    Reload,
    /// Ask clamd to shut down
    Shutdown,
    /// Scan paths on the clamd host; exit 1 if anything is infected
    Scan {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, value_enum, default_value = "cont")]
        mode: Mode,
        /// Print the merged result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload a file (or stdin) with INSTREAM; exit 1 if infected
    Stream {
        /// File to upload; stdin when omitted
        file: Option<PathBuf>,
        /// INSTREAM chunk size in bytes
        #[arg(long, value_parser = positive_chunk)]
        chunk_size: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Scan the sub-directories of ROOT round-robin until stopped
    Watch {
        root: PathBuf,
        #[arg(long, value_enum, default_value = "multi")]
        mode: Mode,
        /// Seconds to wait when ROOT has no sub-directories
        #[arg(long, default_value = "10")]
        idle_secs: u64,
        /// Seconds to wait after a full pass over ROOT
        #[arg(long, default_value = "60")]
        rollover_secs: u64,
        /// Seconds to wait after a failed iteration
        #[arg(long, default_value = "5")]
        error_backoff_secs: u64,
        /// Remember the last scanned directory here and resume from it
        #[arg(long)]
        state_file: Option<PathBuf>,
        /// Stop after this many seconds instead of running until killed
        #[arg(long)]
        run_for_secs: Option<u64>,
    },
}
