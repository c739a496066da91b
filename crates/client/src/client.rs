//! Blocking clamd client.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use clamwire_core::{
    ClamdResult, ClientConfig, Command, DataSource, InStream, Ping, Reload, ScanMode, ScanPath,
    ScanResult, ServerFileSeparator, Shutdown, Stats, Version, VersionCommands,
};
use tracing::{debug, info, instrument};

use crate::transport::{CommandRunDetails, Transport};

/// Frame `command`, exchange it over `transport` and decode the answer.
///
/// # Errors
///
/// Returns `Communication` on transport failure, otherwise whatever the
/// command's parser reports.
pub fn send<C: Command>(transport: &Transport, mut command: C) -> ClamdResult<C::Output> {
    let frame = command.frame();
    let raw = match command.data_source() {
        Some(DataSource { reader, chunk_size }) => {
            transport.send_command_with_stream(&frame, reader, chunk_size)?
        }
        None => transport.send_command(&frame)?,
    };
    command.parse_response(&raw)
}

/// Typed access to one clamd instance.
#[derive(Debug)]
pub struct ClamdClient {
    transport: Transport,
    separator: ServerFileSeparator,
    chunk_size: usize,
    connect_timeout: Duration,
}

impl ClamdClient {
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            transport: Transport::new(config),
            separator: config.file_separator,
            chunk_size: config.chunk_size,
            connect_timeout: config.connect_timeout(),
        }
    }

    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// # Errors
    ///
    /// See [`send`].
    pub fn send<C: Command>(&self, command: C) -> ClamdResult<C::Output> {
        send(&self.transport, command)
    }

    /// # Errors
    ///
    /// Returns an error if clamd cannot be reached or rejects PING.
    pub fn ping(&self) -> ClamdResult<bool> {
        self.send(Ping)
    }

    /// # Errors
    ///
    /// See [`send`].
    pub fn version(&self) -> ClamdResult<String> {
        self.send(Version)
    }

    /// Commands advertised by VERSIONCOMMANDS.
    ///
    /// # Errors
    ///
    /// See [`send`].
    pub fn version_commands(&self) -> ClamdResult<Vec<String>> {
        self.send(VersionCommands)
    }

    /// # Errors
    ///
    /// See [`send`].
    pub fn stats(&self) -> ClamdResult<String> {
        self.send(Stats)
    }

    /// # Errors
    ///
    /// Returns `InvalidResponse` unless clamd answers `RELOADING`.
    pub fn reload_virus_databases(&self) -> ClamdResult<()> {
        info!(addr = %self.transport.address(), "reloading virus databases");
        self.send(Reload)
    }

    /// # Errors
    ///
    /// Returns an error if the SHUTDOWN command could not be delivered.
    pub fn shutdown_server(&self) -> ClamdResult<()> {
        info!(addr = %self.transport.address(), "shutting down clamd");
        self.send(Shutdown)
    }

    /// Scan a file or directory that clamd can see. The path is rewritten
    /// to the server's separator convention first.
    ///
    /// # Errors
    ///
    /// `ScanFailure` if clamd reports an error for the path.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn scan(&self, path: &Path, mode: ScanMode) -> ClamdResult<ScanResult> {
        let server_path = self.separator.to_server_path(path);
        let result = self.send(ScanPath::new(mode, server_path))?;
        debug!(clean = result.is_ok(), "scan complete");
        Ok(result)
    }

    /// Scan each path in turn and merge the results. Stops at the first
    /// error.
    ///
    /// # Errors
    ///
    /// The first error returned by [`ClamdClient::scan`].
    pub fn scan_all<I, P>(&self, paths: I, mode: ScanMode) -> ClamdResult<ScanResult>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths
            .into_iter()
            .map(|p| self.scan(p.as_ref(), mode))
            .collect()
    }

    /// Upload `source` with INSTREAM using the configured chunk size.
    ///
    /// # Errors
    ///
    /// `ScanFailure` if clamd rejects the stream (e.g. size limit exceeded).
    pub fn scan_stream<R: Read>(&self, source: R) -> ClamdResult<ScanResult> {
        self.scan_stream_chunked(source, self.chunk_size)
    }

    /// # Errors
    ///
    /// See [`ClamdClient::scan_stream`].
    pub fn scan_stream_chunked<R: Read>(
        &self,
        source: R,
        chunk_size: usize,
    ) -> ClamdResult<ScanResult> {
        self.send(InStream::new(source, chunk_size))
    }

    /// TCP probe using the configured connect timeout.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.transport.is_reachable(self.connect_timeout)
    }

    #[must_use]
    pub fn last_command_run_details(&self) -> Option<CommandRunDetails> {
        self.transport.last_run_details()
    }
}
