//! TCP transport to clamd.
//!
//! Every exchange opens a fresh connection, writes the request, reads until
//! clamd closes its side and drops the socket. Nothing is pooled or retried.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use clamwire_core::{ClamdResult, ClientConfig};
use tracing::{debug, instrument, trace};

use crate::protocol;

/// Longest response accepted from clamd.
const MAX_RESPONSE_LEN: usize = protocol::DEFAULT_MAX_STREAM_LEN;

/// Snapshot of the last completed exchange, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRunDetails {
    /// Request bytes with control characters escaped (`zPING\0`).
    pub command: String,
    pub response: String,
    pub elapsed: Duration,
}

impl CommandRunDetails {
    fn new(frame: &[u8], response: &str, elapsed: Duration) -> Self {
        Self {
            command: escape_control(&String::from_utf8_lossy(frame)),
            response: response.to_string(),
            elapsed,
        }
    }

    #[must_use]
    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for CommandRunDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({} ms)",
            self.command,
            escape_control(&self.response),
            self.elapsed_millis()
        )
    }
}

fn escape_control(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.extend(c.escape_default()),
            c => out.push(c),
        }
    }
    out
}

// ─── Socket ─────────────────────────────────────────────────────────────────

/// A connected clamd socket with read/write timeouts applied.
pub(crate) struct Stream {
    inner: TcpStream,
}

impl Stream {
    /// Connect to the first reachable address of `host:port`.
    pub(crate) fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> io::Result<Self> {
        let inner = connect_any(host, port, connect_timeout)?;
        let io_timeout = non_zero(io_timeout);
        inner.set_read_timeout(io_timeout)?;
        inner.set_write_timeout(io_timeout)?;
        Ok(Self { inner })
    }

    /// Read until clamd closes the connection, at most `max_len` bytes.
    ///
    /// A reset after some text has arrived ends the response: clamd
    /// resets the connection when it closes on an unread INSTREAM upload.
    fn read_response(&mut self, max_len: usize) -> io::Result<String> {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if raw.len() + n > max_len {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("response exceeds {max_len} bytes"),
                        ));
                    }
                    raw.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset && !raw.is_empty() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write errors after which clamd may still have answered: it stops
/// reading and closes once an upload exceeds `StreamMaxLength`.
fn peer_hung_up(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// `set_*_timeout` rejects a zero duration; zero means "no timeout" here.
const fn non_zero(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

fn connect_addr(addr: &SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    match non_zero(timeout) {
        Some(t) => TcpStream::connect_timeout(addr, t),
        None => TcpStream::connect(addr),
    }
}

fn connect_any(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match connect_addr(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                trace!(%addr, %e, "connect failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{host}:{port} did not resolve to any address"),
        )
    }))
}

// ─── Transport ──────────────────────────────────────────────────────────────

/// Sends framed commands to one clamd instance.
#[derive(Debug)]
pub struct Transport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    last_run: Mutex<Option<CommandRunDetails>>,
}

impl Transport {
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            last_run: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Send a framed command and return the raw response text.
    ///
    /// # Errors
    ///
    /// Returns `ClamdError::Communication` on any connect, write, read or
    /// timeout failure.
    #[instrument(skip_all, fields(addr = %self.address()))]
    pub fn send_command(&self, frame: &[u8]) -> ClamdResult<String> {
        self.exchange(frame, None)
    }

    /// Send a framed command followed by `source` as INSTREAM chunks.
    ///
    /// # Errors
    ///
    /// Returns `ClamdError::Communication` on I/O failure or a zero
    /// `chunk_size`.
    #[instrument(skip_all, fields(addr = %self.address(), chunk_size = chunk_size))]
    pub fn send_command_with_stream(
        &self,
        frame: &[u8],
        source: &mut dyn Read,
        chunk_size: usize,
    ) -> ClamdResult<String> {
        if chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk size must be positive",
            )
            .into());
        }
        self.exchange(frame, Some((source, chunk_size)))
    }

    fn exchange(
        &self,
        frame: &[u8],
        upload: Option<(&mut dyn Read, usize)>,
    ) -> ClamdResult<String> {
        let started = Instant::now();
        let mut stream = Stream::connect(
            &self.host,
            self.port,
            self.connect_timeout,
            self.read_timeout,
        )?;

        stream.write_all(frame)?;
        match upload {
            Some((source, chunk_size)) => {
                match protocol::write_chunks(source, &mut stream, chunk_size) {
                    Ok(sent) => trace!(sent, "stream uploaded"),
                    Err(e) if peer_hung_up(&e) => {
                        debug!(error = %e, "clamd closed during upload, reading its answer");
                        return match stream.read_response(MAX_RESPONSE_LEN) {
                            Ok(response) if !response.is_empty() => {
                                Ok(self.record(frame, response, started))
                            }
                            _ => Err(e.into()),
                        };
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => stream.flush()?,
        }

        let response = stream.read_response(MAX_RESPONSE_LEN)?;
        Ok(self.record(frame, response, started))
    }

    fn record(&self, frame: &[u8], response: String, started: Instant) -> String {
        let details = CommandRunDetails::new(frame, &response, started.elapsed());
        debug!(
            command = %details.command,
            response_len = response.len(),
            elapsed_ms = details.elapsed_millis(),
            "clamd exchange complete"
        );
        *self
            .last_run
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(details);
        response
    }

    /// Best-effort TCP connect probe. Never fails.
    #[must_use]
    pub fn is_reachable(&self, timeout: Duration) -> bool {
        let reachable = connect_any(&self.host, self.port, timeout).is_ok();
        trace!(addr = %self.address(), reachable, "reachability probe");
        reachable
    }

    /// Details of the most recently completed exchange, if any.
    #[must_use]
    pub fn last_run_details(&self) -> Option<CommandRunDetails> {
        self.last_run
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
