//! clamd command set and framing.
//!
//! Wire format of a request: `<prefix><VERB>[ <argument>]<terminator>` where
//! the prefix/terminator pair is `z`/`\0` or `n`/`\n`. clamd answers with text
//! ended by the same terminator and closes the connection.

use std::io::Read;

use crate::error::ClamdResult;
use crate::response;
use crate::result::ScanResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFormat {
    /// `z` prefix, NUL terminated.
    NullChar,
    /// `n` prefix, newline terminated.
    NewLine,
}

impl CommandFormat {
    #[must_use]
    pub const fn prefix(self) -> u8 {
        match self {
            Self::NullChar => b'z',
            Self::NewLine => b'n',
        }
    }

    #[must_use]
    pub const fn terminator(self) -> u8 {
        match self {
            Self::NullChar => b'\0',
            Self::NewLine => b'\n',
        }
    }

    /// Remove a single trailing terminator. Earlier terminators are line
    /// separators and stay.
    #[must_use]
    pub fn strip_terminator(self, text: &str) -> &str {
        text.strip_suffix(char::from(self.terminator()))
            .unwrap_or(text)
    }
}

/// Verb and format of one command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDef {
    pub verb: &'static str,
    pub format: CommandFormat,
}

impl CommandDef {
    #[must_use]
    pub const fn new(verb: &'static str, format: CommandFormat) -> Self {
        Self { verb, format }
    }

    /// Exact bytes clamd expects. The argument is not escaped.
    #[must_use]
    pub fn frame(&self, argument: Option<&str>) -> Vec<u8> {
        let arg_len = argument.map_or(0, |a| a.len() + 1);
        let mut buf = Vec::with_capacity(self.verb.len() + arg_len + 2);
        buf.push(self.format.prefix());
        buf.extend_from_slice(self.verb.as_bytes());
        if let Some(arg) = argument {
            buf.push(b' ');
            buf.extend_from_slice(arg.as_bytes());
        }
        buf.push(self.format.terminator());
        buf
    }
}

pub const PING: CommandDef = CommandDef::new("PING", CommandFormat::NullChar);
pub const VERSION: CommandDef = CommandDef::new("VERSION", CommandFormat::NullChar);
pub const VERSION_COMMANDS: CommandDef =
    CommandDef::new("VERSIONCOMMANDS", CommandFormat::NullChar);
pub const STATS: CommandDef = CommandDef::new("STATS", CommandFormat::NullChar);
pub const RELOAD: CommandDef = CommandDef::new("RELOAD", CommandFormat::NullChar);
pub const SHUTDOWN: CommandDef = CommandDef::new("SHUTDOWN", CommandFormat::NullChar);
pub const SCAN: CommandDef = CommandDef::new("SCAN", CommandFormat::NullChar);
pub const CONT_SCAN: CommandDef = CommandDef::new("CONTSCAN", CommandFormat::NullChar);
pub const MULTI_SCAN: CommandDef = CommandDef::new("MULTISCAN", CommandFormat::NullChar);
pub const ALL_MATCH_SCAN: CommandDef = CommandDef::new("ALLMATCHSCAN", CommandFormat::NullChar);
pub const IN_STREAM: CommandDef = CommandDef::new("INSTREAM", CommandFormat::NullChar);

/// Binary payload uploaded after the request line (INSTREAM).
pub struct DataSource<'a> {
    pub reader: &'a mut dyn Read,
    pub chunk_size: usize,
}

/// One clamd command: what goes on the wire and how the answer is decoded.
///
/// A transport frames the command with [`Command::frame`], streams
/// [`Command::data_source`] if present, and hands the raw answer to
/// [`Command::parse_response`].
pub trait Command {
    type Output;

    fn def(&self) -> CommandDef;

    fn argument(&self) -> Option<&str> {
        None
    }

    fn data_source(&mut self) -> Option<DataSource<'_>> {
        None
    }

    /// Decode the response body (terminator already stripped, not
    /// `UNKNOWN COMMAND`).
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` or `ScanFailure` depending on the command.
    fn parse(&self, body: &str) -> ClamdResult<Self::Output>;

    #[must_use]
    fn frame(&self) -> Vec<u8> {
        self.def().frame(self.argument())
    }

    /// # Errors
    ///
    /// Returns `UnknownCommand` if clamd rejected the verb, otherwise
    /// whatever [`Command::parse`] reports.
    fn parse_response(&self, raw: &str) -> ClamdResult<Self::Output> {
        let body = response::body(self.def(), raw)?;
        self.parse(body)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ping;

impl Command for Ping {
    type Output = bool;

    fn def(&self) -> CommandDef {
        PING
    }

    fn parse(&self, body: &str) -> ClamdResult<bool> {
        Ok(response::is_pong(body))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Version;

impl Command for Version {
    type Output = String;

    fn def(&self) -> CommandDef {
        VERSION
    }

    fn parse(&self, body: &str) -> ClamdResult<String> {
        Ok(body.trim().to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VersionCommands;

impl Command for VersionCommands {
    type Output = Vec<String>;

    fn def(&self) -> CommandDef {
        VERSION_COMMANDS
    }

    fn parse(&self, body: &str) -> ClamdResult<Vec<String>> {
        response::command_list(self.def().verb, body)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats;

impl Command for Stats {
    type Output = String;

    fn def(&self) -> CommandDef {
        STATS
    }

    fn parse(&self, body: &str) -> ClamdResult<String> {
        Ok(body.to_string())
    }
}

/// Reload the virus databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reload;

impl Command for Reload {
    type Output = ();

    fn def(&self) -> CommandDef {
        RELOAD
    }

    fn parse(&self, body: &str) -> ClamdResult<()> {
        response::reloading(self.def().verb, body)
    }
}

/// Ask clamd to exit. Any answer is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Shutdown;

impl Command for Shutdown {
    type Output = ();

    fn def(&self) -> CommandDef {
        SHUTDOWN
    }

    fn parse(&self, _body: &str) -> ClamdResult<()> {
        Ok(())
    }
}

/// Which path scan verb to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanMode {
    /// Stop at the first match per file.
    #[default]
    Scan,
    /// Keep going after a match inside a directory tree.
    Cont,
    /// Scan a directory tree with clamd's thread pool.
    Multi,
    /// Report every matching signature.
    AllMatch,
}

impl ScanMode {
    #[must_use]
    pub const fn def(self) -> CommandDef {
        match self {
            Self::Scan => SCAN,
            Self::Cont => CONT_SCAN,
            Self::Multi => MULTI_SCAN,
            Self::AllMatch => ALL_MATCH_SCAN,
        }
    }
}

/// SCAN / CONTSCAN / MULTISCAN / ALLMATCHSCAN of a path on the clamd host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPath {
    pub mode: ScanMode,
    pub path: String,
}

impl ScanPath {
    #[must_use]
    pub fn new(mode: ScanMode, path: impl Into<String>) -> Self {
        Self {
            mode,
            path: path.into(),
        }
    }
}

impl Command for ScanPath {
    type Output = ScanResult;

    fn def(&self) -> CommandDef {
        self.mode.def()
    }

    fn argument(&self) -> Option<&str> {
        Some(&self.path)
    }

    fn parse(&self, body: &str) -> ClamdResult<ScanResult> {
        response::scan_result(self.def().verb, body)
    }
}

/// Scan bytes read from `source`, uploaded in chunks of `chunk_size`.
pub struct InStream<R> {
    source: R,
    chunk_size: usize,
}

impl<R: Read> InStream<R> {
    #[must_use]
    pub const fn new(source: R, chunk_size: usize) -> Self {
        Self { source, chunk_size }
    }
}

impl<R: Read> Command for InStream<R> {
    type Output = ScanResult;

    fn def(&self) -> CommandDef {
        IN_STREAM
    }

    fn data_source(&mut self) -> Option<DataSource<'_>> {
        Some(DataSource {
            reader: &mut self.source,
            chunk_size: self.chunk_size,
        })
    }

    fn parse(&self, body: &str) -> ClamdResult<ScanResult> {
        response::scan_result(self.def().verb, body)
    }
}
