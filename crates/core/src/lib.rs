//! clamd protocol: command framing, response decoding and scan results.
//! No sockets, no threads.

pub mod command;
pub mod config;
pub mod error;
pub mod response;
pub mod result;
pub mod separator;

pub use command::{
    Command, CommandDef, CommandFormat, DataSource, InStream, Ping, Reload, ScanMode, ScanPath,
    Shutdown, Stats, Version, VersionCommands,
};
pub use config::ClientConfig;
pub use error::{ClamdError, ClamdResult, Result};
pub use result::{Detections, ScanResult};
pub use separator::ServerFileSeparator;
