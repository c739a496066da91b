//! Blocking TCP client for clamd.
//!
//! One connection per command; INSTREAM uploads are chunked by
//! [`protocol::write_chunks`].

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{send, ClamdClient};
pub use transport::{CommandRunDetails, Transport};
