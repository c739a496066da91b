pub type Result<T> = eyre::Result<T>;

/// Result of one exchange with clamd.
pub type ClamdResult<T> = std::result::Result<T, ClamdError>;

#[derive(Debug, thiserror::Error)]
pub enum ClamdError {
    #[error("clamd communication failed: {0}")]
    Communication(#[from] std::io::Error),
    #[error("clamd does not know the command {0}")]
    UnknownCommand(&'static str),
    #[error("invalid response to {command}: {response:?}")]
    InvalidResponse {
        command: &'static str,
        response: String,
    },
    #[error("scan failed: {0}")]
    ScanFailure(String),
}

impl ClamdError {
    pub(crate) fn invalid(command: &'static str, response: &str) -> Self {
        Self::InvalidResponse {
            command,
            response: response.to_string(),
        }
    }

    /// True for transport faults (connect, write, read, timeout).
    #[must_use]
    pub const fn is_communication(&self) -> bool {
        matches!(self, Self::Communication(_))
    }
}
