//! Path conventions for the host clamd runs on.

use std::path::Path;

use serde::Deserialize;

/// How local paths are rewritten before they are sent as scan arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerFileSeparator {
    /// clamd shares this machine's convention; paths are sent as-is.
    #[default]
    Native,
    Unix,
    Windows,
}

impl ServerFileSeparator {
    #[must_use]
    pub fn to_server_path(self, path: &Path) -> String {
        let local = path.to_string_lossy();
        match self {
            Self::Native => local.into_owned(),
            Self::Unix => local.replace('\\', "/"),
            Self::Windows => local.replace('/', "\\"),
        }
    }
}

impl std::str::FromStr for ServerFileSeparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "unix" => Ok(Self::Unix),
            "windows" => Ok(Self::Windows),
            other => Err(format!(
                "unknown file separator {other:?} (expected native, unix or windows)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_keeps_path() {
        let p = Path::new("/data/in/a.txt");
        assert_eq!(ServerFileSeparator::Native.to_server_path(p), "/data/in/a.txt");
    }

    #[test]
    fn windows_rewrites_slashes() {
        let p = Path::new("/data/in/a.txt");
        assert_eq!(
            ServerFileSeparator::Windows.to_server_path(p),
            "\\data\\in\\a.txt"
        );
    }

    #[test]
    fn unix_rewrites_backslashes() {
        let p = Path::new("C:\\data\\a.txt");
        assert_eq!(ServerFileSeparator::Unix.to_server_path(p), "C:/data/a.txt");
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("UNIX".parse(), Ok(ServerFileSeparator::Unix));
        assert!("mac".parse::<ServerFileSeparator>().is_err());
    }
}
