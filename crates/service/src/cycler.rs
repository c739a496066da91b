//! Round-robin cursors over a set of directories.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Stateful cursor over a growing or shrinking list of directories.
pub trait DirCycler: Send {
    /// Reload the directory list. The cursor keeps its place.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory list cannot be read.
    fn refresh(&mut self) -> io::Result<()>;

    fn is_empty(&self) -> bool;

    /// `true` when the directory handed out last closes the cycle.
    fn is_last(&self) -> bool;

    /// Advance and return the next directory, wrapping at the end.
    fn next_dir(&mut self) -> Option<PathBuf>;
}

/// [`DirCycler`] over the immediate sub-directories of `root`, ordered by
/// name.
///
/// The cursor is the *name* of the last directory handed out, so it survives
/// directories appearing or disappearing between refreshes. With a state
/// file the cursor is also persisted across restarts.
#[derive(Debug)]
pub struct FsDirCycler {
    root: PathBuf,
    dirs: Vec<PathBuf>,
    last: Option<OsString>,
    state_file: Option<PathBuf>,
}

impl FsDirCycler {
    /// Cycler over `root`. Empty until the first [`DirCycler::refresh`].
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: Vec::new(),
            last: None,
            state_file: None,
        }
    }

    /// Persist the cursor to `path`, resuming from it if it already exists.
    #[must_use]
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match fs::read_to_string(&path) {
            Ok(saved) => {
                let saved = saved.trim();
                if !saved.is_empty() {
                    debug!(state = %path.display(), dir = saved, "resuming cycle");
                    self.last = Some(OsString::from(saved));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(state = %path.display(), error = %e, "cannot read cycler state"),
        }
        self.state_file = Some(path);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Index of the first directory sorting after the cursor.
    fn after_cursor(&self) -> usize {
        self.last.as_deref().map_or(0, |last| {
            self.dirs
                .partition_point(|d| d.file_name().is_some_and(|n| n <= last))
        })
    }

    fn save(&self, name: &OsStr) {
        let Some(path) = &self.state_file else {
            return;
        };
        if let Err(e) = fs::write(path, name.to_string_lossy().as_bytes()) {
            warn!(state = %path.display(), error = %e, "cannot save cycler state");
        }
    }
}

impl DirCycler for FsDirCycler {
    fn refresh(&mut self) -> io::Result<()> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        debug!(root = %self.root.display(), count = dirs.len(), "directories refreshed");
        self.dirs = dirs;
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    fn is_last(&self) -> bool {
        match (self.dirs.last(), &self.last) {
            (Some(final_dir), Some(last)) => final_dir.file_name() == Some(last.as_os_str()),
            _ => false,
        }
    }

    fn next_dir(&mut self) -> Option<PathBuf> {
        if self.dirs.is_empty() {
            return None;
        }
        let idx = self.after_cursor() % self.dirs.len();
        let dir = self.dirs[idx].clone();
        let name = dir.file_name()?.to_os_string();
        self.save(&name);
        self.last = Some(name);
        Some(dir)
    }
}
