//! Named background threads.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use tracing::debug;

static GLOBAL: WorkerRegistry = WorkerRegistry::new();

/// Source of unique worker thread names (`<service>-<id>`).
#[derive(Debug)]
pub struct WorkerRegistry {
    next_id: AtomicU64,
}

impl WorkerRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Registry shared by every service in the process.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    #[must_use]
    pub fn next_name(&self, prefix: &str) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{id}")
    }

    /// Spawn `f` on a new named thread. The thread is never joined on drop,
    /// so it does not hold up process exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn<F>(&self, prefix: &str, f: F) -> io::Result<Worker>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.next_name(prefix);
        let handle = thread::Builder::new().name(name.clone()).spawn(f)?;
        debug!(worker = %name, "worker spawned");
        Ok(Worker { name, handle })
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

impl Worker {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// # Errors
    ///
    /// Returns the panic payload if the worker panicked.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_prefixed() {
        let registry = WorkerRegistry::new();
        assert_eq!(registry.next_name("scanner"), "scanner-1");
        assert_eq!(registry.next_name("scanner"), "scanner-2");
        assert_eq!(registry.next_name("other"), "other-3");
    }

    #[test]
    fn spawned_thread_carries_name() {
        let registry = WorkerRegistry::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = registry
            .spawn("probe", move || {
                let name = thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            })
            .unwrap();
        assert_eq!(worker.name(), "probe-1");
        assert_eq!(rx.recv().unwrap().as_deref(), Some("probe-1"));
        worker.join().unwrap();
    }
}
