//! Start/close state machine for long-lived background workers.
//!
//! ```text
//! Created -> Initialising -> Running -> Closed
//!                  \____________________/^
//! ```
//!
//! Every transition is a compare-and-swap on one atomic cell; a service can
//! never skip a state or go back.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::ServiceError;
use crate::worker::{Worker, WorkerRegistry};

/// Longest uninterrupted sleep of [`ServiceHandle::sleep`]. Bounds how long
/// a worker takes to notice a close request.
pub const POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceStatus {
    Created = 0,
    Initialising = 1,
    Running = 2,
    Closed = 3,
}

impl ServiceStatus {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Initialising,
            2 => Self::Running,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "CREATED",
            Self::Initialising => "INITIALISING",
            Self::Running => "RUNNING",
            Self::Closed => "CLOSED",
        })
    }
}

#[derive(Debug)]
struct StatusCell(AtomicU8);

impl StatusCell {
    const fn new() -> Self {
        Self(AtomicU8::new(ServiceStatus::Created as u8))
    }

    fn load(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// CAS `from -> to`. On failure returns the status actually found.
    fn transition(&self, from: ServiceStatus, to: ServiceStatus) -> Result<(), ServiceStatus> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ServiceStatus::from_u8)
    }

    /// Close from either active state. Returns the state that was left.
    fn close_active(&self) -> Result<ServiceStatus, ServiceStatus> {
        match self.transition(ServiceStatus::Running, ServiceStatus::Closed) {
            Ok(()) => Ok(ServiceStatus::Running),
            Err(ServiceStatus::Initialising) => self
                .transition(ServiceStatus::Initialising, ServiceStatus::Closed)
                .map(|()| ServiceStatus::Initialising)
                .or_else(|found| {
                    // Worker raced us to Running.
                    if found == ServiceStatus::Running {
                        self.close_active()
                    } else {
                        Err(found)
                    }
                }),
            Err(found) => Err(found),
        }
    }
}

/// Cloneable view of a service's status, given to its worker threads.
/// Leaving `Running` is the worker's signal to stop.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    name: Arc<str>,
    status: Arc<StatusCell>,
}

impl ServiceHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.status.load()
    }

    #[must_use]
    pub fn is_in_running_state(&self) -> bool {
        self.status() == ServiceStatus::Running
    }

    /// `Initialising -> Running`, called by the worker once its loop has
    /// begun. Returns `false` if the service was closed in the meantime.
    pub fn mark_running(&self) -> bool {
        match self
            .status
            .transition(ServiceStatus::Initialising, ServiceStatus::Running)
        {
            Ok(()) => {
                info!(service = %self.name, "running");
                true
            }
            Err(found) => found == ServiceStatus::Running,
        }
    }

    /// Sleep up to `duration` in slices of [`POLL_SLICE`]. Returns `false`
    /// as soon as the service is no longer running.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_in_running_state() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(POLL_SLICE));
        }
    }
}

/// Lifecycle state shared by every background service.
#[derive(Debug)]
pub struct Service {
    handle: ServiceHandle,
    workers: Mutex<Vec<Worker>>,
}

impl Service {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            handle: ServiceHandle {
                name: Arc::from(name),
                status: Arc::new(StatusCell::new()),
            },
            workers: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.handle.status()
    }

    #[must_use]
    pub fn is_in_running_state(&self) -> bool {
        self.handle.is_in_running_state()
    }

    #[must_use]
    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    fn violation(&self, operation: &'static str, status: ServiceStatus) -> ServiceError {
        ServiceError::Lifecycle {
            service: self.name().to_string(),
            operation,
            status,
        }
    }

    /// `Created -> Initialising`, then run `on_start`. A failing hook leaves
    /// the service `Closed`.
    ///
    /// # Errors
    ///
    /// `Lifecycle` if the service is not `Created`, `Hook` if `on_start`
    /// fails.
    pub fn start<F>(&self, on_start: F) -> Result<(), ServiceError>
    where
        F: FnOnce() -> eyre::Result<()>,
    {
        self.handle
            .status
            .transition(ServiceStatus::Created, ServiceStatus::Initialising)
            .map_err(|found| self.violation("start", found))?;
        info!(service = %self.name(), "starting");

        if let Err(e) = on_start() {
            let _ = self.handle.status.close_active();
            warn!(service = %self.name(), error = %e, "start failed, service closed");
            return Err(ServiceError::Hook {
                service: self.name().to_string(),
                operation: "start",
                source: e.into(),
            });
        }
        Ok(())
    }

    /// Move to `Closed` from `Initialising` or `Running`, then run
    /// `on_close`. Workers see the new state at their next poll.
    ///
    /// # Errors
    ///
    /// `Lifecycle` if the service is not active, `Hook` if `on_close` fails
    /// (the service is `Closed` either way).
    pub fn close<F>(&self, on_close: F) -> Result<(), ServiceError>
    where
        F: FnOnce() -> eyre::Result<()>,
    {
        let from = self
            .handle
            .status
            .close_active()
            .map_err(|found| self.violation("close", found))?;
        info!(service = %self.name(), %from, "closing");

        on_close().map_err(|e| ServiceError::Hook {
            service: self.name().to_string(),
            operation: "close",
            source: e.into(),
        })
    }

    /// Run `work` on a new named thread with a handle to this service.
    ///
    /// # Errors
    ///
    /// `Spawn` if the thread cannot be created.
    pub fn spawn_worker<F>(&self, work: F) -> Result<(), ServiceError>
    where
        F: FnOnce(ServiceHandle) + Send + 'static,
    {
        let handle = self.handle();
        let worker = WorkerRegistry::global()
            .spawn(self.name(), move || work(handle))
            .map_err(|source| ServiceError::Spawn {
                service: self.name().to_string(),
                source,
            })?;
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(worker);
        Ok(())
    }

    /// Wait until every spawned worker has exited, up to `timeout`.
    /// Returns `true` if they all finished.
    #[must_use]
    pub fn await_workers(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let done = self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .all(Worker::is_finished);
            if done {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

/// A background service with start/close hooks.
///
/// Implementors provide the hooks; [`Lifecycle::start`] and
/// [`Lifecycle::close`] enforce the state machine around them.
pub trait Lifecycle {
    fn service(&self) -> &Service;

    /// # Errors
    ///
    /// Any error aborts the start and closes the service.
    fn on_start(&self) -> eyre::Result<()>;

    /// # Errors
    ///
    /// Reported to the caller of [`Lifecycle::close`].
    fn on_close(&self) -> eyre::Result<()>;

    /// # Errors
    ///
    /// See [`Service::start`].
    fn start(&self) -> Result<(), ServiceError> {
        self.service().start(|| self.on_start())
    }

    /// # Errors
    ///
    /// See [`Service::close`].
    fn close(&self) -> Result<(), ServiceError> {
        self.service().close(|| self.on_close())
    }

    fn status(&self) -> ServiceStatus {
        self.service().status()
    }
}
