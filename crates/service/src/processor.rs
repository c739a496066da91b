//! Continuous scan orchestration: cycle through directories forever,
//! announcing each one to a listener.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use eyre::eyre;
use tracing::{debug, error, info, trace};

use crate::cycler::DirCycler;
use crate::event::{notify, ErrorEvent, Listener, ScanEvent, TerminationEvent};
use crate::lifecycle::{Lifecycle, Service, ServiceHandle};

/// Sleep intervals of the processor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Wait before re-reading an empty cycler.
    pub idle_sleep: Duration,
    /// Wait after the last directory of a cycle.
    pub rollover_sleep: Duration,
    /// Wait after a failed iteration.
    pub error_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_secs(10),
            rollover_sleep: Duration::from_secs(60),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Outcome of one loop step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Idle,
    Emitted(PathBuf),
    Rollover(PathBuf),
}

/// State moved onto the worker thread.
struct Cycle<C> {
    cycler: Arc<Mutex<C>>,
    config: ProcessorConfig,
    on_scan: Listener<ScanEvent>,
    on_error: Option<Listener<ErrorEvent>>,
    on_termination: Option<Listener<TerminationEvent>>,
}

impl<C: DirCycler> Cycle<C> {
    fn step(&self) -> eyre::Result<Step> {
        let mut cycler = self.cycler.lock().unwrap_or_else(PoisonError::into_inner);
        if cycler.is_empty() {
            return Ok(Step::Idle);
        }
        let dir = cycler
            .next_dir()
            .ok_or_else(|| eyre!("non-empty cycler yielded no directory"))?;
        let last = cycler.is_last();
        drop(cycler);

        notify(&self.on_scan, ScanEvent { dir: dir.clone() });
        Ok(if last {
            Step::Rollover(dir)
        } else {
            Step::Emitted(dir)
        })
    }

    fn refresh(&self) -> eyre::Result<()> {
        self.cycler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh()
            .map_err(|e| eyre!("refreshing directories: {e}"))
    }

    fn iterate(&self, handle: &ServiceHandle) -> eyre::Result<()> {
        match self.step()? {
            Step::Idle => {
                if handle.sleep(self.config.idle_sleep) {
                    self.refresh()?;
                }
            }
            Step::Rollover(dir) => {
                debug!(dir = %dir.display(), "cycle complete");
                if handle.sleep(self.config.rollover_sleep) {
                    self.refresh()?;
                }
            }
            Step::Emitted(dir) => trace!(dir = %dir.display(), "directory emitted"),
        }
        Ok(())
    }

    fn report(&self, handle: &ServiceHandle, e: &eyre::Report) {
        error!(service = handle.name(), error = %e, "iteration failed");
        if let Some(listener) = &self.on_error {
            notify(
                listener,
                ErrorEvent {
                    service: handle.name().to_string(),
                    message: e.to_string(),
                },
            );
        }
    }

    fn run(self, handle: &ServiceHandle) {
        if handle.mark_running() {
            // Load the directory list before the first step, so a fresh
            // cycler does not wait out a full idle sleep.
            if let Err(e) = self.refresh() {
                self.report(handle, &e);
            }
            while handle.is_in_running_state() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.iterate(handle)))
                    .unwrap_or_else(|_| Err(eyre!("iteration panicked")));
                if let Err(e) = outcome {
                    self.report(handle, &e);
                    handle.sleep(self.config.error_backoff);
                }
            }
        }
        info!(service = handle.name(), "stopped");
        if let Some(listener) = &self.on_termination {
            notify(
                listener,
                TerminationEvent {
                    service: handle.name().to_string(),
                },
            );
        }
    }
}

/// Background service emitting a [`ScanEvent`] per directory of a
/// [`DirCycler`], round after round, until closed.
pub struct DirCycleProcessor<C> {
    service: Service,
    cycler: Arc<Mutex<C>>,
    config: ProcessorConfig,
    on_scan: Listener<ScanEvent>,
    on_error: Option<Listener<ErrorEvent>>,
    on_termination: Option<Listener<TerminationEvent>>,
}

impl<C: DirCycler + 'static> DirCycleProcessor<C> {
    pub fn new<F>(name: &str, cycler: C, config: ProcessorConfig, on_scan: F) -> Self
    where
        F: Fn(ScanEvent) + Send + Sync + 'static,
    {
        Self {
            service: Service::new(name),
            cycler: Arc::new(Mutex::new(cycler)),
            config,
            on_scan: Arc::new(on_scan),
            on_error: None,
            on_termination: None,
        }
    }

    #[must_use]
    pub fn on_error<F>(mut self, listener: F) -> Self
    where
        F: Fn(ErrorEvent) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(listener));
        self
    }

    #[must_use]
    pub fn on_termination<F>(mut self, listener: F) -> Self
    where
        F: Fn(TerminationEvent) + Send + Sync + 'static,
    {
        self.on_termination = Some(Arc::new(listener));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn cycle(&self) -> Cycle<C> {
        Cycle {
            cycler: Arc::clone(&self.cycler),
            config: self.config,
            on_scan: Arc::clone(&self.on_scan),
            on_error: self.on_error.clone(),
            on_termination: self.on_termination.clone(),
        }
    }
}

impl<C: DirCycler + 'static> Lifecycle for DirCycleProcessor<C> {
    fn service(&self) -> &Service {
        &self.service
    }

    fn on_start(&self) -> eyre::Result<()> {
        let cycle = self.cycle();
        self.service.spawn_worker(move |handle| cycle.run(&handle))?;
        Ok(())
    }

    fn on_close(&self) -> eyre::Result<()> {
        Ok(())
    }
}

impl<C> std::fmt::Debug for DirCycleProcessor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirCycleProcessor")
            .field("service", &self.service)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
