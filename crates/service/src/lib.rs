//! Long-lived background services: a CAS-guarded lifecycle, named worker
//! threads, and a processor cycling through directories for continuous
//! scanning.

pub mod cycler;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod processor;
pub mod worker;

pub use cycler::{DirCycler, FsDirCycler};
pub use error::ServiceError;
pub use event::{ErrorEvent, Listener, ScanEvent, TerminationEvent};
pub use lifecycle::{Lifecycle, Service, ServiceHandle, ServiceStatus, POLL_SLICE};
pub use processor::{DirCycleProcessor, ProcessorConfig};
pub use worker::{Worker, WorkerRegistry};
