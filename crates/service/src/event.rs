//! Events published by background services.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

/// A directory is due for scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub dir: PathBuf,
}

/// One loop iteration failed; the service keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub service: String,
    pub message: String,
}

/// The worker loop has exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationEvent {
    pub service: String,
}

pub type Listener<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Deliver `event`, containing a panicking listener so the caller's loop
/// keeps going.
pub(crate) fn notify<E>(listener: &Listener<E>, event: E) {
    let delivered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event)));
    if delivered.is_err() {
        warn!("event listener panicked");
    }
}
