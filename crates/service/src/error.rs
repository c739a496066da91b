use crate::lifecycle::ServiceStatus;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service {service}: cannot {operation} while {status}")]
    Lifecycle {
        service: String,
        operation: &'static str,
        status: ServiceStatus,
    },
    #[error("service {service}: {operation} failed: {source}")]
    Hook {
        service: String,
        operation: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("service {service}: failed to spawn worker: {source}")]
    Spawn {
        service: String,
        #[source]
        source: std::io::Error,
    },
}
