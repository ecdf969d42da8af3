use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Metrics Error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Reconcile was cancelled before the label patch was sent")]
    Cancelled,

    #[error("The {0} cache never became ready")]
    CacheNotReady(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "KubeError",
            Error::MetricsError(_) => "MetricsError",
            Error::Cancelled => "Cancelled",
            Error::CacheNotReady(_) => "CacheNotReady",
        }
    }
}

pub mod controllers;
pub use controllers::{run, State};

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// External CRDs
pub mod resources;
