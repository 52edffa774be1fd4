//! Error types for CLI utilities.

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;

/// Errors raised while starting the Prometheus exporter.
#[derive(Debug, Error)]
pub enum PrometheusError {
    /// Port `0` was requested.
    #[error("metrics port must be non-zero")]
    ZeroPort,
    /// The exporter or its global recorder could not be installed.
    #[error("failed to install prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Errors that can occur in CLI setup.
#[derive(Debug, Error)]
pub enum CliError {
    /// A global tracing subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    /// The metrics exporter failed to start.
    #[error(transparent)]
    Metrics(#[from] PrometheusError),
}

/// Result alias for CLI setup.
pub type CliResult<T> = Result<T, CliError>;
