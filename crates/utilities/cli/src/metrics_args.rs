//! Prometheus flags.

use crate::{PrometheusError, init_prometheus_server};
use clap::Args;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Prometheus exporter arguments.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct MetricsArgs {
    /// Serve metrics over HTTP.
    #[arg(long = "metrics.enabled", env = "HOTCHAIN_METRICS_ENABLED", global = true)]
    pub enabled: bool,
    /// Listen address of the exporter.
    #[arg(
        long = "metrics.addr",
        default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        env = "HOTCHAIN_METRICS_ADDR",
        global = true
    )]
    pub addr: IpAddr,
    /// Listen port of the exporter.
    #[arg(
        long = "metrics.port",
        default_value_t = 9090,
        value_parser = clap::value_parser!(u16).range(1..),
        env = "HOTCHAIN_METRICS_PORT",
        global = true
    )]
    pub port: u16,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { enabled: false, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 9090 }
    }
}

impl MetricsArgs {
    /// Starts the exporter if enabled.
    pub fn init_metrics(&self) -> Result<Option<SocketAddr>, PrometheusError> {
        if !self.enabled {
            return Ok(None);
        }
        init_prometheus_server(self.addr, self.port).map(Some)
    }
}
