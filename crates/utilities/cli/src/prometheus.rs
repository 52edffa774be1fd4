//! Prometheus exporter setup.

use crate::PrometheusError;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{IpAddr, SocketAddr};

/// Installs the global metrics recorder and serves it over HTTP on `addr:port`.
///
/// The exporter owns the only listener, so the port must be fixed. Returns the
/// address being served.
pub fn init_prometheus_server(addr: IpAddr, port: u16) -> Result<SocketAddr, PrometheusError> {
    if port == 0 {
        return Err(PrometheusError::ZeroPort);
    }
    let listen = SocketAddr::from((addr, port));
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    tracing::info!(target: "prometheus", %listen, "Serving metrics");
    Ok(listen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_zero_port_is_rejected_before_install() {
        let err = init_prometheus_server(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap_err();
        assert!(matches!(err, PrometheusError::ZeroPort));
    }
}
