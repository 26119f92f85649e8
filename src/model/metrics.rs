//! Metrics configuration helpers

use crate::error::{FleetError, Result};
use serde_json::Value;

/// Read `server.port` from a stored metrics configuration.
///
/// Anything other than an integral number that fits a port is treated as
/// missing, and the error names `context`.
pub fn resolve_metrics_port(metrics_config: Option<&Value>, context: &str) -> Result<u16> {
    metrics_config
        .and_then(|config| config.get("server"))
        .and_then(|server| server.get("port"))
        .and_then(Value::as_u64)
        .and_then(|port| u16::try_from(port).ok())
        .ok_or_else(|| FleetError::MetricsPortMissing(context.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_port() {
        let config = json!({ "server": { "port": 9100 } });
        assert_eq!(resolve_metrics_port(Some(&config), "test context").unwrap(), 9100);
    }

    #[test]
    fn test_missing_port() {
        let config = json!({ "server": {} });
        let err = resolve_metrics_port(Some(&config), "missing config").unwrap_err();
        assert_eq!(err.to_string(), "Metrics port is not configured for missing config");
    }

    #[test]
    fn test_string_port_rejected() {
        let config = json!({ "server": { "port": "8080" } });
        let err = resolve_metrics_port(Some(&config), "invalid").unwrap_err();
        assert!(err.to_string().ends_with("invalid"));
    }

    #[test]
    fn test_absent_config() {
        assert!(resolve_metrics_port(None, "the admin user").is_err());
    }
}
