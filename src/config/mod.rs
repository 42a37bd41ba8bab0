pub mod loader;
pub mod types;
pub mod validator;


pub use types::{
    DefaultsConfig, HeaderDefaults, ProxyConfig, ProxyRule, RedirectRule, RetriesConfig,
    RewriteRule, Rule, Scheme, Target, TlsConfig,
};
pub use validator::{Diagnostic, DiagnosticCode, ValidationReport};

use crate::error::GatewayError;
use std::path::Path;

/// Load a configuration document from a JSON string.
///
/// Validation runs first; any error-level diagnostic fails the load with
/// the full list of findings. Warnings are logged and do not fail.
pub fn load_str(input: &str) -> Result<ProxyConfig, GatewayError> {
    let report = validator::validate_str(input);

    for warning in &report.warnings {
        tracing::warn!("config: {}", warning);
    }

    if !report.valid {
        let summary = report
            .errors
            .iter()
            .map(Diagnostic::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(GatewayError::Config(summary));
    }

    report
        .normalized
        .ok_or_else(|| GatewayError::Config("validation yielded no config".to_string()))
}

pub fn load_path(path: &Path) -> Result<ProxyConfig, GatewayError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("read {}: {}", path.display(), e)))?;
    load_str(&content)
}
