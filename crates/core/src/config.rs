//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the engine, the
//! listener and the poller. Nothing reads process-wide environment variables while a message
//! is being handled.
//!
//! Sources, later ones winning:
//! - built-in defaults
//! - `RXBRIDGE_*` environment variables (after `.env` has been loaded by the binary)
//! - the YAML file named by `RXBRIDGE_CONFIG`, if set

use crate::{EngineError, EngineResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:6661";
pub const DEFAULT_GATEWAY_HOST: &str = "127.0.0.1";
pub const DEFAULT_GATEWAY_PORT: u16 = 7001;
pub const DEFAULT_ACK_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_APPLICATION: &str = "RXBRIDGE";
pub const DEFAULT_FACILITY: &str = "PHARMACY";

/// Environment variable naming an optional YAML overlay.
pub const CONFIG_FILE_VAR: &str = "RXBRIDGE_CONFIG";

/// Core configuration resolved at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreConfig {
    pub listen_addr: String,
    pub listen_tls: bool,
    pub cert_pem: Option<PathBuf>,
    pub key_pem: Option<PathBuf>,
    pub gateway_host: String,
    pub gateway_port: u16,
    pub gateway_tls: bool,
    pub gateway_ca_pem: Option<PathBuf>,
    pub gateway_utf8: bool,
    pub ack_timeout: Duration,
    pub send_eof: bool,
    pub auto_truncate: bool,
    pub strong_dea: bool,
    pub allow_zero_dose: bool,
    pub application: String,
    pub facility: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            listen_tls: false,
            cert_pem: None,
            key_pem: None,
            gateway_host: DEFAULT_GATEWAY_HOST.into(),
            gateway_port: DEFAULT_GATEWAY_PORT,
            gateway_tls: false,
            gateway_ca_pem: None,
            gateway_utf8: false,
            ack_timeout: Duration::from_secs(DEFAULT_ACK_TIMEOUT_SECS),
            send_eof: false,
            auto_truncate: false,
            strong_dea: true,
            allow_zero_dose: false,
            application: DEFAULT_APPLICATION.into(),
            facility: DEFAULT_FACILITY.into(),
        }
    }
}

/// YAML overlay. Every key is optional; unknown keys are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    listen_addr: Option<String>,
    listen_tls: Option<bool>,
    cert_pem: Option<PathBuf>,
    key_pem: Option<PathBuf>,
    gateway_host: Option<String>,
    gateway_port: Option<u16>,
    gateway_tls: Option<bool>,
    gateway_ca_pem: Option<PathBuf>,
    gateway_utf8: Option<bool>,
    ack_timeout_secs: Option<u64>,
    send_eof: Option<bool>,
    auto_truncate: Option<bool>,
    strong_dea: Option<bool>,
    allow_zero_dose: Option<bool>,
    application: Option<String>,
    facility: Option<String>,
}

impl CoreConfig {
    /// Resolves configuration from the process environment.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` for unparsable values or a config that fails
    /// [`CoreConfig::validate`], and `EngineError::ConfigRead` if the overlay file cannot be read.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EngineResult<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let flag = |key: &str, current: bool| -> EngineResult<bool> {
            var(key).map_or(Ok(current), |v| parse_bool(key, &v))
        };

        let mut config = Self::default();
        if let Some(v) = var("RXBRIDGE_LISTEN_ADDR") {
            config.listen_addr = v;
        }
        config.listen_tls = flag("RXBRIDGE_LISTEN_TLS", config.listen_tls)?;
        config.cert_pem = var("RXBRIDGE_CERT_PEM").map(PathBuf::from);
        config.key_pem = var("RXBRIDGE_KEY_PEM").map(PathBuf::from);
        if let Some(v) = var("RXBRIDGE_GATEWAY_HOST") {
            config.gateway_host = v;
        }
        if let Some(v) = var("RXBRIDGE_GATEWAY_PORT") {
            config.gateway_port = v.parse().map_err(|_| {
                EngineError::InvalidConfig(format!("RXBRIDGE_GATEWAY_PORT is not a port: {v}"))
            })?;
        }
        config.gateway_tls = flag("RXBRIDGE_GATEWAY_TLS", config.gateway_tls)?;
        config.gateway_ca_pem = var("RXBRIDGE_GATEWAY_CA_PEM").map(PathBuf::from);
        config.gateway_utf8 = flag("RXBRIDGE_GATEWAY_UTF8", config.gateway_utf8)?;
        if let Some(v) = var("RXBRIDGE_ACK_TIMEOUT_SECS") {
            let secs: u64 = v.parse().map_err(|_| {
                EngineError::InvalidConfig(format!("RXBRIDGE_ACK_TIMEOUT_SECS is not a number: {v}"))
            })?;
            config.ack_timeout = Duration::from_secs(secs);
        }
        config.send_eof = flag("RXBRIDGE_SEND_EOF", config.send_eof)?;
        config.auto_truncate = flag("RXBRIDGE_AUTO_TRUNCATE", config.auto_truncate)?;
        config.strong_dea = flag("RXBRIDGE_STRONG_DEA", config.strong_dea)?;
        config.allow_zero_dose = flag("RXBRIDGE_ALLOW_ZERO_DOSE", config.allow_zero_dose)?;
        if let Some(v) = var("RXBRIDGE_APPLICATION") {
            config.application = v;
        }
        if let Some(v) = var("RXBRIDGE_FACILITY") {
            config.facility = v;
        }

        if let Some(path) = var(CONFIG_FILE_VAR) {
            config = config.with_file(Path::new(&path))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Applies the YAML overlay at `path`.
    pub fn with_file(self, path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(EngineError::ConfigRead)?;
        let config = self.with_yaml(&text)?;
        tracing::info!(path = %path.display(), "applied configuration file");
        Ok(config)
    }

    /// Applies a YAML overlay given as text.
    ///
    /// This uses `serde_path_to_error` so a type mismatch names the offending key.
    pub fn with_yaml(mut self, yaml_text: &str) -> EngineResult<Self> {
        if yaml_text.trim().is_empty() {
            return Ok(self);
        }
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        let file: ConfigFile = match serde_path_to_error::deserialize(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() { "<root>" } else { path.as_str() };
                return Err(EngineError::InvalidConfig(format!(
                    "configuration schema mismatch at {path}: {source}"
                )));
            }
        };

        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = file.$field { self.$field = v; })*
            };
        }
        overlay!(
            listen_addr,
            listen_tls,
            gateway_host,
            gateway_port,
            gateway_tls,
            gateway_utf8,
            send_eof,
            auto_truncate,
            strong_dea,
            allow_zero_dose,
            application,
            facility,
        );
        if file.cert_pem.is_some() {
            self.cert_pem = file.cert_pem;
        }
        if file.key_pem.is_some() {
            self.key_pem = file.key_pem;
        }
        if file.gateway_ca_pem.is_some() {
            self.gateway_ca_pem = file.gateway_ca_pem;
        }
        if let Some(secs) = file.ack_timeout_secs {
            self.ack_timeout = Duration::from_secs(secs);
        }
        Ok(self)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.application.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "application name cannot be empty".into(),
            ));
        }
        if self.ack_timeout.is_zero() {
            return Err(EngineError::InvalidConfig(
                "acknowledgment timeout must be greater than zero".into(),
            ));
        }
        if self.gateway_port == 0 {
            return Err(EngineError::InvalidConfig(
                "gateway port cannot be 0".into(),
            ));
        }
        if self.gateway_host.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "gateway host cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` of the downstream gateway.
    pub fn gateway_addr(&self) -> String {
        format!("{}:{}", self.gateway_host, self.gateway_port)
    }
}

fn parse_bool(key: &str, value: &str) -> EngineResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EngineError::InvalidConfig(format!(
            "{key} must be true or false, got {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = CoreConfig::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.gateway_addr(), "127.0.0.1:7001");
        assert!(config.strong_dea);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = CoreConfig::from_lookup(lookup(&[
            ("RXBRIDGE_GATEWAY_PORT", "7100"),
            ("RXBRIDGE_GATEWAY_TLS", "yes"),
            ("RXBRIDGE_ACK_TIMEOUT_SECS", "5"),
            ("RXBRIDGE_STRONG_DEA", "false"),
            ("RXBRIDGE_APPLICATION", "RXB"),
        ]))
        .expect("valid");
        assert_eq!(config.gateway_port, 7100);
        assert!(config.gateway_tls);
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
        assert!(!config.strong_dea);
        assert_eq!(config.application, "RXB");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = CoreConfig::from_lookup(lookup(&[("RXBRIDGE_SEND_EOF", "maybe")]))
            .expect_err("bad flag");
        assert!(matches!(err, EngineError::InvalidConfig(msg) if msg.contains("RXBRIDGE_SEND_EOF")));

        let err = CoreConfig::from_lookup(lookup(&[("RXBRIDGE_ACK_TIMEOUT_SECS", "0")]))
            .expect_err("zero timeout");
        assert!(matches!(err, EngineError::InvalidConfig(msg) if msg.contains("timeout")));

        let err = CoreConfig::from_lookup(lookup(&[("RXBRIDGE_GATEWAY_PORT", "0")]))
            .expect_err("zero port");
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn yaml_file_overlays_environment() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("rxbridge.yaml");
        std::fs::write(
            &path,
            "gateway_host: gateway.internal\nack_timeout_secs: 3\nauto_truncate: true\n",
        )
        .expect("write config");

        let config = CoreConfig::from_lookup(lookup(&[
            ("RXBRIDGE_GATEWAY_HOST", "ignored"),
            ("RXBRIDGE_CONFIG", path.to_str().expect("utf-8 path")),
        ]))
        .expect("valid");
        assert_eq!(config.gateway_host, "gateway.internal");
        assert_eq!(config.ack_timeout, Duration::from_secs(3));
        assert!(config.auto_truncate);
    }

    #[test]
    fn yaml_type_errors_name_the_key() {
        let err = CoreConfig::default()
            .with_yaml("gateway_port: not-a-port\n")
            .expect_err("type mismatch");
        assert!(matches!(err, EngineError::InvalidConfig(msg) if msg.contains("gateway_port")));

        let err = CoreConfig::default()
            .with_yaml("unknown_key: 1\n")
            .expect_err("unknown key");
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = CoreConfig::from_lookup(lookup(&[("RXBRIDGE_CONFIG", "/nonexistent/rx.yaml")]))
            .expect_err("missing file");
        assert!(matches!(err, EngineError::ConfigRead(_)));
    }
}
