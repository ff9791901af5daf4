use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use tracing::debug;

use crate::error::BrokerError;

pub const DEFAULT_REGION: &str = "com";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DASHBOARD_ITERATIONS: u32 = 100;
pub const DEFAULT_ORCHESTRATE_ROOT: &str = "https://orchestrate-api.pingone.com";

/// Environment variables that must be present before the broker starts.
pub const REQUIRED_VARS: [&str; 4] = ["ENVID", "WORKERID", "WORKERSECRET", "DVAPIKEY"];

/// Process-wide configuration.
///
/// Credential fields are optional here so that per-call resolution can report
/// exactly which ones are missing; [`Settings::validate`] is the fail-fast
/// check run at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment_id: Option<String>,
    pub worker_id: Option<String>,
    pub worker_secret: Option<SecretString>,
    pub dv_api_key: Option<SecretString>,
    pub region: String,
    pub api_root: Option<String>,
    pub auth_root: Option<String>,
    pub orchestrate_root: String,
    pub port: u16,
    pub dashboard_iterations: u32,
    pub static_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment_id: None,
            worker_id: None,
            worker_secret: None,
            dv_api_key: None,
            region: DEFAULT_REGION.to_string(),
            api_root: None,
            auth_root: None,
            orchestrate_root: DEFAULT_ORCHESTRATE_ROOT.to_string(),
            port: DEFAULT_PORT,
            dashboard_iterations: DEFAULT_DASHBOARD_ITERATIONS,
            static_dir: None,
        }
    }
}

/// On-disk shape accepted by [`Settings::from_file`]; keys mirror the
/// environment variable names.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    #[serde(rename = "ENVID")]
    environment_id: Option<String>,
    #[serde(rename = "WORKERID")]
    worker_id: Option<String>,
    #[serde(rename = "WORKERSECRET")]
    worker_secret: Option<String>,
    #[serde(rename = "DVAPIKEY")]
    dv_api_key: Option<String>,
    #[serde(rename = "REGION")]
    region: Option<String>,
    #[serde(rename = "APIROOT")]
    api_root: Option<String>,
    #[serde(rename = "AUTHROOT")]
    auth_root: Option<String>,
    #[serde(rename = "ORCHESTRATEAPIROOT")]
    orchestrate_root: Option<String>,
    #[serde(rename = "PORT")]
    port: Option<u16>,
    #[serde(rename = "PROTECT_DASHBOARD_ITERATIONS")]
    dashboard_iterations: Option<u32>,
    #[serde(rename = "STATIC_DIR")]
    static_dir: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup (the environment in production,
    /// a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().with_context(|| format!("parsing PORT={raw}"))?,
            None => DEFAULT_PORT,
        };
        let dashboard_iterations = match get("PROTECT_DASHBOARD_ITERATIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("parsing PROTECT_DASHBOARD_ITERATIONS={raw}"))?,
            None => DEFAULT_DASHBOARD_ITERATIONS,
        };

        Ok(Self {
            environment_id: get("ENVID"),
            worker_id: get("WORKERID"),
            worker_secret: get("WORKERSECRET").map(SecretString::from),
            dv_api_key: get("DVAPIKEY").map(SecretString::from),
            region: get("REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            api_root: get("APIROOT"),
            auth_root: get("AUTHROOT"),
            orchestrate_root: get("ORCHESTRATEAPIROOT")
                .unwrap_or_else(|| DEFAULT_ORCHESTRATE_ROOT.to_string()),
            port,
            dashboard_iterations,
            static_dir: get("STATIC_DIR"),
        })
    }

    /// Read settings from a JSON file whose keys mirror the environment
    /// variable names.
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let file: FileSettings = serde_json::from_str(&raw).context("parsing JSON")?;
        debug!(path, "settings loaded from file");

        Ok(Self {
            environment_id: non_empty(file.environment_id),
            worker_id: non_empty(file.worker_id),
            worker_secret: non_empty(file.worker_secret).map(SecretString::from),
            dv_api_key: non_empty(file.dv_api_key).map(SecretString::from),
            region: non_empty(file.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            api_root: non_empty(file.api_root),
            auth_root: non_empty(file.auth_root),
            orchestrate_root: non_empty(file.orchestrate_root)
                .unwrap_or_else(|| DEFAULT_ORCHESTRATE_ROOT.to_string()),
            port: file.port.unwrap_or(DEFAULT_PORT),
            dashboard_iterations: file
                .dashboard_iterations
                .unwrap_or(DEFAULT_DASHBOARD_ITERATIONS),
            static_dir: non_empty(file.static_dir),
        })
    }

    /// Names of the required variables that are not set.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let present = [
            self.environment_id.is_some(),
            self.worker_id.is_some(),
            self.worker_secret.is_some(),
            self.dv_api_key.is_some(),
        ];
        REQUIRED_VARS
            .iter()
            .zip(present)
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Startup check: every required variable must be present.
    pub fn validate(&self) -> Result<(), BrokerError> {
        let missing = self.missing_required();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::Configuration(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_full_environment() {
        let settings = Settings::from_lookup(lookup(&[
            ("ENVID", "env-1"),
            ("WORKERID", "worker"),
            ("WORKERSECRET", "secret"),
            ("DVAPIKEY", "dv-key"),
            ("PORT", "8081"),
            ("REGION", "eu"),
        ]))
        .unwrap();

        assert_eq!(settings.environment_id.as_deref(), Some("env-1"));
        assert_eq!(settings.worker_secret.as_ref().unwrap().expose_secret(), "secret");
        assert_eq!(settings.port, 8081);
        assert_eq!(settings.region, "eu");
        assert_eq!(settings.orchestrate_root, DEFAULT_ORCHESTRATE_ROOT);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_required_lists_every_name() {
        let settings = Settings::from_lookup(lookup(&[("ENVID", "env-1"), ("WORKERSECRET", "")])).unwrap();
        assert_eq!(
            settings.missing_required(),
            vec!["WORKERID", "WORKERSECRET", "DVAPIKEY"]
        );

        let err = settings.validate().unwrap_err();
        assert!(matches!(err, BrokerError::Configuration(_)));
        assert!(err.to_string().contains("WORKERID, WORKERSECRET, DVAPIKEY"));
    }

    #[test]
    fn test_invalid_port() {
        let result = Settings::from_lookup(lookup(&[("PORT", "not-a-port")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "ENVID": "env-2",
                "WORKERID": "w",
                "WORKERSECRET": "s",
                "DVAPIKEY": "k",
                "APIROOT": "http://localhost:9000/v1",
                "PROTECT_DASHBOARD_ITERATIONS": 5
            }}"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.environment_id.as_deref(), Some("env-2"));
        assert_eq!(settings.api_root.as_deref(), Some("http://localhost:9000/v1"));
        assert_eq!(settings.dashboard_iterations, 5);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.region, DEFAULT_REGION);
    }

    #[test]
    fn test_settings_missing_file() {
        assert!(Settings::from_file("/nonexistent/path/settings.json").is_err());
    }
}
