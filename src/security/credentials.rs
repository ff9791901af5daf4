use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::{Settings, DEFAULT_REGION};
use crate::error::{BrokerError, Result};

/// Where a resolved credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Process-wide settings; shares the default token cache slot.
    Default,
    /// Explicit per-call override; gets its own cache slot.
    Override,
}

/// Worker identity used for a token request.
#[derive(Debug, Clone)]
pub struct Credential {
    pub environment_id: String,
    pub worker_id: String,
    pub worker_secret: SecretString,
    pub region: String,
    pub source: CredentialSource,
}

impl Credential {
    pub fn new(
        environment_id: impl Into<String>,
        worker_id: impl Into<String>,
        worker_secret: impl Into<String>,
        region: Option<&str>,
    ) -> Self {
        Self {
            environment_id: environment_id.into(),
            worker_id: worker_id.into(),
            worker_secret: SecretString::from(worker_secret.into()),
            region: region.unwrap_or(DEFAULT_REGION).to_string(),
            source: CredentialSource::Override,
        }
    }

    pub fn is_override(&self) -> bool {
        self.source == CredentialSource::Override
    }

    /// Identity key for per-override token caching. The secret only
    /// contributes its SHA-256 digest.
    pub fn cache_key(&self) -> String {
        let digest = Sha256::digest(self.worker_secret.expose_secret().as_bytes());
        format!(
            "{}|{}|{}|{:x}",
            self.environment_id, self.worker_id, self.region, digest
        )
    }
}

/// Per-call credential supplied by a caller. Fields are taken as given;
/// nothing is filled in from process defaults except the region default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialOverride {
    #[serde(rename = "envId")]
    pub environment_id: Option<String>,
    #[serde(rename = "workerId")]
    pub worker_id: Option<String>,
    #[serde(rename = "workerSecret")]
    pub worker_secret: Option<String>,
    pub region: Option<String>,
}

impl CredentialOverride {
    pub fn new(
        environment_id: impl Into<String>,
        worker_id: impl Into<String>,
        worker_secret: impl Into<String>,
        region: Option<&str>,
    ) -> Self {
        Self {
            environment_id: Some(environment_id.into()),
            worker_id: Some(worker_id.into()),
            worker_secret: Some(worker_secret.into()),
            region: region.map(str::to_string),
        }
    }
}

fn require<T>(value: Option<T>, name: &'static str, missing: &mut Vec<&'static str>) -> Option<T> {
    if value.is_none() {
        missing.push(name);
    }
    value
}

/// Produces the credential for a call from either an override or the
/// process-wide settings, never a mix of both.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    environment_id: Option<String>,
    worker_id: Option<String>,
    worker_secret: Option<SecretString>,
    region: String,
}

impl CredentialResolver {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            environment_id: settings.environment_id.clone(),
            worker_id: settings.worker_id.clone(),
            worker_secret: settings.worker_secret.clone(),
            region: settings.region.clone(),
        }
    }

    pub fn resolve(&self, override_credential: Option<&CredentialOverride>) -> Result<Credential> {
        match override_credential {
            Some(o) => Self::resolve_override(o),
            None => self.resolve_defaults(),
        }
    }

    fn resolve_override(o: &CredentialOverride) -> Result<Credential> {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let mut missing = Vec::new();
        let environment_id = require(non_empty(&o.environment_id), "environmentId", &mut missing);
        let worker_id = require(non_empty(&o.worker_id), "workerId", &mut missing);
        let worker_secret = require(non_empty(&o.worker_secret), "workerSecret", &mut missing);

        match (environment_id, worker_id, worker_secret) {
            (Some(env), Some(id), Some(secret)) => Ok(Credential::new(
                env,
                id,
                secret,
                non_empty(&o.region).as_deref(),
            )),
            _ => Err(BrokerError::Configuration(format!(
                "credential override is missing {}",
                missing.join(", ")
            ))),
        }
    }

    fn resolve_defaults(&self) -> Result<Credential> {
        let mut missing = Vec::new();
        let environment_id = require(self.environment_id.clone(), "ENVID", &mut missing);
        let worker_id = require(self.worker_id.clone(), "WORKERID", &mut missing);
        let worker_secret = require(self.worker_secret.clone(), "WORKERSECRET", &mut missing);

        match (environment_id, worker_id, worker_secret) {
            (Some(environment_id), Some(worker_id), Some(worker_secret)) => Ok(Credential {
                environment_id,
                worker_id,
                worker_secret,
                region: self.region.clone(),
                source: CredentialSource::Default,
            }),
            _ => Err(BrokerError::Configuration(format!(
                "missing default credential fields: {}",
                missing.join(", ")
            ))),
        }
    }
}
