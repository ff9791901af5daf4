use reqwest::header::ACCEPT;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{BrokerError, Result};
use crate::security::credentials::Credential;

// Used when the identity provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Access token as returned by the identity provider.
#[derive(Clone, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECS
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchanges worker credentials for an access token (client-credentials grant).
#[derive(Debug, Clone)]
pub struct TokenFetcher {
    http_client: Client,
}

impl TokenFetcher {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    /// POST `{auth_root}/{environment_id}/as/token` with HTTP Basic auth.
    ///
    /// The caller decides where the returned token is stored.
    pub async fn fetch_token(&self, credential: &Credential, auth_root: &str) -> Result<Token> {
        let url = format!(
            "{}/{}/as/token",
            auth_root.trim_end_matches('/'),
            credential.environment_id
        );
        debug!(url = %url, worker_id = %credential.worker_id, "requesting worker token");

        let response = self
            .http_client
            .post(&url)
            .basic_auth(
                &credential.worker_id,
                Some(credential.worker_secret.expose_secret()),
            )
            .header(ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                url = %url,
                status = status.as_u16(),
                "token endpoint rejected worker credentials"
            );
            return Err(BrokerError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let token: Token = serde_json::from_str(&body)?;
        debug!(expires_in = token.expires_in, "worker token issued");
        Ok(token)
    }
}
