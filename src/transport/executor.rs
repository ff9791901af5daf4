use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use secrecy::SecretString;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{BrokerError, Result};
use crate::security::{
    Clock, Credential, CredentialOverride, CredentialResolver, TokenCache, TokenFetcher, TokenStore,
};
use crate::transport::{ApiResponse, Endpoints, RequestBody, RequestSpec, ResponseKind};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const JSON: &str = "application/json";

/// Authenticated client for the resource API.
///
/// Cheap to clone; clones share the HTTP connection pool and token caches.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: Client,
    fetcher: TokenFetcher,
    tokens: TokenStore,
    resolver: CredentialResolver,
    endpoints: Endpoints,
    orchestrate_root: String,
    dv_api_key: Option<SecretString>,
}

impl ApiClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            fetcher: TokenFetcher::new(http_client.clone()),
            http_client,
            tokens: TokenStore::default(),
            resolver: CredentialResolver::from_settings(settings),
            endpoints: Endpoints::from_settings(settings),
            orchestrate_root: settings.orchestrate_root.trim_end_matches('/').to_string(),
            dv_api_key: settings.dv_api_key.clone(),
        })
    }

    /// Replace the time source; resets every token cache.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tokens = TokenStore::new(clock);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_orchestrate_root(mut self, root: impl Into<String>) -> Self {
        self.orchestrate_root = root.into().trim_end_matches('/').to_string();
        self
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn orchestrate_root(&self) -> &str {
        &self.orchestrate_root
    }

    pub fn dv_api_key(&self) -> Option<&SecretString> {
        self.dv_api_key.as_ref()
    }

    pub fn credential(&self, override_credential: Option<&CredentialOverride>) -> Result<Credential> {
        self.resolver.resolve(override_credential)
    }

    /// `{api_root}/environments/{environment_id}/{path}` for `credential`.
    pub fn environment_url(&self, credential: &Credential, path: &str) -> String {
        self.endpoints.environment_url(credential, path)
    }

    /// A bearer token for `credential`, from its cache slot or freshly fetched.
    pub async fn bearer_token(&self, credential: &Credential) -> Result<String> {
        let cache = self.tokens.slot(credential).await;
        self.token_from(&cache, credential).await
    }

    async fn token_from(&self, cache: &TokenCache, credential: &Credential) -> Result<String> {
        if let Some(token) = cache.get().await {
            return Ok(token);
        }
        let auth_root = self.endpoints.auth_root(credential);
        let token = match self.fetcher.fetch_token(credential, &auth_root).await {
            Ok(token) => token,
            Err(e) => {
                // An override that cannot obtain a token keeps no slot.
                self.tokens.forget(credential).await;
                return Err(e);
            }
        };
        cache.set(token.access_token.clone(), token.expires_in).await;
        Ok(token.access_token)
    }

    /// Issue `spec` with a bearer token.
    ///
    /// The first 401/403 invalidates the cached token and the request is sent
    /// once more with a fresh one. Any other failure, including a second
    /// 401/403, is returned as [`BrokerError::Api`].
    pub async fn execute(&self, spec: RequestSpec) -> Result<ApiResponse> {
        debug!(method = %spec.method, url = %spec.url, "API call");
        let cache = self.tokens.slot(&spec.credential).await;

        let mut attempt = 1u8;
        loop {
            let token = self.token_from(&cache, &spec.credential).await?;
            let response = self.send(&spec, &token).await?;
            let status = response.status();

            if status.is_success() {
                return parse_response(response, spec.response).await;
            }

            let auth_failure = status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN;
            if auth_failure && attempt == 1 {
                warn!(
                    method = %spec.method,
                    url = %spec.url,
                    status = status.as_u16(),
                    "authorization failed, refreshing token and retrying once"
                );
                cache.invalidate().await;
                attempt += 1;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            warn!(
                method = %spec.method,
                url = %spec.url,
                status = status.as_u16(),
                attempt,
                "API call failed"
            );
            return Err(BrokerError::Api {
                method: spec.method.to_string(),
                url: spec.url.clone(),
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            });
        }
    }

    /// [`execute`](Self::execute) and return the JSON payload.
    pub async fn execute_json(&self, spec: RequestSpec) -> Result<Value> {
        Ok(self.execute(spec).await?.into_json())
    }

    async fn send(&self, spec: &RequestSpec, token: &str) -> Result<Response> {
        let mut headers = HeaderMap::new();
        let content_type = match &spec.body {
            Some(RequestBody::Raw { content_type, .. }) => content_type.as_str(),
            _ => JSON,
        };
        headers.insert(CONTENT_TYPE, header_value(content_type)?);
        for (name, value) in &spec.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BrokerError::InvalidRequest(format!("header name {name}: {e}")))?;
            headers.insert(name, header_value(value)?);
        }

        let mut request = self
            .http_client
            .request(spec.method.clone(), &spec.url)
            .bearer_auth(token)
            .headers(headers);

        if spec.method != Method::GET {
            request = match &spec.body {
                Some(RequestBody::Json(value)) => request.body(serde_json::to_vec(value)?),
                Some(RequestBody::Raw { bytes, .. }) => request.body(bytes.clone()),
                None => request,
            };
        }

        Ok(request.send().await?)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| BrokerError::InvalidRequest(format!("header value: {e}")))
}

pub(crate) async fn parse_response(response: Response, kind: ResponseKind) -> Result<ApiResponse> {
    let text = response.text().await?;
    match kind {
        ResponseKind::Text => Ok(ApiResponse::Text(text)),
        ResponseKind::Json if text.trim().is_empty() => Ok(ApiResponse::Json(Value::Null)),
        ResponseKind::Json => Ok(ApiResponse::Json(serde_json::from_str(&text)?)),
    }
}
