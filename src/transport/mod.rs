pub mod executor;
pub mod poller;

use reqwest::Method;
use serde_json::Value;

use crate::config::Settings;
use crate::security::Credential;

pub use executor::ApiClient;
pub use poller::{PollPolicy, PollTarget};

pub const REGIONAL_API_ROOT: &str = "https://api.pingone.{region}/v1";
pub const REGIONAL_AUTH_ROOT: &str = "https://auth.pingone.{region}";

/// Where resource and token calls are sent for a given credential.
///
/// The process credential honours `APIROOT`/`AUTHROOT` when configured;
/// override credentials always use the regional templates.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_root: Option<String>,
    pub auth_root: Option<String>,
    pub regional_api: String,
    pub regional_auth: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_root: None,
            auth_root: None,
            regional_api: REGIONAL_API_ROOT.to_string(),
            regional_auth: REGIONAL_AUTH_ROOT.to_string(),
        }
    }
}

impl Endpoints {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_root: settings.api_root.clone(),
            auth_root: settings.auth_root.clone(),
            ..Self::default()
        }
    }

    /// Every call, default or override, goes to `base` (`{base}/v1` for resources).
    pub fn fixed(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            api_root: Some(format!("{base}/v1")),
            auth_root: Some(base.to_string()),
            regional_api: format!("{base}/v1"),
            regional_auth: base.to_string(),
        }
    }

    pub fn api_root(&self, credential: &Credential) -> String {
        match (&self.api_root, credential.is_override()) {
            (Some(root), false) => root.trim_end_matches('/').to_string(),
            _ => self.regional_api.replace("{region}", &credential.region),
        }
    }

    pub fn auth_root(&self, credential: &Credential) -> String {
        match (&self.auth_root, credential.is_override()) {
            (Some(root), false) => root.trim_end_matches('/').to_string(),
            _ => self.regional_auth.replace("{region}", &credential.region),
        }
    }

    /// `{api_root}/environments/{environment_id}/{path}`
    pub fn environment_url(&self, credential: &Credential, path: &str) -> String {
        format!(
            "{}/environments/{}/{}",
            self.api_root(credential),
            credential.environment_id,
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Raw { bytes: Vec<u8>, content_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    #[default]
    Json,
    Text,
}

/// One authenticated call. Built per call and consumed by the executor.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub body: Option<RequestBody>,
    pub extra_headers: Vec<(String, String)>,
    pub credential: Credential,
    pub response: ResponseKind,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>, credential: Credential) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            extra_headers: Vec::new(),
            credential,
            response: ResponseKind::Json,
        }
    }

    pub fn get(url: impl Into<String>, credential: Credential) -> Self {
        Self::new(Method::GET, url, credential)
    }

    pub fn post(url: impl Into<String>, credential: Credential) -> Self {
        Self::new(Method::POST, url, credential)
    }

    pub fn put(url: impl Into<String>, credential: Credential) -> Self {
        Self::new(Method::PUT, url, credential)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn raw(mut self, bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Raw {
            bytes,
            content_type: content_type.into(),
        });
        self
    }

    /// Extra header; replaces a default header of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn text_response(mut self) -> Self {
        self.response = ResponseKind::Text;
        self
    }
}

/// Successful response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Text(String),
}

impl ApiResponse {
    pub fn into_json(self) -> Value {
        match self {
            ApiResponse::Json(value) => value,
            ApiResponse::Text(text) => Value::String(text),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ApiResponse::Json(value) => value.to_string(),
            ApiResponse::Text(text) => text,
        }
    }
}
