//! Named calls against the PingOne APIs, each a thin composition of a URL
//! template, a JSON body and the authenticated executor or the poller.

pub mod authorize;
pub mod davinci;
pub mod images;
pub mod mfa;
pub mod protect;
pub mod sessions;
pub mod users;
pub mod wallet;

pub use protect::{CompletionStatus, RiskEventInput};

pub const DEFAULT_SESSION_ID: &str = "genericSessionId";
pub const DEFAULT_EVENT_ORIGIN: &str = "FACILE_DEMO";
pub const DEFAULT_FLOW_TYPE: &str = "AUTHENTICATION";

#[cfg(test)]
pub(crate) mod test_support {
    use mockito::ServerGuard;
    use secrecy::SecretString;

    use crate::config::Settings;
    use crate::transport::{ApiClient, Endpoints};

    pub fn settings() -> Settings {
        Settings {
            environment_id: Some("env-1".to_string()),
            worker_id: Some("w".to_string()),
            worker_secret: Some(SecretString::from("s".to_string())),
            dv_api_key: Some(SecretString::from("dv-key".to_string())),
            ..Settings::default()
        }
    }

    pub fn client(server: &ServerGuard) -> ApiClient {
        ApiClient::new(&settings())
            .unwrap()
            .with_endpoints(Endpoints::fixed(&server.url()))
            .with_orchestrate_root(server.url())
    }

    /// Token endpoint for `environment_id` that always issues `token`.
    pub async fn token_mock(server: &mut ServerGuard, environment_id: &str, token: &str) -> mockito::Mock {
        server
            .mock("POST", format!("/{environment_id}/as/token").as_str())
            .with_status(200)
            .with_body(format!(r#"{{"access_token":"{token}","expires_in":3600}}"#))
            .create_async()
            .await
    }
}
