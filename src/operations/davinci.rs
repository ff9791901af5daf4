use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{BrokerError, Result};
use crate::transport::executor::parse_response;
use crate::transport::{ApiClient, ResponseKind};

pub const API_KEY_HEADER: &str = "X-SK-API-KEY";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SdkTokenRequest<'a> {
    policy_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    global: Option<GlobalVariables<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GlobalVariables<'a> {
    session_token: &'a str,
}

/// Request a widget token for flow policy `policy_id`.
///
/// Authenticated with the DaVinci API key rather than a worker token. A
/// session token, when given, is exposed to the flow as `global.sessionToken`.
pub async fn get_sdk_token(api: &ApiClient, policy_id: &str, session_token: Option<&str>) -> Result<Value> {
    let api_key = api
        .dv_api_key()
        .ok_or_else(|| BrokerError::Configuration("DVAPIKEY is not set".to_string()))?;
    let credential = api.credential(None)?;
    let url = format!(
        "{}/v1/company/{}/sdktoken",
        api.orchestrate_root().trim_end_matches('/'),
        credential.environment_id
    );
    let body = SdkTokenRequest {
        policy_id,
        global: session_token.map(|session_token| GlobalVariables { session_token }),
    };

    debug!(%url, policy_id, "requesting SDK token");
    let response = api
        .http_client()
        .post(&url)
        .header(CONTENT_TYPE, "application/json")
        .header(API_KEY_HEADER, api_key.expose_secret())
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(%url, status = status.as_u16(), "SDK token request failed");
        return Err(BrokerError::Api {
            method: "POST".to_string(),
            url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        });
    }

    Ok(parse_response(response, ResponseKind::Json).await?.into_json())
}
