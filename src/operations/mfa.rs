use serde_json::{json, Value};

use super::users;
use crate::error::Result;
use crate::security::CredentialOverride;
use crate::transport::{ApiClient, RequestSpec};

pub const DEVICE_ACTIVATE_CONTENT_TYPE: &str = "application/vnd.pingidentity.device.activate+json";
pub const ASSERTION_CHECK_CONTENT_TYPE: &str = "application/vnd.pingidentity.assertion.check+json";

pub async fn create_mfa_device(api: &ApiClient, user_id: &str, body: Value) -> Result<Value> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, &format!("users/{user_id}/devices"));
    api.execute_json(RequestSpec::post(url, credential).json(body)).await
}

/// Activate a device. The service answers with a non-JSON body, returned as is.
pub async fn activate_mfa_device(api: &ApiClient, user_id: &str, device_id: &str, body: &Value) -> Result<String> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, &format!("users/{user_id}/devices/{device_id}"));
    let spec = RequestSpec::post(url, credential)
        .raw(serde_json::to_vec(body)?, DEVICE_ACTIVATE_CONTENT_TYPE)
        .text_response();
    Ok(api.execute(spec).await?.into_text())
}

pub async fn create_device_authentication(api: &ApiClient, user_id: &str) -> Result<Value> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, "deviceAuthentications");
    api.execute_json(RequestSpec::post(url, credential).json(json!({ "user": { "id": user_id } })))
        .await
}

pub async fn validate_device_authentication(
    api: &ApiClient,
    device_authentication_id: &str,
    body: &Value,
) -> Result<Value> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, &format!("deviceAuthentications/{device_authentication_id}"));
    let spec = RequestSpec::post(url, credential).raw(serde_json::to_vec(body)?, ASSERTION_CHECK_CONTENT_TYPE);
    api.execute_json(spec).await
}

/// Register the browser described by `payload` as a trusted device of
/// `username`, creating the user if needed.
pub async fn remember_device(
    api: &ApiClient,
    payload: Value,
    session_id: &str,
    username: &str,
    override_credential: Option<&CredentialOverride>,
) -> Result<Value> {
    let credential = api.credential(override_credential)?;
    let user_id = users::find_or_create_user(api, username, &credential).await?;
    let url = api.environment_url(&credential, &format!("users/{user_id}/devices"));
    let body = json!({
        "type": "BROWSER",
        "payload": payload,
        "session": { "id": session_id },
    });
    api.execute_json(RequestSpec::post(url, credential).json(body)).await
}
