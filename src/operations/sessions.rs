use serde_json::Value;

use crate::error::Result;
use crate::transport::{ApiClient, RequestSpec};

/// Session cookie header for a PingOne session token.
fn session_cookie(session_token: &str) -> String {
    format!("ST={session_token}")
}

pub async fn get_session(api: &ApiClient, session_token: &str) -> Result<Value> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, "sessions/me");
    let spec = RequestSpec::get(url, credential).header("Cookie", session_cookie(session_token));
    api.execute_json(spec).await
}

pub async fn update_session(api: &ApiClient, session_token: &str, body: Value) -> Result<Value> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, "sessions/me");
    let spec = RequestSpec::put(url, credential)
        .json(body)
        .header("Cookie", session_cookie(session_token));
    api.execute_json(spec).await
}
