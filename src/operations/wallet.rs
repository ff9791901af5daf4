//! Digital wallet pairing and verifiable credential presentations.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::transport::{ApiClient, PollPolicy, PollTarget, RequestSpec};

pub const PRESENTATION_INITIAL_STATUS: &str = "INITIAL";

pub async fn pair_digital_wallet(
    api: &ApiClient,
    application_instance_id: &str,
    digital_wallet_application_id: &str,
    user_id: &str,
) -> Result<Value> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, &format!("users/{user_id}/digitalWallets"));
    let body = json!({
        "digitalWalletApplication": { "id": digital_wallet_application_id },
        "applicationInstance": { "id": application_instance_id },
    });
    api.execute_json(RequestSpec::post(url, credential).json(body)).await
}

/// Wait for the presentation session `transaction_id` to leave `INITIAL`.
pub async fn get_credential_transaction(
    api: &ApiClient,
    transaction_id: &str,
    policy: &PollPolicy,
    cancel: Option<&CancellationToken>,
) -> Result<Value> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, &format!("presentationSessions/{transaction_id}"));
    let target = PollTarget::new(url, PRESENTATION_INITIAL_STATUS, credential);
    api.poll_until_changed(&target, policy, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::{client, token_mock};
    use mockito::{Matcher, Server};
    use std::time::Duration;

    #[tokio::test]
    async fn pairing_links_instance_and_application() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server, "env-1", "tok").await;
        let pair = server
            .mock("POST", "/v1/environments/env-1/users/u-1/digitalWallets")
            .match_body(Matcher::Json(json!({
                "digitalWalletApplication": {"id": "app-1"},
                "applicationInstance": {"id": "inst-1"}
            })))
            .with_status(201)
            .with_body(r#"{"id":"wallet-1","status":"PAIRING_REQUIRED"}"#)
            .create_async()
            .await;

        let api = client(&server);
        let wallet = pair_digital_wallet(&api, "inst-1", "app-1", "u-1").await.unwrap();
        assert_eq!(wallet["id"], "wallet-1");
        pair.assert_async().await;
    }

    #[tokio::test]
    async fn transaction_resolves_once_presented() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server, "env-1", "tok").await;
        let _session = server
            .mock("GET", "/v1/environments/env-1/presentationSessions/tx-5")
            .with_status(200)
            .with_body(r#"{"id":"tx-5","status":"VERIFICATION_SUCCESSFUL"}"#)
            .create_async()
            .await;

        let api = client(&server);
        let policy = PollPolicy::default().with_interval(Duration::from_millis(10));
        let result = get_credential_transaction(&api, "tx-5", &policy, None).await.unwrap();
        assert_eq!(result["status"], "VERIFICATION_SUCCESSFUL");
    }
}
