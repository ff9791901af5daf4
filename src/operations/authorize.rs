use serde_json::{json, Value};

use crate::error::Result;
use crate::transport::{ApiClient, RequestSpec};

/// Ask the decision endpoint `decision_endpoint_id` to evaluate `parameters`.
pub async fn get_authorize_decision(api: &ApiClient, decision_endpoint_id: &str, parameters: Value) -> Result<Value> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, &format!("decisionEndpoints/{decision_endpoint_id}"));
    api.execute_json(RequestSpec::post(url, credential).json(json!({ "parameters": parameters })))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::{client, token_mock};
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn parameters_are_wrapped() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server, "env-1", "tok").await;
        let decision = server
            .mock("POST", "/v1/environments/env-1/decisionEndpoints/de-1")
            .match_body(Matcher::Json(json!({"parameters": {"Amount": 50}})))
            .with_status(200)
            .with_body(r#"{"decision":"PERMIT"}"#)
            .create_async()
            .await;

        let api = client(&server);
        let result = get_authorize_decision(&api, "de-1", json!({"Amount": 50})).await.unwrap();
        assert_eq!(result["decision"], "PERMIT");
        decision.assert_async().await;
    }
}
