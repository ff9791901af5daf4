use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{mfa, DEFAULT_EVENT_ORIGIN, DEFAULT_FLOW_TYPE, DEFAULT_SESSION_ID};
use crate::error::{BrokerError, Result};
use crate::security::CredentialOverride;
use crate::transport::{ApiClient, RequestSpec};

pub const DEFAULT_FLOW_SUB_TYPE: &str = "ACTIVE_SESSION";
pub const DEFAULT_TARGET_RESOURCE: &str = "Signals SDK demo";
pub const DEFAULT_USER_TYPE: &str = "EXTERNAL";
pub const DEFAULT_SHARING_TYPE: &str = "PRIVATE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// What the caller knows about a sign-in attempt. Everything else in the
/// risk event is filled with demo defaults.
#[derive(Debug, Clone, Default)]
pub struct RiskEventInput {
    pub ip: String,
    pub username: String,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub sdk_payload: Option<Value>,
    pub remember_device: bool,
}

impl RiskEventInput {
    pub fn new(ip: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or(DEFAULT_SESSION_ID)
    }

    /// The `event` object sent to `riskEvaluations`.
    pub fn to_event(&self) -> Value {
        json!({
            "targetResource": {
                "id": DEFAULT_TARGET_RESOURCE,
                "name": DEFAULT_TARGET_RESOURCE,
            },
            "ip": self.ip,
            "flow": {
                "type": DEFAULT_FLOW_TYPE,
                "sub-type": DEFAULT_FLOW_SUB_TYPE,
            },
            "session": { "id": self.session_id() },
            "browser": { "userAgent": self.user_agent },
            "sdk": { "signals": { "data": self.sdk_payload } },
            "user": {
                "id": self.username,
                "name": self.username,
                "type": DEFAULT_USER_TYPE,
            },
            "sharingType": DEFAULT_SHARING_TYPE,
            "origin": DEFAULT_EVENT_ORIGIN,
        })
    }
}

pub async fn create_risk_evaluation(
    api: &ApiClient,
    event: Value,
    override_credential: Option<&CredentialOverride>,
) -> Result<Value> {
    let credential = api.credential(override_credential)?;
    let url = api.environment_url(&credential, "riskEvaluations");
    api.execute_json(RequestSpec::post(url, credential).json(json!({ "event": event })))
        .await
}

pub async fn update_risk_evaluation(
    api: &ApiClient,
    evaluation_id: &str,
    status: CompletionStatus,
    override_credential: Option<&CredentialOverride>,
) -> Result<Value> {
    let credential = api.credential(override_credential)?;
    let url = api.environment_url(&credential, &format!("riskEvaluations/{evaluation_id}/event"));
    api.execute_json(RequestSpec::put(url, credential).json(json!({ "completionStatus": status })))
        .await
}

/// Create a risk evaluation for `input` and return it.
///
/// Evaluations without a recommended action are closed as `SUCCESS` right
/// away. When `input.remember_device` is set the device is registered for
/// the user afterwards.
pub async fn evaluate_risk(
    api: &ApiClient,
    input: &RiskEventInput,
    override_credential: Option<&CredentialOverride>,
) -> Result<Value> {
    let decision = create_risk_evaluation(api, input.to_event(), override_credential).await?;
    let evaluation_id = decision
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| BrokerError::InvalidRequest("risk evaluation response has no id".to_string()))?;

    let recommended = decision
        .pointer("/result/recommendedAction")
        .filter(|v| !v.is_null());
    match recommended {
        Some(action) => debug!(evaluation_id, %action, "risk evaluation recommends an action"),
        None => {
            update_risk_evaluation(api, evaluation_id, CompletionStatus::Success, override_credential).await?;
            debug!(evaluation_id, "risk evaluation completed");
        }
    }

    if input.remember_device {
        mfa::remember_device(
            api,
            input.sdk_payload.clone().unwrap_or(Value::Null),
            input.session_id(),
            &input.username,
            override_credential,
        )
        .await?;
        info!(username = %input.username, "device remembered");
    }

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::{client, token_mock};
    use mockito::{Matcher, Server};

    #[test]
    fn event_carries_defaults() {
        let event = RiskEventInput::new("10.0.0.1", "alice").to_event();
        assert_eq!(event["session"]["id"], DEFAULT_SESSION_ID);
        assert_eq!(event["origin"], "FACILE_DEMO");
        assert_eq!(event["flow"]["type"], "AUTHENTICATION");
        assert_eq!(event["flow"]["sub-type"], "ACTIVE_SESSION");
        assert_eq!(event["user"]["type"], "EXTERNAL");
        assert_eq!(event["sharingType"], "PRIVATE");
        assert_eq!(event["targetResource"]["id"], "Signals SDK demo");
        assert_eq!(event["ip"], "10.0.0.1");
    }

    #[test]
    fn event_uses_supplied_session_and_agent() {
        let input = RiskEventInput {
            user_agent: Some("curl/8".to_string()),
            session_id: Some("sess-7".to_string()),
            sdk_payload: Some(json!("signals")),
            ..RiskEventInput::new("10.0.0.1", "alice")
        };
        let event = input.to_event();
        assert_eq!(event["session"]["id"], "sess-7");
        assert_eq!(event["browser"]["userAgent"], "curl/8");
        assert_eq!(event["sdk"]["signals"]["data"], "signals");
    }

    #[test]
    fn completion_status_serializes_upper_case() {
        assert_eq!(serde_json::to_value(CompletionStatus::Success).unwrap(), json!("SUCCESS"));
        assert_eq!(serde_json::to_value(CompletionStatus::Failed).unwrap(), json!("FAILED"));
    }

    #[tokio::test]
    async fn evaluation_without_recommendation_is_completed() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server, "env-1", "tok").await;
        let create = server
            .mock("POST", "/v1/environments/env-1/riskEvaluations")
            .match_body(Matcher::PartialJson(json!({"event": {"ip": "1.1.1.1"}})))
            .with_status(201)
            .with_body(r#"{"id":"risk-1","result":{"level":"LOW"}}"#)
            .create_async()
            .await;
        let update = server
            .mock("PUT", "/v1/environments/env-1/riskEvaluations/risk-1/event")
            .match_body(Matcher::Json(json!({"completionStatus": "SUCCESS"})))
            .with_status(200)
            .with_body(r#"{"id":"risk-1"}"#)
            .expect(1)
            .create_async()
            .await;

        let api = client(&server);
        let decision = evaluate_risk(&api, &RiskEventInput::new("1.1.1.1", "alice"), None)
            .await
            .unwrap();

        assert_eq!(decision["id"], "risk-1");
        create.assert_async().await;
        update.assert_async().await;
    }

    #[tokio::test]
    async fn recommended_action_leaves_evaluation_open() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server, "env-1", "tok").await;
        let _create = server
            .mock("POST", "/v1/environments/env-1/riskEvaluations")
            .with_status(201)
            .with_body(r#"{"id":"risk-2","result":{"level":"HIGH","recommendedAction":"DENY"}}"#)
            .create_async()
            .await;
        let update = server
            .mock("PUT", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let api = client(&server);
        let decision = evaluate_risk(&api, &RiskEventInput::new("1.1.1.1", "alice"), None)
            .await
            .unwrap();

        assert_eq!(decision["result"]["recommendedAction"], "DENY");
        update.assert_async().await;
    }

    #[tokio::test]
    async fn evaluation_without_id_is_rejected_before_update() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server, "env-1", "tok").await;
        let _create = server
            .mock("POST", "/v1/environments/env-1/riskEvaluations")
            .with_status(201)
            .with_body(r#"{"result":{"level":"LOW"}}"#)
            .create_async()
            .await;
        let update = server
            .mock("PUT", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let api = client(&server);
        let err = evaluate_risk(&api, &RiskEventInput::new("1.1.1.1", "alice"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::InvalidRequest(_)));
        update.assert_async().await;
    }

    #[tokio::test]
    async fn remember_device_registers_browser() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server, "env-1", "tok").await;
        let _create = server
            .mock("POST", "/v1/environments/env-1/riskEvaluations")
            .with_status(201)
            .with_body(r#"{"id":"risk-3","result":{"recommendedAction":"BOT_MITIGATION"}}"#)
            .create_async()
            .await;
        let _lookup = server
            .mock("GET", Matcher::Regex(r"^/v1/environments/env-1/users".to_string()))
            .with_status(200)
            .with_body(r#"{"size":1,"_embedded":{"users":[{"id":"u-1"}]}}"#)
            .create_async()
            .await;
        let device = server
            .mock("POST", "/v1/environments/env-1/users/u-1/devices")
            .match_body(Matcher::Json(json!({
                "type": "BROWSER",
                "payload": "sdk-data",
                "session": {"id": "genericSessionId"}
            })))
            .with_status(201)
            .with_body(r#"{"id":"dev-1"}"#)
            .expect(1)
            .create_async()
            .await;

        let api = client(&server);
        let input = RiskEventInput {
            sdk_payload: Some(json!("sdk-data")),
            remember_device: true,
            ..RiskEventInput::new("1.1.1.1", "alice")
        };
        evaluate_risk(&api, &input, None).await.unwrap();
        device.assert_async().await;
    }
}
