use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BrokerError, Result};
use crate::security::Credential;
use crate::transport::ApiClient;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 150;

/// Resource whose `status` field is expected to move away from `initial_status`.
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub url: String,
    pub initial_status: String,
    pub credential: Credential,
}

impl PollTarget {
    pub fn new(url: impl Into<String>, initial_status: impl Into<String>, credential: Credential) -> Self {
        Self {
            url: url.into(),
            initial_status: initial_status.into(),
            credential,
        }
    }
}

/// Bounds for a polling loop. At least one bound should be set; the default
/// allows 150 attempts two seconds apart.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub max_duration: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            max_duration: None,
        }
    }
}

impl PollPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    fn exhausted(&self, attempts: u32, started: Instant) -> bool {
        let attempts_spent = self.max_attempts.is_some_and(|max| attempts >= max);
        let time_spent = self
            .max_duration
            .is_some_and(|max| started.elapsed() + self.interval > max);
        attempts_spent || time_spent
    }
}

impl ApiClient {
    /// GET `target.url` until its `status` differs from the initial value and
    /// return that body.
    ///
    /// The bearer token is obtained once before the loop. A non-2xx response
    /// ends polling with [`BrokerError::Poll`]; running out of attempts or time
    /// gives [`BrokerError::PollTimeout`]; `cancel` gives
    /// [`BrokerError::PollCancelled`].
    pub async fn poll_until_changed(
        &self,
        target: &PollTarget,
        policy: &PollPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value> {
        debug!(url = %target.url, status = %target.initial_status, "polling for status change");
        let cancel = cancel.cloned().unwrap_or_else(CancellationToken::new);
        let token = self.bearer_token(&target.credential).await?;
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(BrokerError::PollCancelled {
                    url: target.url.clone(),
                });
            }
            attempts += 1;

            let response = self
                .http_client()
                .get(&target.url)
                .bearer_auth(&token)
                .header(CONTENT_TYPE, "application/json")
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(url = %target.url, status = status.as_u16(), attempts, "polling failed");
                return Err(BrokerError::Poll {
                    url: target.url.clone(),
                    status: status.as_u16(),
                    body,
                });
            }

            let data: Value = response.json().await?;
            let current = data.get("status").and_then(Value::as_str);
            debug!(url = %target.url, status = ?current, attempts, "poll response");

            if current != Some(target.initial_status.as_str()) {
                return Ok(data);
            }

            if policy.exhausted(attempts, started) {
                warn!(url = %target.url, attempts, "polling bound reached");
                return Err(BrokerError::PollTimeout {
                    url: target.url.clone(),
                    attempts,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(BrokerError::PollCancelled { url: target.url.clone() });
                }
                _ = sleep(policy.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::transport::Endpoints;
    use mockito::{Server, ServerGuard};
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_millis(50);

    fn client(server: &ServerGuard) -> ApiClient {
        let settings = Settings {
            environment_id: Some("env-1".to_string()),
            worker_id: Some("w".to_string()),
            worker_secret: Some(SecretString::from("s".to_string())),
            ..Settings::default()
        };
        ApiClient::new(&settings)
            .unwrap()
            .with_endpoints(Endpoints::fixed(&server.url()))
    }

    async fn token_mock(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/env-1/as/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok1","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await
    }

    /// Serves `{"status":"INITIAL"}` for the first `initial_count` requests, then COMPLETE.
    async fn status_sequence(server: &mut ServerGuard, initial_count: usize, expected: usize) -> mockito::Mock {
        let counter = Arc::new(AtomicUsize::new(0));
        server
            .mock("GET", "/v1/environments/env-1/presentationSessions/tx-1")
            .match_header("authorization", "Bearer tok1")
            .with_status(200)
            .with_body_from_request(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < initial_count {
                    br#"{"id":"tx-1","status":"INITIAL"}"#.to_vec()
                } else {
                    br#"{"id":"tx-1","status":"COMPLETE"}"#.to_vec()
                }
            })
            .expect(expected)
            .create_async()
            .await
    }

    fn target(api: &ApiClient) -> PollTarget {
        let cred = api.credential(None).unwrap();
        let url = api.environment_url(&cred, "presentationSessions/tx-1");
        PollTarget::new(url, "INITIAL", cred)
    }

    #[test]
    fn default_policy_polls_every_two_seconds_up_to_150_times() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(2000));
        assert_eq!(policy.max_attempts, Some(150));
        assert_eq!(policy.max_duration, None);
    }

    #[tokio::test]
    async fn polls_until_status_changes() {
        let mut server = Server::new_async().await;
        let token = token_mock(&mut server).await;
        let poll = status_sequence(&mut server, 3, 4).await;

        let api = client(&server);
        let policy = PollPolicy::default().with_interval(INTERVAL);
        let started = std::time::Instant::now();
        let result = api.poll_until_changed(&target(&api), &policy, None).await.unwrap();

        assert_eq!(result["status"], "COMPLETE");
        assert!(started.elapsed() >= INTERVAL * 3);
        token.assert_async().await;
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn max_attempts_bounds_the_loop() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let poll = status_sequence(&mut server, usize::MAX, 3).await;

        let api = client(&server);
        let policy = PollPolicy::default().with_interval(INTERVAL).with_max_attempts(3);
        let err = api.poll_until_changed(&target(&api), &policy, None).await.unwrap_err();

        assert!(matches!(err, BrokerError::PollTimeout { attempts: 3, .. }));
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn max_duration_bounds_the_loop() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _poll = status_sequence(&mut server, usize::MAX, 1).await;

        let api = client(&server);
        let policy = PollPolicy {
            interval: INTERVAL,
            max_attempts: None,
            max_duration: Some(Duration::from_millis(10)),
        };
        let err = api.poll_until_changed(&target(&api), &policy, None).await.unwrap_err();
        assert!(matches!(err, BrokerError::PollTimeout { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn non_success_fails_immediately() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let poll = server
            .mock("GET", "/v1/environments/env-1/presentationSessions/tx-1")
            .with_status(404)
            .with_body("missing")
            .expect(1)
            .create_async()
            .await;

        let api = client(&server);
        let err = api
            .poll_until_changed(&target(&api), &PollPolicy::default(), None)
            .await
            .unwrap_err();

        match err {
            BrokerError::Poll { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _poll = status_sequence(&mut server, usize::MAX, 1).await;

        let api = client(&server);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let policy = PollPolicy::default().with_interval(Duration::from_secs(30));
        let err = api
            .poll_until_changed(&target(&api), &policy, Some(&cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::PollCancelled { .. }));
    }

    #[tokio::test]
    async fn missing_status_field_counts_as_changed() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _poll = server
            .mock("GET", "/v1/environments/env-1/presentationSessions/tx-1")
            .with_status(200)
            .with_body(r#"{"id":"tx-1"}"#)
            .create_async()
            .await;

        let api = client(&server);
        let result = api
            .poll_until_changed(&target(&api), &PollPolicy::default(), None)
            .await
            .unwrap();
        assert_eq!(result["id"], "tx-1");
    }
}
