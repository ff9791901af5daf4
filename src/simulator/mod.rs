//! Synthetic risk traffic used to populate the Protect dashboard of a
//! freshly provisioned environment.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, Result};
use crate::operations::protect::{create_risk_evaluation, update_risk_evaluation, DEFAULT_SHARING_TYPE, DEFAULT_USER_TYPE};
use crate::operations::CompletionStatus;
use crate::security::CredentialOverride;
use crate::transport::ApiClient;

pub const SIMULATED_ORIGIN: &str = "Postman";
pub const EVENT_TYPES: [&str; 5] = ["AUTHENTICATION", "ACCESS", "AUTHORIZATION", "TRANSACTION", "REGISTRATION"];

const USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
];

#[derive(Debug, Clone, Copy)]
struct Application {
    id: &'static str,
    name: &'static str,
}

#[derive(Debug, Clone, Copy)]
struct SampleUser {
    username: &'static str,
    timezone: &'static str,
    applications: &'static [Application],
}

const REDIRECTLESS: Application = Application { id: "PingRedirectless", name: "Ping Redirectless" };
const LOGON: Application = Application { id: "PingLogon", name: "Ping Logon" };
const DELEGATOR: Application = Application { id: "dadmin", name: "Delegator" };
const SAML: Application = Application { id: "Sample-SAML", name: "Sample SAML" };
const SAML_PASSWORDLESS: Application = Application { id: "Sample-Passwordless", name: "Sample SAML - Passwordless" };
const SAML_VERIFY: Application = Application { id: "Sample-Widget", name: "Sample SAML - Verify" };

const SAMPLE_USERS: [SampleUser; 5] = [
    SampleUser {
        username: "user.100",
        timezone: "America/Los_Angeles",
        applications: &[REDIRECTLESS, SAML, SAML_PASSWORDLESS, LOGON],
    },
    SampleUser {
        username: "user.101",
        timezone: "America/New_York",
        applications: &[REDIRECTLESS, LOGON, DELEGATOR],
    },
    SampleUser {
        username: "user.102",
        timezone: "Europe/London",
        applications: &[SAML, SAML_VERIFY, REDIRECTLESS, LOGON],
    },
    SampleUser {
        username: "user.103",
        timezone: "Australia/Sydney",
        applications: &[SAML, SAML_VERIFY, REDIRECTLESS],
    },
    SampleUser {
        username: "user.104",
        timezone: "America/New_York",
        applications: &[SAML, SAML_VERIFY, REDIRECTLESS, LOGON, DELEGATOR],
    },
];

/// Iteration counters, readable while a run is in flight.
#[derive(Debug, Default)]
pub struct Progress {
    completed: AtomicU32,
    failed: AtomicU32,
}

impl Progress {
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u32 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record(&self, success: bool) {
        let counter = if success { &self.completed } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub completed: u32,
    pub failed: u32,
}

/// A random risk event for one of the sample users.
pub fn random_event() -> Value {
    let mut rng = rand::thread_rng();
    let user = SAMPLE_USERS.choose(&mut rng).unwrap_or(&SAMPLE_USERS[0]);
    let app = user.applications.choose(&mut rng).unwrap_or(&REDIRECTLESS);
    let event_type = EVENT_TYPES.choose(&mut rng).unwrap_or(&EVENT_TYPES[0]);
    let user_agent = USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0]);
    let ip = Ipv4Addr::from(rng.gen::<u32>());

    json!({
        "targetResource": { "id": app.id, "name": app.name },
        "ip": ip.to_string(),
        "flow": { "type": event_type },
        "user": { "id": user.username, "type": DEFAULT_USER_TYPE },
        "sharingType": DEFAULT_SHARING_TYPE,
        "browser": {
            "userAgent": user_agent,
            "language": "en",
            "colorDepth": 24,
            "deviceMemory": 8,
            "hardwareConcurrency": 8,
            "screenResolution": [900, 1440],
            "availableScreenResolution": [877, 1380],
            "timezone": user.timezone,
            "sessionStorage": true,
            "localStorage": true,
            "indexedDb": true,
            "platform": "MacIntel",
            "adBlock": false,
            "touchSupport": ["0", "false", "false"],
            "fonts": ["Arial", "Courier New", "Helvetica"],
        },
        "origin": SIMULATED_ORIGIN,
    })
}

async fn simulate_once(api: &ApiClient, override_credential: Option<&CredentialOverride>) -> Result<String> {
    let evaluation = create_risk_evaluation(api, random_event(), override_credential).await?;
    let evaluation_id = evaluation
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| BrokerError::InvalidRequest("risk evaluation response has no id".to_string()))?
        .to_string();
    update_risk_evaluation(api, &evaluation_id, CompletionStatus::Success, override_credential).await?;
    Ok(evaluation_id)
}

/// Run `iterations` create-and-complete cycles against the environment of
/// `override_credential` (or the process credential).
///
/// Failed iterations are counted in `progress` and do not stop the run.
/// Credential problems are reported before any traffic is sent.
pub async fn run_dashboard(
    api: &ApiClient,
    override_credential: Option<&CredentialOverride>,
    iterations: u32,
    progress: &Progress,
    cancel: Option<&CancellationToken>,
) -> Result<SimulationReport> {
    let credential = api.credential(override_credential)?;
    info!(environment_id = %credential.environment_id, iterations, "dashboard simulation started");

    for iteration in 1..=iterations {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            warn!(iteration, "dashboard simulation cancelled");
            break;
        }
        match simulate_once(api, override_credential).await {
            Ok(evaluation_id) => {
                debug!(iteration, %evaluation_id, "simulated risk event");
                progress.record(true);
            }
            Err(e) => {
                warn!(iteration, error = %e, "simulated risk event failed");
                progress.record(false);
            }
        }
    }

    let report = SimulationReport {
        completed: progress.completed(),
        failed: progress.failed(),
    };
    info!(completed = report.completed, failed = report.failed, "dashboard simulation finished");
    Ok(report)
}
