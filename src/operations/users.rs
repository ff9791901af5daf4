use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{BrokerError, Result};
use crate::security::{Credential, CredentialOverride};
use crate::transport::{ApiClient, RequestSpec};

#[derive(Debug, Default, Deserialize)]
struct UserPage {
    #[serde(default)]
    size: u64,
    #[serde(rename = "_embedded", default)]
    embedded: EmbeddedUsers,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddedUsers {
    #[serde(default)]
    users: Vec<Resource>,
}

#[derive(Debug, Default, Deserialize)]
struct PopulationPage {
    #[serde(rename = "_embedded", default)]
    embedded: EmbeddedPopulations,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddedPopulations {
    #[serde(default)]
    populations: Vec<Population>,
}

#[derive(Debug, Deserialize)]
struct Population {
    id: String,
    #[serde(default)]
    default: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Resource {
    id: String,
}

/// Id of the population flagged `default: true`.
pub async fn get_default_population(api: &ApiClient, override_credential: Option<&CredentialOverride>) -> Result<String> {
    let credential = api.credential(override_credential)?;
    default_population(api, &credential).await
}

/// Create `username` in the default population and return the new user's id.
pub async fn create_user(
    api: &ApiClient,
    username: &str,
    override_credential: Option<&CredentialOverride>,
) -> Result<String> {
    let credential = api.credential(override_credential)?;
    create_user_with(api, username, &credential).await
}

/// Id of the user named exactly `username`, creating the user unless the
/// lookup returns exactly one match.
pub async fn find_user_by_username(
    api: &ApiClient,
    username: &str,
    override_credential: Option<&CredentialOverride>,
) -> Result<String> {
    let credential = api.credential(override_credential)?;
    find_or_create_user(api, username, &credential).await
}

pub(crate) async fn default_population(api: &ApiClient, credential: &Credential) -> Result<String> {
    let url = api.environment_url(credential, "populations");
    let value = api.execute_json(RequestSpec::get(url, credential.clone())).await?;
    let page: PopulationPage = serde_json::from_value(value)?;

    page.embedded
        .populations
        .into_iter()
        .find(|p| p.default)
        .map(|p| p.id)
        .ok_or_else(|| BrokerError::PopulationNotFound {
            environment_id: credential.environment_id.clone(),
        })
}

pub(crate) async fn create_user_with(api: &ApiClient, username: &str, credential: &Credential) -> Result<String> {
    let population_id = default_population(api, credential).await?;
    let url = api.environment_url(credential, "users");
    let body = json!({
        "username": username,
        "population": { "id": population_id },
    });

    let value = api
        .execute_json(RequestSpec::post(url, credential.clone()).json(body))
        .await?;
    let created: Resource = serde_json::from_value(value)?;
    info!(user_id = %created.id, "user created");
    Ok(created.id)
}

pub(crate) async fn find_or_create_user(api: &ApiClient, username: &str, credential: &Credential) -> Result<String> {
    let base = api.environment_url(credential, "users");
    let url = Url::parse_with_params(&base, &[("filter", format!("username eq \"{username}\""))])
        .map_err(|e| BrokerError::InvalidRequest(format!("user lookup url: {e}")))?;

    let value = api
        .execute_json(RequestSpec::get(url.to_string(), credential.clone()))
        .await?;
    let page: UserPage = serde_json::from_value(value)?;

    if page.size == 1 {
        if let Some(user) = page.embedded.users.into_iter().next() {
            debug!(user_id = %user.id, "existing user found");
            return Ok(user.id);
        }
    }

    debug!(matches = page.size, "no unique user found, creating one");
    create_user_with(api, username, credential).await
}
