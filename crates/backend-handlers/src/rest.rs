use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, StatusCode};
use restldap_domain::types::{DirectoryRecord, Group, User};
use restldap_domain_handlers::{
    error::{DomainError, Result},
    handler::{BackendHandler, ConfigurableBackend},
};
use secstr::SecUtf8;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, instrument};

fn default_users_path() -> String {
    "/users".to_string()
}

fn default_groups_path() -> String {
    "/groups".to_string()
}

fn default_auth_token() -> SecUtf8 {
    SecUtf8::from("")
}

fn default_http_request_timeout_seconds() -> u64 {
    10
}

#[derive(Clone, Debug, Deserialize)]
pub struct RestBackendConfig {
    /// Base url, without a trailing slash.
    pub url: String,
    #[serde(default = "default_auth_token")]
    pub auth_token: SecUtf8,
    #[serde(default = "default_users_path")]
    pub users_path: String,
    #[serde(default = "default_groups_path")]
    pub groups_path: String,
    #[serde(default = "default_http_request_timeout_seconds")]
    pub http_request_timeout_seconds: u64,
}

/// Talks to a REST API serving the users and groups as JSON arrays.
#[derive(Clone, Debug)]
pub struct RestBackendHandler {
    config: RestBackendConfig,
    client: reqwest::Client,
}

fn http_error(e: reqwest::Error) -> DomainError {
    DomainError::HttpError(e.to_string())
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    if response.status() == StatusCode::OK {
        Ok(response)
    } else {
        Err(DomainError::HttpStatusError {
            status: response.status().as_u16(),
            url: url.to_string(),
        })
    }
}

/// The fields of `new` whose JSON value differs from the one in `old`.
pub(crate) fn changed_fields<T: Serialize>(old: &T, new: &T) -> Result<Map<String, Value>> {
    let (Value::Object(old), Value::Object(new)) =
        (serde_json::to_value(old)?, serde_json::to_value(new)?)
    else {
        return Err(DomainError::Unsupported(
            "only JSON objects can be compared".to_string(),
        ));
    };
    Ok(new
        .into_iter()
        .filter(|(name, value)| old.get(name) != Some(value))
        .collect())
}

impl RestBackendHandler {
    pub fn new(config: RestBackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_request_timeout_seconds))
            .build()
            .map_err(http_error)?;
        Ok(Self { config, client })
    }

    fn authorization(&self) -> String {
        format!("Token {}", self.config.auth_token.unsecure())
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = format!("{}{}", self.config.url, path);
        debug!("Requesting {url}");
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(http_error)?;
        check_status(response, &url)?
            .json()
            .await
            .map_err(http_error)
    }

    async fn push(&self, path: &str, cn: &str, changes: Map<String, Value>) -> Result<()> {
        let url = format!("{}{}/{}", self.config.url, path, cn);
        debug!(fields = ?changes.keys().collect::<Vec<_>>(), "Updating {url}");
        let response = self
            .client
            .put(&url)
            .header(AUTHORIZATION, self.authorization())
            .json(&changes)
            .send()
            .await
            .map_err(http_error)?;
        check_status(response, &url).map(|_| ())
    }
}

impl ConfigurableBackend for RestBackendHandler {
    fn read_config(raw: &[u8]) -> Result<Self> {
        let config = serde_json::from_slice(raw).map_err(|e| {
            DomainError::ConfigurationError(format!("invalid rest backend settings: {e}"))
        })?;
        Self::new(config)
    }
}

#[async_trait]
impl BackendHandler for RestBackendHandler {
    #[instrument(skip_all, level = "debug")]
    async fn get_data(&self) -> Result<(Vec<User>, Vec<Group>)> {
        let users = self.fetch(&self.config.users_path).await?;
        let groups = self.fetch(&self.config.groups_path).await?;
        Ok((users, groups))
    }

    #[instrument(skip_all, level = "debug", fields(cn = %old.cn()))]
    async fn update_data(&self, old: &DirectoryRecord, new: &DirectoryRecord) -> Result<()> {
        match (old, new) {
            (DirectoryRecord::User(old), DirectoryRecord::User(new)) => {
                self.push(&self.config.users_path, &old.cn, changed_fields(old, new)?)
                    .await
            }
            (DirectoryRecord::Group(old), DirectoryRecord::Group(new)) => {
                self.push(&self.config.groups_path, &old.cn, changed_fields(old, new)?)
                    .await
            }
            _ => Err(DomainError::Unsupported(
                "a record cannot change its kind".to_string(),
            )),
        }
    }
}
