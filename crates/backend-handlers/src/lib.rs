#![forbid(unsafe_code)]
#![forbid(non_ascii_idents)]

pub mod file;
pub mod null;
pub mod rest;

#[cfg(test)]
pub(crate) mod logging;

use async_trait::async_trait;
use restldap_domain::types::{DirectoryRecord, Group, User};
use restldap_domain_handlers::{
    error::{DomainError, Result},
    handler::{BackendHandler, ConfigurableBackend},
};
use serde::{Deserialize, Serialize};

pub use file::FileBackendHandler;
pub use null::NullBackendHandler;
pub use rest::RestBackendHandler;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    File,
    Rest,
    #[default]
    Null,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendKind::File => "file",
            BackendKind::Rest => "rest",
            BackendKind::Null => "null",
        })
    }
}

impl std::str::FromStr for BackendKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(BackendKind::File),
            "rest" => Ok(BackendKind::Rest),
            "null" => Ok(BackendKind::Null),
            _ => Err(DomainError::ConfigurationError(format!(
                "unknown backend `{s}`, expected one of file, rest, null"
            ))),
        }
    }
}

/// The backend selected at startup.
#[derive(Clone, Debug)]
pub enum ConfiguredBackend {
    File(FileBackendHandler),
    Rest(RestBackendHandler),
    Null(NullBackendHandler),
}

impl ConfiguredBackend {
    /// `raw` holds the settings of the chosen backend, serialized as JSON.
    pub fn open(kind: BackendKind, raw: &[u8]) -> Result<Self> {
        Ok(match kind {
            BackendKind::File => ConfiguredBackend::File(FileBackendHandler::read_config(raw)?),
            BackendKind::Rest => ConfiguredBackend::Rest(RestBackendHandler::read_config(raw)?),
            BackendKind::Null => ConfiguredBackend::Null(NullBackendHandler::read_config(raw)?),
        })
    }

    fn inner(&self) -> &dyn BackendHandler {
        match self {
            ConfiguredBackend::File(backend) => backend,
            ConfiguredBackend::Rest(backend) => backend,
            ConfiguredBackend::Null(backend) => backend,
        }
    }
}

#[async_trait]
impl BackendHandler for ConfiguredBackend {
    async fn get_data(&self) -> Result<(Vec<User>, Vec<Group>)> {
        self.inner().get_data().await
    }

    async fn update_data(&self, old: &DirectoryRecord, new: &DirectoryRecord) -> Result<()> {
        self.inner().update_data(old, new).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("REST".parse::<BackendKind>().unwrap(), BackendKind::Rest);
        assert_eq!("file".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert!("ldap".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::default().to_string(), "null");
    }

    #[test]
    fn test_open() {
        assert!(matches!(
            ConfiguredBackend::open(BackendKind::Null, b"{}").unwrap(),
            ConfiguredBackend::Null(_)
        ));
        assert!(matches!(
            ConfiguredBackend::open(BackendKind::Rest, br#"{"url": "http://localhost"}"#).unwrap(),
            ConfiguredBackend::Rest(_)
        ));
        assert!(matches!(
            ConfiguredBackend::open(BackendKind::File, b"{}").unwrap_err(),
            DomainError::ConfigurationError(_)
        ));
    }

    #[tokio::test]
    async fn test_delegates_to_inner_backend() {
        let backend = ConfiguredBackend::open(BackendKind::Null, b"{}").unwrap();
        assert_eq!(backend.get_data().await.unwrap(), (vec![], vec![]));
    }
}
