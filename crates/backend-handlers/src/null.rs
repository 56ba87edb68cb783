use async_trait::async_trait;
use restldap_domain::types::{DirectoryRecord, Group, User};
use restldap_domain_handlers::{
    error::{DomainError, Result},
    handler::{BackendHandler, ConfigurableBackend},
};

/// A backend without data, for trying things out.
#[derive(Clone, Debug, Default)]
pub struct NullBackendHandler;

impl ConfigurableBackend for NullBackendHandler {
    fn read_config(_raw: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

#[async_trait]
impl BackendHandler for NullBackendHandler {
    async fn get_data(&self) -> Result<(Vec<User>, Vec<Group>)> {
        Ok((Vec::new(), Vec::new()))
    }

    async fn update_data(&self, _old: &DirectoryRecord, _new: &DirectoryRecord) -> Result<()> {
        Err(DomainError::Unsupported(
            "updating data is not supported by this backend".to_string(),
        ))
    }
}
