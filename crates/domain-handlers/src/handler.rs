use crate::error::Result;
use async_trait::async_trait;
use restldap_domain::types::{DirectoryRecord, Group, User};

/// A source of directory data. Exactly one is active, chosen at startup.
#[async_trait]
pub trait BackendHandler: Send + Sync {
    /// Fetches the complete user and group collections.
    async fn get_data(&self) -> Result<(Vec<User>, Vec<Group>)>;
    /// Persists a modification. `old` is the record as it was served, `new` is the
    /// record after the modification.
    async fn update_data(&self, old: &DirectoryRecord, new: &DirectoryRecord) -> Result<()>;
}

/// Backends built from their own section of the configuration.
pub trait ConfigurableBackend: Sized {
    /// `raw` holds the backend's settings, serialized as JSON.
    fn read_config(raw: &[u8]) -> Result<Self>;
}

/// Control interface of the refresh task.
pub trait RefreshHandler: Send + Sync {
    /// Asks for a refresh as soon as possible, without waiting for it.
    fn refresh_now(&self);
}
