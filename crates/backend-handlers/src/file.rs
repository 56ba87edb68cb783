use async_trait::async_trait;
use restldap_domain::types::{DirectoryRecord, Group, User};
use restldap_domain_handlers::{
    error::{DomainError, Result},
    handler::{BackendHandler, ConfigurableBackend},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FileBackendConfig {
    /// JSON array of users.
    pub users_path: PathBuf,
    /// JSON array of groups.
    pub groups_path: PathBuf,
}

/// Reads the directory from two JSON files, and writes changes back to them.
#[derive(Clone, Debug)]
pub struct FileBackendHandler {
    config: FileBackendConfig,
    write_lock: Arc<Mutex<()>>,
}

impl FileBackendHandler {
    pub fn new(config: FileBackendConfig) -> Self {
        Self {
            config,
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

async fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    debug!(path = %path.display(), "Reading records");
    let contents = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&contents)?)
}

async fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let contents = serde_json::to_vec_pretty(records)?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}

/// Replaces, in the file, the first record equal to `old`.
async fn replace_in_file<T>(path: &Path, old: &T, new: &T, name: &str) -> Result<()>
where
    T: DeserializeOwned + Serialize + PartialEq + Clone,
{
    let mut records: Vec<T> = read_records(path).await?;
    let record = records
        .iter_mut()
        .find(|record| *record == old)
        .ok_or_else(|| DomainError::EntityNotFound(format!("{name} in {}", path.display())))?;
    *record = new.clone();
    write_records(path, &records).await
}

impl ConfigurableBackend for FileBackendHandler {
    fn read_config(raw: &[u8]) -> Result<Self> {
        let config = serde_json::from_slice(raw).map_err(|e| {
            DomainError::ConfigurationError(format!("invalid file backend settings: {e}"))
        })?;
        Ok(Self::new(config))
    }
}

#[async_trait]
impl BackendHandler for FileBackendHandler {
    #[instrument(skip_all, level = "debug")]
    async fn get_data(&self) -> Result<(Vec<User>, Vec<Group>)> {
        let users = read_records(&self.config.users_path).await?;
        let groups = read_records(&self.config.groups_path).await?;
        Ok((users, groups))
    }

    #[instrument(skip_all, level = "debug", fields(cn = %old.cn()))]
    async fn update_data(&self, old: &DirectoryRecord, new: &DirectoryRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match (old, new) {
            (DirectoryRecord::User(old), DirectoryRecord::User(new)) => {
                replace_in_file(&self.config.users_path, old, new, &old.cn).await
            }
            (DirectoryRecord::Group(old), DirectoryRecord::Group(new)) => {
                replace_in_file(&self.config.groups_path, old, new, &old.cn).await
            }
            _ => Err(DomainError::Unsupported(
                "a record cannot change its kind".to_string(),
            )),
        }
    }
}
