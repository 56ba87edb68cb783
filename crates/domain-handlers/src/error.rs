use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("I/O error: `{0}`")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: `{0}`")]
    JsonError(#[from] serde_json::Error),
    #[error("HTTP error: `{0}`")]
    HttpError(String),
    #[error("Unexpected HTTP status {status} from `{url}`")]
    HttpStatusError { status: u16, url: String },
    #[error("Configuration error: `{0}`")]
    ConfigurationError(String),
    #[error("Entity not found: `{0}`")]
    EntityNotFound(String),
    #[error("{0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
