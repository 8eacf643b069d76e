use ulid::Ulid;

use crate::directory::DirectoryError;
use crate::lifecycle::UnknownStatus;
use crate::suite::UnmappedCategory;

use super::conflict::ConflictReport;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },

    #[error("conflict: {0}")]
    Conflict(ConflictReport),

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("tenant context missing or invalid: {0}")]
    TenantContext(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: Ulid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Protocol status a controller should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::TenantContext(_) | Self::LimitExceeded(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) | Self::AlreadyExists(_) => 409,
            Self::Directory(_) => 503,
            Self::WalError(_) => 500,
        }
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::AlreadyExists(_) => "already_exists",
            Self::TenantContext(_) => "tenant_context",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::Directory(_) => "directory",
            Self::WalError(_) => "storage",
        }
    }
}

impl From<UnmappedCategory> for EngineError {
    fn from(e: UnmappedCategory) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<UnknownStatus> for EngineError {
    fn from(e: UnknownStatus) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<DirectoryError> for EngineError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::NotFound { entity, id } => Self::NotFound { entity, id },
            DirectoryError::Unavailable(msg) => Self::Directory(msg),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::WalError(e.to_string())
    }
}
