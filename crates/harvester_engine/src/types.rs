use std::fmt;

use thiserror::Error;

use crate::scope::ScopeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    /// 401 or 403.
    Unauthorized(u16),
    Timeout,
    Network,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::InvalidUrl | FailureKind::Unauthorized(_))
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Unauthorized(code) => write!(f, "not authorised (http status {code})"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Failures surfaced at the engine boundary.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("request to {url} failed after {attempts} attempts: {message}")]
    Transport {
        url: String,
        attempts: u32,
        message: String,
    },
    #[error("request to {url} was refused with status {status}")]
    Auth { url: String, status: u16 },
    #[error("protocol invariant violated: {0}")]
    ProtocolInvariant(String),
    #[error("state corruption: {0}")]
    StateCorruption(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("translation failed: {0}")]
    Translation(String),
}

impl From<ScopeError> for HarvestError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::Sink(_) => HarvestError::Storage(err.to_string()),
            other => HarvestError::ProtocolInvariant(other.to_string()),
        }
    }
}

impl From<crate::validated_url::UrlError> for HarvestError {
    fn from(err: crate::validated_url::UrlError) -> Self {
        HarvestError::ProtocolInvariant(err.to_string())
    }
}

impl From<crate::persist::PersistError> for HarvestError {
    fn from(err: crate::persist::PersistError) -> Self {
        HarvestError::Storage(err.to_string())
    }
}

impl From<crate::store::StoreError> for HarvestError {
    fn from(err: crate::store::StoreError) -> Self {
        HarvestError::Storage(err.to_string())
    }
}

impl From<crate::graph::GraphError> for HarvestError {
    fn from(err: crate::graph::GraphError) -> Self {
        HarvestError::Storage(err.to_string())
    }
}

impl From<crate::fragment::FragmentError> for HarvestError {
    fn from(err: crate::fragment::FragmentError) -> Self {
        match err {
            crate::fragment::FragmentError::DuplicateOrderKey(name) => {
                HarvestError::ProtocolInvariant(format!("duplicate fragment ordering key: {name}"))
            }
            other => HarvestError::Storage(other.to_string()),
        }
    }
}

impl From<crate::translate::TranslateError> for HarvestError {
    fn from(err: crate::translate::TranslateError) -> Self {
        HarvestError::Translation(err.to_string())
    }
}

impl From<crate::ledger::LedgerError> for HarvestError {
    fn from(err: crate::ledger::LedgerError) -> Self {
        HarvestError::StateCorruption(err.to_string())
    }
}
