//! Failure taxonomy of the authorization pipeline
//!
//! Each failure is classified once, where it is detected, and carried to the
//! response boundary unchanged.

use crate::config::ConfigError;
use crate::status::{Code, Status};
use crate::system::FetchError;
use thiserror::Error;

pub(crate) const FETCH_FAILED: &str = "currently unable to fetch required data from system";
pub(crate) const BACKEND_FAILED: &str = "error calling backend";

#[derive(Error, Debug)]
pub enum AuthzError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("error. No Service ID provided")]
    MissingServiceId,

    #[error("error building HTTP client for system")]
    InvalidSystemUrl,

    #[error("currently unable to fetch required data from system: {0}")]
    Fetch(#[from] FetchError),

    #[error("error creating backend client")]
    InvalidBackendUrl,

    #[error("missing request path")]
    MissingPath,

    #[error("no auth credentials provided or provided in invalid location")]
    Unauthenticated,

    #[error("no matching mapping rule for request with method {method} and path {path}")]
    NoMatchingRule { method: String, path: String },

    #[error("{0}")]
    Denied(String),

    #[error("error calling backend: {0}")]
    Backend(String),

    #[error("request cancelled")]
    Cancelled,
}

impl AuthzError {
    /// Status code this failure is reported with
    pub fn code(&self) -> Code {
        match self {
            AuthzError::Config(_) => Code::Internal,
            AuthzError::MissingServiceId
            | AuthzError::InvalidSystemUrl
            | AuthzError::InvalidBackendUrl
            | AuthzError::MissingPath => Code::InvalidArgument,
            AuthzError::Fetch(FetchError::Malformed(_)) => Code::Internal,
            AuthzError::Fetch(_) | AuthzError::Cancelled => Code::Unavailable,
            // Missing credentials surface as a denial, not a distinct auth error.
            AuthzError::Unauthenticated
            | AuthzError::NoMatchingRule { .. }
            | AuthzError::Denied(_) => Code::PermissionDenied,
            AuthzError::Backend(_) => Code::Unknown,
        }
    }

    /// Message safe to return to the caller
    ///
    /// Remote failures collapse to a fixed sentence so fetch URLs and backend
    /// credentials never reach the response.
    pub fn public_message(&self) -> String {
        match self {
            AuthzError::Fetch(_) => FETCH_FAILED.to_string(),
            AuthzError::Backend(_) => BACKEND_FAILED.to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_status(&self) -> Status {
        Status::new(self.code(), self.public_message())
    }
}
