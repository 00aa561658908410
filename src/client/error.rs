//! Error types for the AVH control-plane client.

use thiserror::Error;

/// Errors raised by control-plane calls.
///
/// Every client method performs exactly one remote call and surfaces its
/// failure immediately; retry policy belongs to the lifecycle controller.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// Raised when the API rejects the supplied token.
    #[error("authentication rejected by the control plane: {message}")]
    Auth {
        /// Message returned by the login endpoint.
        message: String,
    },
    /// Raised when the referenced resource no longer exists.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Resource kind (for example `instance`).
        resource: String,
        /// Identifier used for the lookup.
        id: String,
    },
    /// Raised when the API returns a non-success status other than 404.
    #[error("control plane returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        message: String,
    },
    /// Raised when the HTTP transport fails before a response arrives.
    #[error("transport failure talking to {endpoint}: {message}")]
    Transport {
        /// Endpoint the request targeted.
        endpoint: String,
        /// Underlying transport error message.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode {what} response: {message}")]
    Decode {
        /// Operation whose response failed to parse.
        what: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when the account has no project to scope instances to.
    #[error("no projects visible to this token")]
    NoProject,
    /// Raised when a local file destined for upload cannot be read.
    #[error("cannot read upload source {path}: {message}")]
    UploadSource {
        /// Local path that could not be read.
        path: String,
        /// Underlying I/O error message.
        message: String,
    },
}

impl ClientError {
    /// Returns `true` when the error indicates the resource is gone.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn not_found(resource: &str, id: &str) -> Self {
        Self::NotFound {
            resource: resource.to_owned(),
            id: id.to_owned(),
        }
    }

    pub(crate) fn transport(endpoint: &str, err: &reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.to_owned(),
            message: err.to_string(),
        }
    }
}
