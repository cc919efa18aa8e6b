use std::time::Duration;

use thiserror::Error;

use crate::models::ApiErrorBody;

/// Failure of a single request attempt, before retries are applied.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("SensorPush returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("failed to deserialize SensorPush response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// The `message` field of a JSON error body, if the failure carried one.
    ///
    /// Bodies that are not JSON, or JSON without a string `message`, yield `None`.
    pub fn message(&self) -> Option<String> {
        match self {
            TransportError::Status { body, .. } => serde_json::from_str::<ApiErrorBody>(body)
                .ok()
                .and_then(|b| b.message),
            _ => None,
        }
    }
}

/// Error surfaced to callers once the retry budget is spent.
#[derive(Debug, Error)]
pub enum Error {
    /// Signing in failed; the credentials may be wrong.
    #[error("SensorPush authentication failed: {message}")]
    Authentication {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    /// Any other API call failed.
    #[error("SensorPush API call failed: {message}")]
    Api {
        message: String,
        #[source]
        source: Option<TransportError>,
    },
}

impl Error {
    pub(crate) fn authentication(source: TransportError) -> Self {
        Error::Authentication {
            message: source.message().unwrap_or_else(|| source.to_string()),
            source: Some(source),
        }
    }

    pub(crate) fn api(source: TransportError) -> Self {
        Error::Api {
            message: source.message().unwrap_or_else(|| source.to_string()),
            source: Some(source),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Authentication { message, .. } | Error::Api { message, .. } => message,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
