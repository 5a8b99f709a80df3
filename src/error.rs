use crate::normalize::{CONNECTIVITY_MESSAGE, NormalizedApiError, UNEXPECTED_ERROR};
use crate::validation::ValidationErrorSet;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The backend rejected the bearer token (HTTP 401).
    #[error("Authentication failed")]
    Unauthorized,

    /// No session to attach to the request.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The backend refused the request; already normalized.
    #[error("{0}")]
    Api(NormalizedApiError),

    /// The backend could not be reached. Raw transport errors are only logged.
    #[error("{}", CONNECTIVITY_MESSAGE)]
    Connectivity,

    /// Rejected locally before anything was sent.
    #[error("{0}")]
    Validation(ValidationErrorSet),

    #[error("Invalid CPF: {0}")]
    InvalidCpf(String),

    #[cfg(feature = "client")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this failure calls for a token refresh.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity)
    }

    /// Folds any failure into the one shape the UI consumes.
    ///
    /// Transport, decoding, storage and configuration details stay in the
    /// logs; the UI gets [`UNEXPECTED_ERROR`] for those.
    #[must_use]
    pub fn to_normalized(&self) -> NormalizedApiError {
        match self {
            Self::Api(err) => err.clone(),
            Self::Validation(fields) => NormalizedApiError::from_fields(fields.clone(), None),
            Self::InvalidCpf(_) => {
                NormalizedApiError::from_field("cpf", crate::validation::CPF_INVALID)
            }
            Self::Unauthorized | Self::NotAuthenticated | Self::Connectivity => {
                NormalizedApiError::from_global(self.to_string())
            }
            #[cfg(feature = "client")]
            Self::Http(_) => NormalizedApiError::from_global(UNEXPECTED_ERROR),
            Self::Decode(_) | Self::Storage(_) | Self::Config(_) => {
                NormalizedApiError::from_global(UNEXPECTED_ERROR)
            }
        }
    }
}
