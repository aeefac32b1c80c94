use serde::Serialize;
use thiserror::Error;

/// Result type returned by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error is returned when a feature could not be evaluated, and carries enough detail to tell
/// "not configured" apart from "configured off".
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// The feature name did not match any definition known to the provider.
    #[error("feature '{feature}' was not found")]
    MissingFeature { feature: String },

    /// A feature definition references a filter alias with no registered implementation.
    #[error("feature '{feature}' references the unregistered feature filter '{filter}'")]
    MissingFeatureFilter { feature: String, filter: String },

    /// A filter could not interpret the parameters configured for it.
    #[error("invalid parameters for filter '{filter}' on feature '{feature}': {reason}")]
    InvalidFilterConfiguration {
        feature: String,
        filter: String,
        reason: String,
    },

    /// The caller broke a contract of the evaluation API, e.g. an empty feature name.
    #[error("invalid argument: {0}")]
    ArgumentValidation(String),

    /// The evaluation was cancelled before it could complete.
    #[error("evaluation was cancelled")]
    Cancelled,

    /// Two filters were registered under the same alias.
    #[error("a feature filter is already registered under the alias '{0}'")]
    DuplicateFeatureFilter(String),

    /// The provider or one of its backing stores failed.
    #[error("feature definition provider failed: {0}")]
    Provider(String),
}

impl Error {
    /// Returns the [ErrorKind] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingFeature { .. } => ErrorKind::MissingFeature,
            Error::MissingFeatureFilter { .. } => ErrorKind::MissingFeatureFilter,
            Error::InvalidFilterConfiguration { .. } => ErrorKind::InvalidFilterConfiguration,
            Error::ArgumentValidation(_) => ErrorKind::ArgumentValidation,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::DuplicateFeatureFilter(_) => ErrorKind::DuplicateFeatureFilter,
            Error::Provider(_) => ErrorKind::Provider,
        }
    }

    pub(crate) fn invalid_configuration(
        feature: &str,
        filter: &str,
        reason: impl ToString,
    ) -> Self {
        Error::InvalidFilterConfiguration {
            feature: feature.to_string(),
            filter: filter.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// ErrorKind classifies an [Error] without its details.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// See [Error::MissingFeature].
    MissingFeature,
    /// See [Error::MissingFeatureFilter].
    MissingFeatureFilter,
    /// See [Error::InvalidFilterConfiguration].
    InvalidFilterConfiguration,
    /// See [Error::ArgumentValidation].
    ArgumentValidation,
    /// See [Error::Cancelled].
    Cancelled,
    /// See [Error::DuplicateFeatureFilter].
    DuplicateFeatureFilter,
    /// See [Error::Provider].
    Provider,
}
