use thiserror::Error;

/// CORS configuration error
///
/// Returned by `CorsMiddlewareBuilder::build()` when the configuration
/// is invalid or violates CORS requirements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorsConfigError {
    /// Wildcard origin (`*`) cannot be used with credentials
    #[error(
        "CORS configuration error: cannot use wildcard origin (*) with credentials; \
         list exact origins instead"
    )]
    WildcardWithCredentials,
    /// The origin is not of the form `scheme://host[:port]`
    #[error(
        "CORS configuration error: invalid origin format '{origin}', \
         expected scheme://host[:port] (e.g. https://example.com)"
    )]
    InvalidOriginFormat {
        /// The invalid origin string
        origin: String,
    },
    /// A regex origin pattern failed to compile
    #[error("CORS configuration error: invalid origin pattern '{pattern}': {reason}")]
    InvalidOriginPattern { pattern: String, reason: String },
    /// Credentials were enabled without any origin to grant them to
    #[error(
        "CORS configuration error: cannot use credentials with an empty origins list"
    )]
    EmptyOriginsWithCredentials,
}
