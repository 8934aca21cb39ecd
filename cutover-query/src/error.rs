/// Why a page token could not be turned back into a position.
///
/// Tokens come from callers, so every variant is an input error rather than
/// a store failure.
///
/// ```rust
/// use cutover_query::QueryError;
///
/// fn is_corrupt(error: &QueryError) -> bool {
///     !matches!(error, QueryError::MissingField(_))
/// }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// The token holds fewer values than the node has keys.
    #[error("page token lacks `{0}`")]
    MissingField(String),

    #[error("page token is not base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("page token is not utf8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("page token timestamp: {0}")]
    Timestamp(#[from] harsh::Error),

    #[error("page token field `{field}` has invalid value `{value}`")]
    InvalidField { field: String, value: String },
}
