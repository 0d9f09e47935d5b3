use reqwest::StatusCode;

/// Represents the possible errors raised while running a text-to-3D node.
#[derive(Debug, thiserror::Error)]
pub enum TextTo3DError {
    /// The configured model mode is neither `chat` nor `completion`.
    #[error("Model mode {0} not support.")]
    InvalidModelMode(String),
    /// The node configuration is missing a required field or carries an invalid value.
    #[error("Invalid node configuration `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error("API token is missing. Please configure it or set the TEXT_TO_3D_API_TOKEN environment variable.")]
    MissingApiToken,
    /// The model runtime failed while building prompts, counting tokens or generating text.
    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),
    #[error("Network request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Failed to parse JSON: {0}")]
    ResponseParseFailed(#[from] serde_json::Error),
    /// The 3D generation service answered with a non-success status code.
    #[error("3D generation request failed with status {status}: {message}")]
    ApiError { status: StatusCode, message: String },
    #[error("URL parsing failed: {0}")]
    UrlParseFailed(#[from] url::ParseError),
}

impl TextTo3DError {
    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, connection failures, `429 Too Many Requests` and `5xx` responses are transient.
    /// Everything else, including every configuration and model error, is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(e) => e.is_timeout() || e.is_connect(),
            Self::ApiError { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}
