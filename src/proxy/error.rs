use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors raised while proxying to the identity service.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Upstream success body is not JSON; recoverable, the body is still forwarded.
    #[error("Upstream body is not JSON: {0}")]
    UpstreamBodyNotJson(#[from] serde_json::Error),

    /// Upstream answered with an error status other than 404.
    #[error("Unexpected upstream status {0}")]
    UnexpectedUpstream(StatusCode),

    /// Sealed-session or cookie failure.
    #[error(transparent)]
    Session(#[from] crate::error::Error),

    /// Could not reach the identity service or read its response.
    #[error("Upstream transport error: {0}")]
    Transport(String),

    /// Catch-all for a response that could not be rewritten.
    #[error("Proxy failure: {0}")]
    Failure(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<axum::http::Error> for ProxyError {
    fn from(e: axum::http::Error) -> Self {
        Self::Failure(e.to_string())
    }
}

#[cfg(feature = "upstream")]
impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            Self::Session(_) => (StatusCode::UNAUTHORIZED, "Not authenticated").into_response(),
            Self::Transport(_) => {
                tracing::error!(error = %self, "Identity service unreachable");
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            }
            Self::UpstreamBodyNotJson(_)
            | Self::UnexpectedUpstream(_)
            | Self::Failure(_)
            | Self::Config(_) => {
                tracing::error!(error = %self, "Proxy internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ProxyError::Session(crate::Error::ExpiredSession),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ProxyError::Transport("refused".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ProxyError::Failure("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
