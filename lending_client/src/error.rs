use serde::Deserialize;

/// Errors surfaced by the HTTP layer. Validation failures never reach this
/// type; they are rejected before a request is built.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("request failed ({status}): {message}")]
    RequestFailed { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest_middleware::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.into())
    }
}

/// Backends report failures as `{"message": ...}` or `{"error": ...}`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Turns a non-2xx response into an [`ApiError`], extracting the
/// backend-provided message when one is present.
pub async fn error_from_response(response: reqwest::Response) -> ApiError {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return ApiError::Unauthorized;
    }
    let body: ErrorBody = response.json().await.unwrap_or_default();
    let message = body
        .message
        .or(body.error)
        .unwrap_or_else(|| "request failed with no error details".to_string());
    tracing::debug!("Request failed with status {}: {}", status, message);
    ApiError::RequestFailed {
        status: status.as_u16(),
        message,
    }
}
