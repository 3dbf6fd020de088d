use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

/// The only failures visible to the PVR. Everything else inside the proxy
/// degrades to an empty RSS feed.
#[derive(Debug)]
pub enum ApiError {
    InvalidApiKey,

    UnknownQueryType(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InvalidApiKey => write!(f, "Invalid API key"),
            ApiError::UnknownQueryType(t) => write!(f, "Unsupported query type: {}", t),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidApiKey => StatusCode::FORBIDDEN,
            ApiError::UnknownQueryType(_) => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}
