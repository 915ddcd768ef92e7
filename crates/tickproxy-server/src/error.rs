use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tickproxy_core::{CoreError, ValidationError};

use crate::auth::AuthError;

pub const AUTH_CHALLENGE: &str = r#"Basic realm="tickproxy""#;

/// Client-visible failures of the proxy pipeline.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("not authenticated")]
    AuthenticationRequired,

    #[error("invalid credentials")]
    AuthenticationInvalid,

    #[error("too many requests; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("failed to fetch data for {symbol}: {detail}")]
    UpstreamUnavailable { symbol: String, detail: String },

    #[error("no data available for {symbol}")]
    NoDataAvailable { symbol: String },

    #[error(transparent)]
    InvalidRequest(#[from] ValidationError),

    #[error("malformed query string: {0}")]
    MalformedQuery(String),

    #[error("storage unavailable")]
    Storage(#[from] StoreError),

    #[error("failed to encode response")]
    Encode(#[from] CoreError),
}

impl ProxyError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::AuthenticationRequired | Self::AuthenticationInvalid => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::NoDataAvailable { .. } => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::MalformedQuery(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) | Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "authentication_required",
            Self::AuthenticationInvalid => "invalid_credentials",
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::NoDataAvailable { .. } => "no_data",
            Self::InvalidRequest(_) | Self::MalformedQuery(_) => "invalid_request",
            Self::Storage(_) => "storage_error",
            Self::Encode(_) => "internal_error",
        }
    }
}

impl From<AuthError> for ProxyError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Required => Self::AuthenticationRequired,
            AuthError::Invalid => Self::AuthenticationInvalid,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match &self {
            Self::Storage(source) => tracing::error!(error = %source, "storage failure while serving request"),
            Self::Encode(source) => tracing::error!(error = %source, "failed to encode response body"),
            _ => {}
        }

        let status = self.status();
        let body = ErrorBody {
            error: self.code(),
            detail: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();

        match &self {
            // Both 401 paths carry the challenge so clients can re-prompt.
            Self::AuthenticationRequired | Self::AuthenticationInvalid => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(AUTH_CHALLENGE),
                );
            }
            Self::RateLimited { retry_after_secs } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            _ => {}
        }

        response
    }
}

/// Cache and snapshot storage failures. Never surfaced from the download path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write cache entry {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Encode(#[from] CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("storage task aborted: {0}")]
    TaskAborted(String),
}

/// Startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{present} is set but {missing} is not; set both or neither")]
    PartialCredentials {
        present: &'static str,
        missing: &'static str,
    },

    #[error("invalid bind address `{value}`")]
    InvalidBind { value: String },
}
