//! API error responses.
//!
//! Only two kinds of failure ever reach a caller: request-shape validation
//! (400 with a machine-readable code) and total provider failure (502).
//! Everything below the merge boundary is recovered into partial results.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// An error surfaced to an HTTP caller.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request shape was invalid.
    #[error("{message}")]
    BadRequest {
        code: &'static str,
        message: String,
    },

    /// Every enumerated calendar failed to fetch.
    #[error("no calendars reachable: {0}")]
    UpstreamUnavailable(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_date(value: &str) -> Self {
        Self::BadRequest {
            code: "invalid_date",
            message: format!("expected YYYY-MM-DD, got {value:?}"),
        }
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: "invalid_range",
            message: message.into(),
        }
    }

    pub fn invalid_color(value: &str) -> Self {
        Self::BadRequest {
            code: "invalid_color",
            message: format!("expected a #rrggbb hex color, got {value:?}"),
        }
    }

    pub fn invalid_action(value: &str) -> Self {
        Self::BadRequest {
            code: "invalid_action",
            message: format!("expected \"add\" or \"remove\", got {value:?}"),
        }
    }

    pub fn missing_business_hours() -> Self {
        Self::BadRequest {
            code: "missing_business_hours",
            message: "no business hours are configured".to_string(),
        }
    }

    /// The machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. } => code,
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
