//! Error-to-HTTP mapping. Errors surface as a structured `ApiError` JSON
//! body, via a small `RouteResult` alias plus extension traits for turning
//! `Option`/`Result` into that alias.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use transpipe_core::Error;

pub type RouteResult<T> = Result<T, ApiError>;

/// JSON error body returned for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    recoverable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    can_continue: Option<bool>,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, error: message.into(), recoverable: None, can_continue: None }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Maps the core error taxonomy onto HTTP statuses. A `ProviderRecoverable`
/// error reports HTTP 503 with `{recoverable: true, can_continue: true}`
///, since the material itself falls back to its prior step rather
/// than failing outright.
impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(_) | Error::PdfInvalidPage { .. } => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            Error::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            Error::Conflict(_) | Error::VersionConflict { .. } => Self::new(StatusCode::CONFLICT, err.to_string()),
            Error::ProviderRecoverable(_) => {
                let mut e = Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string());
                e.recoverable = Some(true);
                e.can_continue = Some(true);
                e
            }
            Error::ProviderRateLimited { .. } => Self::new(StatusCode::TOO_MANY_REQUESTS, err.to_string()),
            Error::StageTimeout(_) => Self::new(StatusCode::GATEWAY_TIMEOUT, err.to_string()),
            Error::ProviderFatal(_)
            | Error::PdfOpen(_)
            | Error::PdfRender { .. }
            | Error::Lopdf(_)
            | Error::Image(_)
            | Error::Store(_)
            | Error::Export(_)
            | Error::ConfigLoad(_)
            | Error::ConfigInvalid { .. }
            | Error::Io(_)
            | Error::Serialize(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> RouteResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> RouteResult<T> {
        self.ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, message))
    }
}

pub trait ResultExt<T> {
    fn or_internal_error(self) -> RouteResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn or_internal_error(self) -> RouteResult<T> {
        self.map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }
}
