use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

pub const GENERATION_FAILED: &str = "Failed to generate a response";

// Taken from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
#[derive(Debug)]
pub struct VocabTutorError {
    pub status: StatusCode,
    pub message: HttpErrorResponse,
}

#[derive(Debug, Serialize)]
pub struct HttpErrorResponse {
    pub(crate) error: String,
}

impl From<String> for HttpErrorResponse {
    fn from(message: String) -> Self {
        HttpErrorResponse { error: message }
    }
}

impl From<&str> for HttpErrorResponse {
    fn from(message: &str) -> Self {
        HttpErrorResponse {
            error: message.to_string(),
        }
    }
}

impl IntoResponse for VocabTutorError {
    fn into_response(self) -> Response {
        let mut res = Json(self.message).into_response();
        *res.status_mut() = self.status;
        res
    }
}

/// Anything that bubbles up through `?` is an internal failure. The cause is
/// logged, the caller only sees a generic message.
impl<E> From<E> for VocabTutorError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        error!("Request failed: {:#}", err);
        VocabTutorError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: HttpErrorResponse::from(GENERATION_FAILED),
        }
    }
}

pub type VocabTutorResult<T, E = VocabTutorError> = Result<T, E>;

#[macro_export]
macro_rules! bail_http {
    ($error_message:expr) => {
        return Err($crate::error::VocabTutorError {
            status: ::axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            message: $crate::error::HttpErrorResponse::from($error_message),
        })
    };
    ($status_code:expr, $error_message:expr) => {
        return Err($crate::error::VocabTutorError {
            status: $status_code,
            message: $crate::error::HttpErrorResponse::from($error_message),
        })
    };
    ($status:expr, $fmt:expr $(, $arg:expr)*) => {
        return Err($crate::error::VocabTutorError {
            status: $status,
            message: $crate::error::HttpErrorResponse::from(format!($fmt $(, $arg)*)),
        })
    };
}

#[macro_export]
macro_rules! exit_err {
    ($code:expr, $($arg:tt)+) => {
        {
            ::tracing::error!($($arg)+);
            $crate::telemetry::shutdown_telemetry();
            std::process::exit($code);
        }
    };
}
