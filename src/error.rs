use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::session::StoreError;
use crate::templates::{render_access_denied, render_error_page};

/// Message shown to authenticated users outside the required group
pub const ACCESS_DENIED_MESSAGE: &str =
    "Your account is not a member of the group required to use this application.";

/// How an error should be rendered for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Html,
}

impl ResponseFormat {
    /// API-style callers get JSON, browsers get HTML pages and redirects.
    pub fn from_request(headers: &HeaderMap, path: &str) -> Self {
        let wants_json = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("application/json"));
        let is_xhr = headers
            .get("x-requested-with")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));

        if wants_json || is_xhr || path.starts_with("/proxy/") || path.starts_with("/api/") {
            Self::Json
        } else {
            Self::Html
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Access denied")]
    Forbidden { user: Option<String> },

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn respond_as(self, format: ResponseFormat) -> AppErrorResponse {
        AppErrorResponse {
            error: self,
            format,
        }
    }
}

/// An `AppError` paired with the format the caller expects.
#[derive(Debug)]
pub struct AppErrorResponse {
    pub error: AppError,
    pub format: ResponseFormat,
}

impl IntoResponse for AppErrorResponse {
    fn into_response(self) -> Response {
        let status = match &self.error {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::Store(e) => {
                tracing::error!(error = %e, "Session store failure");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        match self.format {
            ResponseFormat::Json => {
                let body = match &self.error {
                    AppError::Unauthenticated => json!({ "error": "Not authenticated" }),
                    AppError::Forbidden { .. } => json!({
                        "error": "Access denied",
                        "message": ACCESS_DENIED_MESSAGE,
                    }),
                    AppError::Store(_) => json!({ "error": "Session store unavailable" }),
                };
                (status, Json(body)).into_response()
            }
            ResponseFormat::Html => {
                let page = match &self.error {
                    AppError::Unauthenticated => render_error_page(
                        "Sign-in required",
                        "You need to sign in to continue.",
                        Some("/auth/login"),
                    ),
                    AppError::Forbidden { user } => {
                        render_access_denied(user.as_deref(), ACCESS_DENIED_MESSAGE)
                    }
                    AppError::Store(_) => render_error_page(
                        "Service unavailable",
                        "Sessions are temporarily unavailable. Please try again shortly.",
                        None,
                    ),
                };
                (status, Html(page)).into_response()
            }
        }
    }
}
