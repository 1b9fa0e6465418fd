use auditor_core::error::AuditorError;
use auditor_core::session::SessionError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    Auditor(AuditorError),
    BadRequest(String),
    /// The completion endpoint is not configured.
    Unavailable(&'static str),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_output: Option<String>,
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<AuditorError> for ApiError {
    fn from(err: AuditorError) -> Self {
        Self::Auditor(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Session(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Auditor(err) => match err {
                AuditorError::Input(_) => StatusCode::BAD_REQUEST,
                AuditorError::Extraction(_)
                | AuditorError::Format { .. }
                | AuditorError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                AuditorError::Completion(_) => StatusCode::BAD_GATEWAY,
                AuditorError::Prompt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Session(err) => ErrorBody {
                error: err.to_string(),
                raw_output: None,
            },
            Self::Auditor(err) => ErrorBody {
                error: err.user_message(),
                raw_output: err.raw_output().map(str::to_string),
            },
            Self::BadRequest(msg) => ErrorBody {
                error: msg.clone(),
                raw_output: None,
            },
            Self::Unavailable(msg) => ErrorBody {
                error: (*msg).to_string(),
                raw_output: None,
            },
        };

        if status.is_server_error() {
            let err = anyhow::anyhow!("{}", body.error);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%status, error = %body.error, "request failed");
        } else {
            tracing::warn!(%status, error = %body.error, "request rejected");
        }

        (status, Json(body)).into_response()
    }
}
