//! HTTP 错误映射

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use icu_core::IcuError;
use serde_json::json;

/// 处理器返回的错误，将领域错误映射为 HTTP 状态码
#[derive(Debug)]
pub struct ApiError(pub IcuError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            IcuError::NotFound(_) => StatusCode::NOT_FOUND,
            IcuError::Validation(_) => StatusCode::BAD_REQUEST,
            IcuError::Permission(_) => StatusCode::FORBIDDEN,
            IcuError::Conflict(_) | IcuError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IcuError> for ApiError {
    fn from(err: IcuError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }

        let body = Json(json!({
            "error": true,
            "message": self.0.to_string(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}
