use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::MatchError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self { status, error: error.into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, format!("{:#}", self.error)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        // 查询本身的问题返回 400，其余视为服务端错误
        let status = match error.downcast_ref::<MatchError>() {
            Some(e) if e.is_query_error() => StatusCode::BAD_REQUEST,
            Some(MatchError::EmptyGallery) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}
