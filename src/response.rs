use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::error::Error;

/// JSON envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Paging details attached to list responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub page: u64,
    pub pages: u64,
}

impl PageMeta {
    pub fn new(total: u64, page: u64, limit: u64) -> Self {
        Self {
            total,
            offset: page.saturating_sub(1) * limit,
            limit,
            page,
            pages: total.div_ceil(limit.max(1)),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
        }
    }

    pub fn paged(data: T, meta: PageMeta) -> Self {
        Self {
            meta: Some(meta),
            ..Self::ok(data)
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Unauthorized | Error::InvalidToken | Error::InvalidPassword => {
                StatusCode::UNAUTHORIZED
            }
            Error::Cancelled(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Storage { .. } | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, details = ?self.details(), "request failed");
        }
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: self.code(),
                message: self.to_string(),
                details: self.details(),
            }),
            meta: None,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: Error) -> (StatusCode, serde_json::Value) {
        let res = err.into_response();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn every_kind_has_a_stable_status() {
        assert_eq!(Error::NotFound("user").status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::AlreadyExists("user").status(), StatusCode::CONFLICT);
        assert_eq!(Error::validation("name", "x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::Forbidden("no".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(Error::InvalidPassword.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::Cancelled("login").status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            Error::storage("failed", "boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn storage_detail_rides_along_without_replacing_the_code() {
        let (status, json) =
            body_of(Error::storage("failed to create user", "disk I/O error")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "DATABASE_ERROR");
        assert_eq!(json["error"]["details"], "disk I/O error");
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn conflict_body() {
        let (status, json) = body_of(Error::AlreadyExists("user")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "ALREADY_EXISTS");
        assert_eq!(json["error"]["message"], "user already exists");
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn page_meta_rounds_pages_up() {
        let meta = PageMeta::new(21, 3, 10);
        assert_eq!(meta.offset, 20);
        assert_eq!(meta.pages, 3);
        assert_eq!(PageMeta::new(0, 1, 10).pages, 0);
    }
}
