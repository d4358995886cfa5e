use application::ApplicationError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use domain::DomainError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
            retry_after: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }

    /// 受保护接口上的 access 令牌校验失败一律 401
    pub fn unauthenticated(error: ApplicationError) -> Self {
        match error {
            ApplicationError::TokenExpired
            | ApplicationError::TokenRevoked
            | ApplicationError::InvalidToken
            | ApplicationError::NoToken => {
                Self::new(StatusCode::UNAUTHORIZED, error.code(), error.public_message())
            }
            other => Self::from(other),
        }
    }
}

fn status_for(error: &ApplicationError) -> StatusCode {
    match error {
        ApplicationError::Domain(domain) => match domain {
            DomainError::InvalidArgument { .. }
            | DomainError::DuplicateEmail
            | DomainError::DuplicateUsername
            | DomainError::EmptyContent => StatusCode::BAD_REQUEST,
            DomainError::NotParticipant => StatusCode::FORBIDDEN,
            DomainError::UserNotFound | DomainError::ConversationNotFound => StatusCode::NOT_FOUND,
        },
        ApplicationError::InvalidCredentials | ApplicationError::NoToken => {
            StatusCode::UNAUTHORIZED
        }
        // 刷新接口上令牌失效是 403，迫使客户端重新登录
        ApplicationError::TokenExpired
        | ApplicationError::TokenRevoked
        | ApplicationError::InvalidToken => StatusCode::FORBIDDEN,
        ApplicationError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        if error.is_internal() {
            tracing::error!(error = %error, "请求处理失败");
        }
        let mut api_error = ApiError::new(status_for(&error), error.code(), error.public_message());
        if let ApplicationError::RateLimited { retry_after_secs } = error {
            api_error.retry_after = Some(retry_after_secs);
        }
        api_error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::RepositoryError;

    #[test]
    fn maps_auth_errors_to_status_codes() {
        let cases = [
            (ApplicationError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (ApplicationError::NoToken, StatusCode::UNAUTHORIZED),
            (ApplicationError::TokenRevoked, StatusCode::FORBIDDEN),
            (ApplicationError::TokenExpired, StatusCode::FORBIDDEN),
            (
                ApplicationError::Domain(DomainError::DuplicateEmail),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApplicationError::Domain(DomainError::NotParticipant),
                StatusCode::FORBIDDEN,
            ),
            (
                ApplicationError::RateLimited {
                    retry_after_secs: 3,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn access_token_failures_are_unauthorized() {
        let error = ApiError::unauthenticated(ApplicationError::TokenExpired);
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error.code(), "TOKEN_EXPIRED");
    }

    #[test]
    fn internal_errors_hide_details() {
        let error = ApiError::from(ApplicationError::Repository(RepositoryError::storage(
            "connection refused on 10.0.0.5",
        )));
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code(), "INTERNAL_ERROR");
        assert!(!error.body.message.contains("10.0.0.5"));
    }

    #[test]
    fn rate_limit_sets_retry_after() {
        let response = ApiError::from(ApplicationError::RateLimited {
            retry_after_secs: 42,
        })
        .into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
