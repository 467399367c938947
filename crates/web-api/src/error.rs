use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
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
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }

    pub fn message(&self) -> &str {
        &self.body.message
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;
        use domain::{DomainError, RepositoryError};

        match error {
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{}: {}", field, reason),
            ),
            AppErr::Domain(DomainError::EmptyRecipients) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "EMPTY_RECIPIENTS",
                "message must have at least one recipient",
            ),
            AppErr::Domain(DomainError::RecipientNotReachable(_)) => ApiError::new(
                StatusCode::FORBIDDEN,
                "RECIPIENT_NOT_REACHABLE",
                "recipient is not reachable",
            ),
            AppErr::Domain(DomainError::MessageNotFound) => ApiError::new(
                StatusCode::NOT_FOUND,
                "MESSAGE_NOT_FOUND",
                "message not found",
            ),
            AppErr::Domain(DomainError::NotMessageSender) => ApiError::new(
                StatusCode::FORBIDDEN,
                "NOT_MESSAGE_SENDER",
                "only the sender may modify this message",
            ),
            AppErr::Domain(DomainError::ReactionAlreadyExists) => ApiError::new(
                StatusCode::CONFLICT,
                "REACTION_EXISTS",
                "reaction already exists",
            ),
            AppErr::Domain(DomainError::ReactionNotFound) => ApiError::new(
                StatusCode::NOT_FOUND,
                "REACTION_NOT_FOUND",
                "reaction not found",
            ),
            AppErr::Repository(repo_err) => match repo_err {
                RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
                }
                // 存储细节只写日志，不返回给客户端
                RepositoryError::Storage { .. } => ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "storage temporarily unavailable",
                ),
            },
            AppErr::Infrastructure { message } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INFRASTRUCTURE_ERROR",
                message,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DomainError, RepositoryError};

    #[test]
    fn test_rejections_map_to_client_errors() {
        let error = ApiError::from(ApplicationError::from(DomainError::NotMessageSender));
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        assert_eq!(error.code(), "NOT_MESSAGE_SENDER");

        let error = ApiError::from(ApplicationError::from(DomainError::ReactionAlreadyExists));
        assert_eq!(error.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_storage_details_are_hidden() {
        let error = ApiError::from(ApplicationError::from(RepositoryError::storage(
            "password authentication failed for user chat",
        )));
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code(), "DATABASE_ERROR");
        assert!(!error.message().contains("password"));

        let error = ApiError::from(ApplicationError::infrastructure("hub unavailable"));
        assert_eq!(error.code(), "INFRASTRUCTURE_ERROR");
    }
}
