use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Failures of calls made to the voting API. None of these reach the HTTP
/// layer: they are turned into a message on the page that started the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Loading results failed; the next refresh tick tries again
    #[error("{0}")]
    Fetch(String),
    /// No usable id token, nothing was sent
    #[error("Please log in again.")]
    MissingCredential,
    /// The API answered 409: this account already has a vote on the poll
    #[error("You have already voted in this poll.")]
    AlreadyVoted,
    /// Any other failed submission, can be retried
    #[error("{0}")]
    Submission(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Fetch(_) | ClientError::Submission(_))
    }
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("Internal server error. Try again later")]
    InternalError(#[source] anyhow::Error),
    #[error("Invalid presenter token specified")]
    InvalidPresenterToken,
    #[error("Presenter controls are disabled on this server")]
    PresenterOff,
    #[error("Invalid refresh interval: {0}")]
    InvalidInterval(u64),
    #[error("Unknown option: {0}")]
    UnknownOption(String),
}

impl ResponseError for UserError {
    fn status_code(&self) -> StatusCode {
        use UserError::*;
        match *self {
            InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PresenterOff | InvalidInterval(_) | UnknownOption(_) => StatusCode::BAD_REQUEST,
            InvalidPresenterToken => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

impl From<askama::Error> for UserError {
    fn from(e: askama::Error) -> Self {
        UserError::InternalError(e.into())
    }
}
