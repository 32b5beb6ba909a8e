use evote_crypto::CryptoError;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use log::{debug, error};
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder, tokio::task::JoinError, Request};
use thiserror::Error;

use crate::model::mongodb::Id;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Voter is not assigned to election {0}")]
    NotEligible(Id),
    #[error("Voter has already voted in election {0}")]
    AlreadyVoted(Id),
    #[error("Ballot content does not match its hash")]
    TamperedContent,
    #[error("Ballot signature could not be validated")]
    InvalidSignature,
    #[error("Election {0} is not accepting votes")]
    ElectionNotActive(Id),
    #[error("Key management service unavailable: {0}")]
    ServiceUnavailable(String),
    /// An AEAD tag failed to verify. Always a security event.
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Key generation failed: {0}")]
    KeyGen(String),
    #[error("Malformed ballot: {0}")]
    MalformedBallot(String),
    #[error(transparent)]
    Crypto(CryptoError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Ledger(#[from] sqlx::Error),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed => Self::AuthenticationFailed,
            CryptoError::KeyGen(reason) => Self::KeyGen(reason),
            other => Self::Crypto(other),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = match self {
            Self::NotEligible(_) => Status::Forbidden,
            Self::AlreadyVoted(_) => Status::Conflict,
            Self::TamperedContent
            | Self::InvalidSignature
            | Self::ElectionNotActive(_)
            | Self::BadRequest(_) => Status::BadRequest,
            Self::AuthenticationFailed | Self::Unauthorized(_) => Status::Unauthorized,
            Self::NotFound(_) => Status::NotFound,
            Self::ServiceUnavailable(_) => Status::ServiceUnavailable,
            Self::Jwt(ref err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::KeyGen(_)
            | Self::MalformedBallot(_)
            | Self::Crypto(_)
            | Self::Db(_)
            | Self::Ledger(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Join(_) => Status::InternalServerError,
        };
        if status.class().is_server_error() {
            error!("{self}");
        } else {
            debug!("Rejected request: {self}");
        }
        Err(status)
    }
}
