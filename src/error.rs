use std::{
    env::VarError, fmt, io::Error as IO_ERROR, num::ParseIntError,
    str::ParseBoolError as PARSE_BOOL_ERROR,
};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::OutOfRangeError as CHRONO_RANGE_ERROR;
use reqwest::Error as REQWEST_ERROR;
use sqlx::error::Error as SQL_ERROR;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::subscriber::SetGlobalDefaultError as TRACING_GLOBAL_DEFAULT_ERROR;
use url::ParseError as URL_ERROR;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] IO_ERROR),

    #[error("{0}")]
    URL(#[from] URL_ERROR),

    #[error("{0}")]
    INT(#[from] ParseIntError),

    #[error("{0}")]
    SQL(#[from] SQL_ERROR),

    #[error("{0}")]
    VAR(#[from] VarError),

    #[error("{0}")]
    ParseBoolError(#[from] PARSE_BOOL_ERROR),

    #[error("{0}")]
    TokioJoinError(#[from] JoinError),

    #[error("{0}")]
    ReqwestError(#[from] REQWEST_ERROR),

    #[error("Duration out of range: {0}")]
    DurationError(#[from] CHRONO_RANGE_ERROR),

    #[error("Tracing error: {0}")]
    SetGlobalDefaultError(#[from] TRACING_GLOBAL_DEFAULT_ERROR),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Task message error: {0}")]
    TaskError(String),

    #[error("Hub url has no host: {0}")]
    MissingHost(String),

    #[error(
        "Hub {hub} rejected {mode} request: expected 2xx but got {status}"
    )]
    HubStatus {
        hub: String,
        mode: String,
        status: u16,
    },

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("{0}")]
    Aggregate(AggregateError),
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::URL(_) | Error::MissingHost(_) => StatusCode::BAD_REQUEST,
            Error::SubscriptionNotFound(_) => StatusCode::NOT_FOUND,
            Error::HubStatus { .. } | Error::ReqwestError(_) => {
                StatusCode::BAD_GATEWAY
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

/// Every failure collected from a batch of independent jobs.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    pub fn new(errors: Vec<Error>) -> Self {
        AggregateError { errors }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    pub fn into_inner(self) -> Vec<Error> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.errors.len();
        write!(
            f,
            "{} error{} occurred",
            count,
            if count == 1 { "" } else { "s" }
        )?;

        for error in &self.errors {
            write!(f, "; {}", error)?;
        }

        Ok(())
    }
}

impl From<Vec<Error>> for AggregateError {
    fn from(errors: Vec<Error>) -> Self {
        AggregateError::new(errors)
    }
}

impl From<AggregateError> for Error {
    fn from(value: AggregateError) -> Self {
        Error::Aggregate(value)
    }
}
