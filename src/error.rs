//! Stable error kinds for the connector.
//!
//! Every variant's `kind()` string is part of the wire contract (spec §7):
//! it is surfaced verbatim in `/proxy`-family JSON error bodies and in logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("request carried a disallowed or absent Origin")]
    OriginDenied,

    #[error("request body not JSON or missing required field: {0}")]
    Parse(String),

    #[error("pinned fingerprint disagreed with observed leaf for {host}")]
    CertMismatch { host: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("401 persisted after the authenticated retry")]
    AuthRejected,

    #[error("server returned stale=true twice in succession")]
    AuthStale,

    #[error("WWW-Authenticate header malformed: {0}")]
    ChallengeParse(String),

    #[error("deadline elapsed")]
    Timeout,

    #[error("CIDR parse or semantic failure: {0}")]
    InvalidCidr(String),

    #[error("session cancellation observed")]
    Cancelled,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TLS verifier: {0}")]
    Verifier(String),
}

impl ConnectorError {
    /// The stable error kind string from spec §7.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OriginDenied => "origin-denied",
            Self::Parse(_) => "parse-error",
            Self::CertMismatch { .. } => "cert-mismatch",
            Self::Transport(_) => "transport",
            Self::AuthRejected => "auth-rejected",
            Self::AuthStale => "auth-stale",
            Self::ChallengeParse(_) => "challenge-parse",
            Self::Timeout => "timeout",
            Self::InvalidCidr(_) => "invalid-cidr",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "transport",
            Self::Http(_) => "transport",
            Self::Verifier(_) => "transport",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::OriginDenied => StatusCode::FORBIDDEN,
            Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCidr(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

impl IntoResponse for ConnectorError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.kind(),
            detail: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
