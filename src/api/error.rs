use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::identity::{AccountStatus, ReconcileError};
use crate::idp::VerificationError;
use crate::lockout::minutes_remaining;

/// Body of every non-2xx response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_status: Option<AccountStatus>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no bearer credential provided")]
    TokenMissing,
    #[error("credential has expired")]
    TokenExpired,
    #[error("credential has been revoked")]
    TokenRevoked,
    #[error("invalid credential")]
    InvalidToken,
    #[error("email address is not verified")]
    EmailNotVerified,
    #[error("account is locked, try again in {minutes} minutes")]
    AccountLocked { minutes: i64 },
    #[error("account is {0}")]
    AccountInactive(AccountStatus),
    #[error("session expired due to inactivity")]
    SessionExpired,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("too many requests, try again later")]
    RateLimited,
    #[error("internal server error")]
    Internal(anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TokenMissing => "TOKEN_MISSING",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::AccountInactive(AccountStatus::Banned) => "ACCOUNT_BANNED",
            Self::AccountInactive(_) => "ACCOUNT_SUSPENDED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TokenMissing
            | Self::TokenExpired
            | Self::TokenRevoked
            | Self::InvalidToken
            | Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::EmailNotVerified | Self::AccountInactive(_) | Self::Forbidden => {
                StatusCode::FORBIDDEN
            }
            Self::AccountLocked { .. } => StatusCode::LOCKED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Lock rejection with a rounded-up "try again" hint.
    #[must_use]
    pub fn locked_until(until: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self::AccountLocked {
            minutes: minutes_remaining(until, now).max(1),
        }
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::Expired => Self::TokenExpired,
            VerificationError::Revoked => Self::TokenRevoked,
            VerificationError::Malformed | VerificationError::Unknown => Self::InvalidToken,
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Locked { until } => Self::locked_until(until, Utc::now()),
            ReconcileError::Store(err) => Self::Internal(err),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("request failed: {err:#}");
        }
        let account_status = match &self {
            Self::AccountInactive(status) => Some(*status),
            _ => None,
        };
        let body = ErrorBody {
            success: false,
            code: self.code().to_string(),
            message: self.to_string(),
            account_status,
        };
        (self.status(), Json(body)).into_response()
    }
}
