// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::admission::DenialReason;
use crate::credentials::AcquisitionFailure;
use crate::resolver::{UpstreamError, UpstreamErrorKind};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AppError {
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("admission denied: {reason}, retry after {retry_after_secs}s")]
    AdmissionDenied {
        reason: DenialReason,
        retry_after_secs: u64,
    },
    #[error("credentials unavailable: {0}")]
    CredentialsUnavailable(#[from] AcquisitionFailure),
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("request body too large")]
    PayloadTooLarge,
    #[error("download produced no file")]
    ArtifactMissing,
    #[error("internal server error")]
    InternalServerError,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::MalformedBody(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::AdmissionDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CredentialsUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(e) => match e.kind {
                UpstreamErrorKind::BotDetection | UpstreamErrorKind::AgeRestricted => {
                    StatusCode::FORBIDDEN
                }
                UpstreamErrorKind::Unavailable => StatusCode::NOT_FOUND,
                UpstreamErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
                UpstreamErrorKind::Generic => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::ArtifactMissing | Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::ValidationError(msg) | Self::MalformedBody(msg) => msg.clone(),
            Self::PayloadTooLarge => "Request body is too large.".to_string(),
            Self::AdmissionDenied {
                reason,
                retry_after_secs,
            } => format!(
                "Too many requests ({reason}). Please wait {retry_after_secs} seconds before trying again."
            ),
            Self::CredentialsUnavailable(_) => {
                "Service temporarily unavailable. Please try again later.".to_string()
            }
            Self::Upstream(e) => match e.kind {
                UpstreamErrorKind::BotDetection => {
                    "The video provider is asking for bot verification. Please try again later."
                }
                UpstreamErrorKind::Unavailable => "This video is private or unavailable.",
                UpstreamErrorKind::AgeRestricted => {
                    "This video is age-restricted and cannot be processed."
                }
                UpstreamErrorKind::TooManyRequests => {
                    "The video provider is rate limiting requests. Please try again in a few minutes."
                }
                UpstreamErrorKind::Generic => "Failed to process the video. Please try again.",
            }
            .to_string(),
            Self::ArtifactMissing => "The download finished without producing a file.".to_string(),
            Self::InternalServerError => "Internal Server Error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();

        match self {
            Self::AdmissionDenied {
                retry_after_secs, ..
            } => {
                let body = Json(json!({
                    "code": status.as_u16(),
                    "error": message,
                    "retry_after": retry_after_secs,
                }));
                let mut response = (status, body).into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            _ => {
                let body = Json(json!({"code": status.as_u16(), "error": message}));
                (status, body).into_response()
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("[gateway] rejected request body: {}", rejection.body_text());
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge
        } else {
            AppError::MalformedBody(rejection.body_text())
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(_source: std::io::Error) -> Self {
        tracing::error!("{:?}", _source);
        AppError::InternalServerError
    }
}
