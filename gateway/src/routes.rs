// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP route handlers for the media gateway API.
//!
//! | Method | Path | Handler | Description |
//! |--------|------|---------|-------------|
//! | GET | `/health`, `/api/health` | [`health`] | Liveness and cookie availability |
//! | POST | `/api/get-info` | [`get_info`] | Title, thumbnail and formats of a video |
//! | POST | `/api/process-download` | [`process_download`] | Download, merge and stream an MP4 |
//!
//! Both POST handlers follow the same order: validate the body, check
//! admission for the client, acquire a cookie, then call the resolver. A
//! malformed body therefore never spends the client's quota.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderValue;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use validator::Validate;

use crate::admission::Admission;
use crate::application::AppState;
use crate::client::ClientId;
use crate::constants::{ARTIFACT_CONTENT_TYPE, UPSTREAM_LOG_LIMIT, WORKDIR_PREFIX};
use crate::errors::AppError;
use crate::models::{
    DownloadRequest, HealthResponse, InfoRequest, InfoResponse, artifact_file_name,
    content_disposition,
};
use crate::resolver::{UpstreamError, UpstreamErrorKind, truncate_for_log};

/// Health check endpoint.
///
/// # Response
///
/// ```json
/// {"status": "ok", "cookies_available": true, "timestamp": "2024-05-01T12:00:00+00:00"}
/// ```
#[tracing::instrument(skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        cookies_available: state.rotator.has_available().await,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Looks up a video's title, thumbnail and downloadable formats.
///
/// # Request Flow
///
/// 1. Validate the incoming [`InfoRequest`]
/// 2. Check admission for the calling client
/// 3. Acquire a validated cookie copy
/// 4. Resolve metadata and shape it into an [`InfoResponse`]
///
/// # Errors
///
/// - [`AppError::ValidationError`] - missing or invalid URL
/// - [`AppError::AdmissionDenied`] - the client is over a limit
/// - [`AppError::CredentialsUnavailable`] - no usable cookie file
/// - [`AppError::Upstream`] - the provider refused or failed the lookup
#[tracing::instrument(skip(state, payload))]
pub async fn get_info(
    State(state): State<Arc<AppState>>,
    client: ClientId,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> Result<Json<InfoResponse>, AppError> {
    // 1. Validate before touching the client's quota
    let Json(request) = payload?;
    request.validate().map_err(|e| {
        tracing::debug!("[gateway] info validation failed: {}", e);
        AppError::ValidationError(e.to_string())
    })?;

    // 2. Admission
    admit(&state, &client).await?;

    // 3. Cookie
    let credential = state.rotator.acquire().await.map_err(|e| {
        tracing::error!("[gateway] no cookie for {}: {}", client, e);
        AppError::from(e)
    })?;
    tracing::debug!("[gateway] using cookie {:?}", credential.source());

    // 4. Lookup
    let info = state
        .resolver
        .resolve_metadata(&request.url, credential.auth_context())
        .await
        .map_err(|e| upstream_failure(&client, e))?;

    Ok(Json(InfoResponse::from(info)))
}

/// Downloads the requested quality, merges it to MP4 and streams it back.
///
/// # Request Flow
///
/// 1. Validate the incoming [`DownloadRequest`]
/// 2. Check admission for the calling client
/// 3. Acquire a validated cookie copy
/// 4. Download into a private working directory
/// 5. Open the artifact, remove the working directory and stream the handle
///
/// The working directory is a [`tempfile::TempDir`], so it is removed on every
/// exit path, including cancellation when the client disconnects. On success
/// the artifact is already unlinked when the body starts streaming.
///
/// # Errors
///
/// - [`AppError::ValidationError`] - missing URL, title or a quality that is not `WxH`
/// - [`AppError::AdmissionDenied`] - the client is over a limit
/// - [`AppError::CredentialsUnavailable`] - no usable cookie file
/// - [`AppError::Upstream`] - the provider refused or failed the download
/// - [`AppError::ArtifactMissing`] - the downloader exited cleanly without output
#[tracing::instrument(skip(state, payload))]
pub async fn process_download(
    State(state): State<Arc<AppState>>,
    client: ClientId,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    // 1. Validate before touching the client's quota
    let Json(request) = payload?;
    request.validate().map_err(|e| {
        tracing::debug!("[gateway] download validation failed: {}", e);
        AppError::ValidationError(e.to_string())
    })?;
    let quality = request
        .video_quality()
        .ok_or_else(|| AppError::ValidationError("quality must look like WIDTHxHEIGHT".into()))?;

    // 2. Admission
    admit(&state, &client).await?;

    // 3. Cookie
    let credential = state.rotator.acquire().await.map_err(|e| {
        tracing::error!("[gateway] no cookie for {}: {}", client, e);
        AppError::from(e)
    })?;
    tracing::debug!("[gateway] using cookie {:?}", credential.source());

    // 4. Download into a per-request directory
    let workdir = tempfile::Builder::new()
        .prefix(WORKDIR_PREFIX)
        .tempdir_in(&state.options.download_dir)?;
    let file_name = artifact_file_name(&request.title, quality);
    let artifact_path = workdir.path().join(&file_name);

    tracing::info!(
        "[gateway] downloading {} at {} for {}",
        request.url,
        quality,
        client
    );
    state
        .resolver
        .fetch_and_package(
            &request.url,
            quality,
            credential.auth_context(),
            &artifact_path,
        )
        .await
        .map_err(|e| upstream_failure(&client, e))?;
    drop(credential);

    // 5. Keep an open handle, then remove the directory before streaming
    let file = match tokio::fs::File::open(&artifact_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::error!("[gateway] no artifact at {:?}", artifact_path);
            return Err(AppError::ArtifactMissing);
        }
        Err(e) => return Err(e.into()),
    };
    let length = file.metadata().await?.len();
    drop(workdir);

    tracing::info!("[gateway] streaming {} ({} bytes) to {}", file_name, length, client);

    let disposition = HeaderValue::from_str(&content_disposition(&file_name)).map_err(|e| {
        tracing::error!("[gateway] invalid content disposition: {:?}", e);
        AppError::InternalServerError
    })?;
    let headers = [
        (CONTENT_TYPE, HeaderValue::from_static(ARTIFACT_CONTENT_TYPE)),
        (CONTENT_LENGTH, HeaderValue::from(length)),
        (CONTENT_DISPOSITION, disposition),
    ];

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

async fn admit(state: &AppState, client: &ClientId) -> Result<(), AppError> {
    match state.admission.check(client.as_str()).await {
        Admission::Admitted => Ok(()),
        Admission::Denied {
            reason,
            retry_after_secs,
        } => Err(AppError::AdmissionDenied {
            reason,
            retry_after_secs,
        }),
    }
}

fn upstream_failure(client: &ClientId, error: UpstreamError) -> AppError {
    let detail = truncate_for_log(&error.detail, UPSTREAM_LOG_LIMIT);
    match error.kind {
        UpstreamErrorKind::Generic => {
            tracing::error!("[gateway] upstream failure for {}: {}", client, detail);
        }
        kind => {
            tracing::warn!("[gateway] upstream {} for {}: {}", kind, client, detail);
        }
    }
    AppError::Upstream(error)
}
