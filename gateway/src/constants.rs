// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

/// Admission windows. Request history older than the daily window is pruned.
pub const DAILY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
pub const HOURLY_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const ADMISSION_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024; // 1 MB

// Validation constants for request bodies
pub const MAX_URL_LENGTH: u64 = 2048;
pub const MAX_TITLE_LENGTH: u64 = 512;
pub const MAX_QUALITY_LENGTH: u64 = 32;

/// Longest artifact file stem, in bytes, before the `_<height>p.mp4` suffix.
pub const MAX_FILE_STEM_BYTES: usize = 180;
pub const ARTIFACT_CONTENT_TYPE: &str = "video/mp4";
pub const FALLBACK_FILE_STEM: &str = "video";

/// Upstream error text is cut to this many characters before it is logged.
pub const UPSTREAM_LOG_LIMIT: usize = 300;

/// Cookie files above this size are refused rather than copied.
pub const MAX_COOKIE_FILE_BYTES: u64 = 1024 * 1024; // 1 MB

pub const MATERIALIZED_PREFIX: &str = "cookies-";
pub const ENV_COOKIES_PREFIX: &str = "env-cookies-";
pub const WORKDIR_PREFIX: &str = "job-";
