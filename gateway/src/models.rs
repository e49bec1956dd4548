// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::borrow::Cow;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::constants::{
    FALLBACK_FILE_STEM, MAX_FILE_STEM_BYTES, MAX_QUALITY_LENGTH, MAX_TITLE_LENGTH, MAX_URL_LENGTH,
};
use crate::resolver::{MediaFormat, MediaInfo, VideoQuality};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InfoRequest {
    #[serde(default)]
    #[validate(
        length(min = 1, max = MAX_URL_LENGTH, message = "URL is required"),
        custom(function = "validate_media_url")
    )]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DownloadRequest {
    #[serde(default)]
    #[validate(
        length(min = 1, max = MAX_URL_LENGTH, message = "URL is required"),
        custom(function = "validate_media_url")
    )]
    pub url: String,

    #[serde(default)]
    #[validate(
        length(min = 1, max = MAX_QUALITY_LENGTH, message = "quality is required"),
        custom(function = "validate_quality")
    )]
    pub quality: String,

    #[serde(default)]
    #[validate(length(min = 1, max = MAX_TITLE_LENGTH, message = "title is required"))]
    pub title: String,
}

impl DownloadRequest {
    /// Parsed quality; only meaningful after validation.
    pub fn video_quality(&self) -> Option<VideoQuality> {
        self.quality.parse().ok()
    }
}

/// Accepts absolute http(s) URLs only, so nothing reaching the extraction
/// library can be mistaken for a local path or a command line flag.
fn validate_media_url(url: &str) -> Result<(), validator::ValidationError> {
    if url.is_empty() {
        // reported by the length rule
        return Ok(());
    }
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_url")
            .with_message(Cow::Borrowed("URL must be an http(s) link"))),
    }
}

fn validate_quality(quality: &str) -> Result<(), validator::ValidationError> {
    if quality.is_empty() || quality.parse::<VideoQuality>().is_ok() {
        return Ok(());
    }
    Err(validator::ValidationError::new("invalid_quality")
        .with_message(Cow::Borrowed("quality must look like WIDTHxHEIGHT")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub resolution: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub quality: String,
    pub filesize_str: String,
    pub url: Option<String>,
    pub ext: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub title: String,
    pub thumbnail: String,
    pub video_formats: Vec<VideoFormat>,
    pub audio_formats: Vec<AudioFormat>,
}

impl From<MediaInfo> for InfoResponse {
    /// Keeps one entry per video resolution, tallest first, and audio-only
    /// streams by descending bitrate.
    fn from(info: MediaInfo) -> Self {
        let mut seen: HashSet<String> = HashSet::new();
        let mut videos: Vec<(u32, VideoFormat)> = Vec::new();
        let mut audios: Vec<(f64, AudioFormat)> = Vec::new();

        for format in &info.formats {
            if let Some(quality) = format.video_quality() {
                let resolution = format.resolution.clone().unwrap_or_default();
                if seen.insert(resolution.clone()) {
                    videos.push((quality.height, VideoFormat { resolution }));
                }
            } else if format.is_audio_only() {
                audios.push((format.abr.unwrap_or(0.0), audio_format(format)));
            }
        }

        videos.sort_by(|(a, _), (b, _)| b.cmp(a));
        audios.sort_by(|(a, _), (b, _)| b.total_cmp(a));

        Self {
            title: info
                .title
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| "No title".to_string()),
            thumbnail: info.thumbnail.unwrap_or_default(),
            video_formats: videos.into_iter().map(|(_, video)| video).collect(),
            audio_formats: audios.into_iter().map(|(_, audio)| audio).collect(),
        }
    }
}

fn audio_format(format: &MediaFormat) -> AudioFormat {
    AudioFormat {
        quality: format
            .format_note
            .clone()
            .unwrap_or_else(|| "Audio".to_string()),
        filesize_str: format
            .filesize
            .or(format.filesize_approx)
            .map_or_else(|| "N/A".to_string(), human_size),
        url: format.url.clone(),
        ext: format.ext.clone(),
    }
}

/// Binary-prefixed size with two decimals, e.g. `3.52MiB`.
pub fn human_size(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", value, UNITS[unit])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub cookies_available: bool,
    pub timestamp: String,
}

/// Replaces characters that are invalid in Windows or Linux file names.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '<' | '>' | ':' | '*' | '|' | '"' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.');

    let mut end = cleaned.len().min(MAX_FILE_STEM_BYTES);
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    let stem = cleaned[..end].trim_end();

    if stem.is_empty() {
        FALLBACK_FILE_STEM.to_string()
    } else {
        stem.to_string()
    }
}

/// `<sanitized title>_<height>p.mp4`
pub fn artifact_file_name(title: &str, quality: VideoQuality) -> String {
    format!("{}_{}p.mp4", sanitize_filename(title), quality.height)
}

/// `Content-Disposition` value with an ASCII fallback name and the exact
/// UTF-8 name in RFC 5987 form.
pub fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}
