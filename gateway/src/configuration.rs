// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::admission::AdmissionLimits;
use crate::credentials::CooldownPolicy;

/// Raw cookie file content handed to the process through the environment.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CookieMaterial(String);

impl CookieMaterial {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl FromStr for CookieMaterial {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(value.to_string()))
    }
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for CookieMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct GatewayOptions {
    #[arg(long, default_value = "127.0.0.1", env("GATEWAY_HTTP_HOST"))]
    pub host: String,
    #[arg(long, default_value = "5000", env("GATEWAY_HTTP_PORT"))]
    pub port: u16,
    /// Cookie files in priority order.
    #[arg(
        long = "cookie-path",
        value_delimiter = ',',
        default_values = [
            "/etc/secrets/cookies.txt",
            "/etc/secrets/cookies2.txt",
            "/etc/secrets/cookies3.txt",
            "cookies.txt",
        ],
        env("GATEWAY_COOKIE_PATHS")
    )]
    pub cookie_paths: Vec<PathBuf>,
    /// Cookie file content; written to the runtime dir and tried first.
    #[arg(long, env("YT_COOKIES"), hide_env_values = true)]
    pub cookies: Option<CookieMaterial>,
    #[arg(long, default_value = "runtime", env("GATEWAY_RUNTIME_DIR"))]
    pub runtime_dir: PathBuf,
    #[arg(long, default_value = "downloads", env("GATEWAY_DOWNLOAD_DIR"))]
    pub download_dir: PathBuf,
    #[arg(long, default_value = "yt-dlp", env("GATEWAY_YTDLP_PATH"))]
    pub ytdlp_path: PathBuf,
    #[arg(
        long,
        default_value = "https://www.youtube.com/watch?v=jNQXAC9IVRw",
        env("GATEWAY_PROBE_URL")
    )]
    pub probe_url: String,
    #[arg(long, default_value = "30", env("GATEWAY_PROBE_TIMEOUT_SECS"))]
    pub probe_timeout_secs: u64,
    #[arg(long, default_value = "120", env("GATEWAY_LOOKUP_TIMEOUT_SECS"))]
    pub lookup_timeout_secs: u64,
    #[arg(long, default_value = "900", env("GATEWAY_DOWNLOAD_TIMEOUT_SECS"))]
    pub download_timeout_secs: u64,
    #[arg(long, default_value = "3600", env("GATEWAY_USE_COOLDOWN_SECS"))]
    pub use_cooldown_secs: u64,
    #[arg(long, default_value = "21600", env("GATEWAY_FAILURE_COOLDOWN_SECS"))]
    pub failure_cooldown_secs: u64,
    #[arg(long, default_value = "8", env("GATEWAY_MIN_INTERVAL_SECS"))]
    pub min_interval_secs: u64,
    #[arg(long, default_value = "25", env("GATEWAY_HOURLY_LIMIT"))]
    pub hourly_limit: usize,
    #[arg(long, default_value = "100", env("GATEWAY_DAILY_LIMIT"))]
    pub daily_limit: usize,
    #[arg(
        long = "allowed-origin",
        value_delimiter = ',',
        default_values = [
            "http://localhost:3000",
            "https://ytv-downloader.netlify.app",
            "https://youtube-video-downloader-74eht97c2.vercel.app",
        ],
        env("GATEWAY_ALLOWED_ORIGINS")
    )]
    pub allowed_origins: Vec<String>,
}

impl GatewayOptions {
    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            use_cooldown: Duration::from_secs(self.use_cooldown_secs),
            failure_cooldown: Duration::from_secs(self.failure_cooldown_secs),
        }
    }

    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            min_interval: Duration::from_secs(self.min_interval_secs),
            hourly_limit: self.hourly_limit,
            daily_limit: self.daily_limit,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl Default for GatewayOptions {
    fn default() -> Self {
        GatewayOptions {
            host: "127.0.0.1".to_string(),
            port: 0,
            cookie_paths: Vec::new(),
            cookies: None,
            runtime_dir: std::env::temp_dir(),
            download_dir: std::env::temp_dir(),
            ytdlp_path: PathBuf::from("yt-dlp"),
            probe_url: "https://www.youtube.com/watch?v=jNQXAC9IVRw".to_string(),
            probe_timeout_secs: 30,
            lookup_timeout_secs: 120,
            download_timeout_secs: 900,
            use_cooldown_secs: 3600,
            failure_cooldown_secs: 6 * 3600,
            min_interval_secs: 8,
            hourly_limit: 25,
            daily_limit: 100,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}
