// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use crate::admission::AdmissionController;
use crate::configuration::GatewayOptions;
use crate::constants::{ENV_COOKIES_PREFIX, MAX_REQUEST_BODY_SIZE};
use crate::credentials::{CredentialRotator, CredentialValidator, ProbeValidator};
use crate::resolver::MediaResolver;
use crate::resolver::ytdlp::YtDlpResolver;
use crate::routes;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub options: GatewayOptions,
    pub rotator: CredentialRotator,
    pub admission: AdmissionController,
    pub resolver: Arc<dyn MediaResolver>,
    // cookie file written from the environment; removed when the state drops
    _env_cookies: Option<NamedTempFile>,
}

impl AppState {
    /// Builds the state over the configured cookie paths with the given
    /// resolver and validator.
    pub fn new(
        options: GatewayOptions,
        resolver: Arc<dyn MediaResolver>,
        validator: Arc<dyn CredentialValidator>,
    ) -> Self {
        let candidates = options.cookie_paths.clone();
        Self::assemble(options, candidates, resolver, validator, None)
    }

    /// Builds the production state: `yt-dlp` as the resolver, a probe of the
    /// reference video as the validator, and the `YT_COOKIES` material (if
    /// any) as the first cookie candidate.
    pub fn from_options(options: GatewayOptions) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&options.runtime_dir)?;
        std::fs::create_dir_all(&options.download_dir)?;

        let env_cookies = match &options.cookies {
            Some(material) => Some(write_env_cookies(material.expose(), &options)?),
            None => None,
        };

        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(file) = &env_cookies {
            tracing::info!("[gateway] using cookies from environment at {:?}", file.path());
            candidates.push(file.path().to_path_buf());
        }
        candidates.extend(options.cookie_paths.iter().cloned());

        let resolver: Arc<dyn MediaResolver> = Arc::new(YtDlpResolver::new(
            options.ytdlp_path.clone(),
            options.lookup_timeout(),
            options.download_timeout(),
        ));
        let validator = Arc::new(ProbeValidator::new(
            resolver.clone(),
            options.probe_url.clone(),
            options.probe_timeout(),
        ));

        Ok(Self::assemble(
            options,
            candidates,
            resolver,
            validator,
            env_cookies,
        ))
    }

    fn assemble(
        options: GatewayOptions,
        candidates: Vec<PathBuf>,
        resolver: Arc<dyn MediaResolver>,
        validator: Arc<dyn CredentialValidator>,
        env_cookies: Option<NamedTempFile>,
    ) -> Self {
        let rotator = CredentialRotator::new(
            candidates,
            validator,
            options.cooldown_policy(),
            options.runtime_dir.clone(),
        );
        let admission = AdmissionController::new(options.admission_limits());

        Self {
            options,
            rotator,
            admission,
            resolver,
            _env_cookies: env_cookies,
        }
    }
}

fn write_env_cookies(
    material: &str,
    options: &GatewayOptions,
) -> Result<NamedTempFile, std::io::Error> {
    let mut file = tempfile::Builder::new()
        .prefix(ENV_COOKIES_PREFIX)
        .suffix(".txt")
        .tempfile_in(&options.runtime_dir)?;
    file.write_all(material.as_bytes())?;
    file.flush()?;
    Ok(file)
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    pub async fn build(state: Arc<AppState>) -> Result<Self, std::io::Error> {
        let address = format!("{}:{}", state.options.host, state.options.port);
        let listener = TcpListener::bind(address).await?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            "[gateway] listening at http://{}:{}",
            state.options.host,
            port
        );

        let router = create_router(state);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

#[tracing::instrument(skip(state))]
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.options.allowed_origins);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/health", get(routes::health))
        .route("/api/get-info", post(routes::get_info))
        .route("/api/process-download", post(routes::process_download))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("[gateway] ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([CONTENT_DISPOSITION, CONTENT_LENGTH])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[gateway] unable to listen for ctrl-c: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("[gateway] unable to listen for SIGTERM: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("[gateway] shutting down");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::configuration::CookieMaterial;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_env_cookies_become_first_candidate() {
        let root = TempDir::new().unwrap();
        let options = GatewayOptions {
            cookie_paths: vec![root.path().join("cookies.txt")],
            cookies: Some("# Netscape HTTP Cookie File\n".parse::<CookieMaterial>().unwrap()),
            runtime_dir: root.path().join("runtime"),
            download_dir: root.path().join("downloads"),
            ..GatewayOptions::default()
        };

        let state = AppState::from_options(options).unwrap();
        let candidates = state.rotator.candidates().await;

        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].starts_with(root.path().join("runtime")));
        assert_eq!(
            std::fs::read_to_string(&candidates[0]).unwrap(),
            "# Netscape HTTP Cookie File\n"
        );
        assert_eq!(candidates[1], root.path().join("cookies.txt"));
        assert!(root.path().join("downloads").is_dir());

        let env_file = candidates[0].clone();
        drop(state);
        assert!(!env_file.exists());
    }

    #[tokio::test]
    async fn test_without_env_cookies_uses_configured_paths() {
        let root = TempDir::new().unwrap();
        let options = GatewayOptions {
            cookie_paths: vec![root.path().join("a.txt"), root.path().join("b.txt")],
            runtime_dir: root.path().join("runtime"),
            download_dir: root.path().join("downloads"),
            ..GatewayOptions::default()
        };

        let state = AppState::from_options(options).unwrap();
        assert_eq!(
            state.rotator.candidates().await,
            vec![root.path().join("a.txt"), root.path().join("b.txt")]
        );
    }
}
