// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use clap::Parser;
use media_gateway::application::{AppState, Application};
use media_gateway::configuration::GatewayOptions;
use media_gateway::constants;
use std::{io::Error, sync::Arc};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    println!("[gateway] init");

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // keep ANSI color codes out of collected logs.
        .with_ansi(false)
        // the log collector adds the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .init();

    // get configuration options from arguments and environment variables
    let options = GatewayOptions::parse();

    tracing::info!("[gateway] {:?}", &options);

    let state = Arc::new(AppState::from_options(options)?);

    if state.rotator.has_available().await {
        tracing::info!(
            "[gateway] cookie candidates: {:?}",
            state.rotator.candidates().await
        );
    } else {
        tracing::warn!("[gateway] no cookie file is present, requests will be refused");
    }

    tracing::info!(
        "[gateway] sweeping idle clients every {:#?}",
        constants::ADMISSION_SWEEP_INTERVAL
    );
    let sweeper = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(constants::ADMISSION_SWEEP_INTERVAL).await;
            let removed = sweeper.admission.sweep().await;
            tracing::debug!("[gateway] swept {} idle clients", removed);
        }
    });

    let application = Application::build(state).await?;

    application.run_until_stopped().await
}
