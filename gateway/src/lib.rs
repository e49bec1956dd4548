// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Media Gateway
//!
//! An HTTP gateway that looks up and downloads videos through `yt-dlp` on
//! behalf of browser clients, presenting a rotating pool of authenticated
//! cookie files to the upstream provider.
//!
//! ## Architecture
//!
//! ```text
//! Client -> HTTP API -> Gateway (this crate) -> yt-dlp -> provider
//!                            |
//!                            +-> admission (per-client limits)
//!                            +-> cookie rotation (cooldowns, validation probe)
//! ```
//!
//! Every lookup or download request passes through, in order:
//!
//! - **Validation**: request bodies are checked with `validator` before any
//!   quota is spent
//! - **Admission**: a minimum interval plus hourly and daily ceilings per client
//! - **Cookie rotation**: a random eligible cookie is copied privately and
//!   probed against a reference video; failures are cooled down and excluded
//! - **Resolution**: `yt-dlp` runs as a child process bounded by a timeout
//!
//! ## Modules
//!
//! - [`admission`]: per-client sliding-window request limits
//! - [`application`]: shared state, router, and server lifecycle
//! - [`client`]: client identity extraction from proxy headers
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: configuration constants for the application
//! - [`credentials`]: cookie store, validation probe and rotation
//! - [`errors`]: application error types with HTTP response mapping
//! - [`models`]: request/response types with validation
//! - [`resolver`]: the extraction capability and its `yt-dlp` driver
//! - [`routes`]: HTTP route handlers (health, get-info, process-download)
//!
//! ## Usage
//!
//! ```bash
//! media-gateway --host 0.0.0.0 --port 5000 --cookie-path /etc/secrets/cookies.txt
//! ```
//!
//! ## Security Considerations
//!
//! - Cookie files are never handed to `yt-dlp` directly; each operation gets a
//!   private copy that is deleted when the operation ends
//! - Cookie material read into memory is zeroized on drop
//! - Request URLs must be absolute http(s) links, so nothing reaches `yt-dlp`
//!   as a flag or a local path
//! - Downloaded artifacts are unlinked before their bytes are streamed back

pub mod admission;
pub mod application;
pub mod client;
pub mod configuration;
pub mod constants;
pub mod credentials;
pub mod errors;
pub mod models;
pub mod resolver;
pub mod routes;
