// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncReadExt;

/// How long a cookie rests after use and after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub use_cooldown: Duration,
    pub failure_cooldown: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            use_cooldown: Duration::from_secs(60 * 60),
            failure_cooldown: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Lifecycle of one cookie file. A failure is recorded together with its
/// time, so a failed state always knows when it failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialState {
    last_used_at: Option<SystemTime>,
    failed_at: Option<SystemTime>,
}

impl CredentialState {
    pub fn last_used_at(&self) -> Option<SystemTime> {
        self.last_used_at
    }

    pub fn failed_at(&self) -> Option<SystemTime> {
        self.failed_at
    }

    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    /// Cooldown half of the eligibility predicate. Presence of the file on
    /// disk is checked by the caller.
    pub fn is_eligible(&self, now: SystemTime, policy: &CooldownPolicy) -> bool {
        let recovered = self
            .failed_at
            .is_none_or(|at| elapsed(now, at) > policy.failure_cooldown);
        let rested = self
            .last_used_at
            .is_none_or(|at| elapsed(now, at) > policy.use_cooldown);
        recovered && rested
    }
}

// A clock that moved backwards counts as no time passed.
fn elapsed(now: SystemTime, earlier: SystemTime) -> Duration {
    now.duration_since(earlier).unwrap_or(Duration::ZERO)
}

/// Ordered catalog of cookie file locations and their lifecycle state.
///
/// State is kept in memory only; a restart forgets every failure.
#[derive(Debug, Default)]
pub struct CredentialStore {
    candidates: Vec<PathBuf>,
    states: HashMap<PathBuf, CredentialState>,
}

impl CredentialStore {
    /// Creates a store for `candidates`, keeping the first occurrence of any
    /// duplicated path.
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        let mut unique: Vec<PathBuf> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !unique.contains(&candidate) {
                unique.push(candidate);
            }
        }

        Self {
            candidates: unique,
            states: HashMap::new(),
        }
    }

    pub fn list_candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Returns the state for `locator`, creating a fresh one on first access.
    pub fn state(&mut self, locator: &Path) -> &CredentialState {
        self.states.entry(locator.to_path_buf()).or_default()
    }

    pub fn mark_used(&mut self, locator: &Path, at: SystemTime) {
        let state = self.states.entry(locator.to_path_buf()).or_default();
        state.last_used_at = Some(at);
        state.failed_at = None;
    }

    pub fn mark_failed(&mut self, locator: &Path, at: SystemTime) {
        let state = self.states.entry(locator.to_path_buf()).or_default();
        state.failed_at = Some(at);
    }
}

/// Whether `bytes` holds anything besides ASCII whitespace.
pub fn has_material(bytes: &[u8]) -> bool {
    !bytes.iter().all(u8::is_ascii_whitespace)
}

/// Whether a cookie file exists and holds material.
///
/// Reads until the first byte that is not whitespace, so a large file is
/// not read in full.
pub async fn is_present(locator: &Path) -> bool {
    let Ok(mut file) = tokio::fs::File::open(locator).await else {
        return false;
    };
    if !file.metadata().await.is_ok_and(|metadata| metadata.is_file()) {
        return false;
    }

    let mut chunk = [0u8; 4096];
    loop {
        match file.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(read) => {
                if chunk.get(..read).is_some_and(has_material) {
                    return true;
                }
            }
        }
    }
}
