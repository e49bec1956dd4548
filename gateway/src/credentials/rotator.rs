// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Cookie selection with cooldowns and bounded retry.
//!
//! # Acquisition
//!
//! 1. Check which configured cookie files exist and hold more than whitespace
//! 2. Under the store lock, pick one with [`select_candidate`]:
//!    a random eligible cookie, or the least recently used one when every
//!    cookie is cooling down
//! 3. Copy it into a [`MaterializedCredential`]
//! 4. Probe it with the [`CredentialValidator`] (outside the lock)
//! 5. Record the outcome; on failure exclude the cookie and go back to 1
//!
//! The loop runs at most once per configured cookie, so acquisition always
//! terminates. The lock only covers the snapshot and the state updates, which
//! means two requests may probe the same cookie at once. Cookies are not
//! leased, only cooled down, so the cost of that is one extra probe.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;

use super::store::{CooldownPolicy, CredentialState, CredentialStore, is_present};
use super::validator::CredentialValidator;
use super::{AcquisitionFailure, MaterializedCredential};

/// A candidate as seen by the selection step.
#[derive(Debug, Clone)]
pub struct CandidateView {
    pub locator: PathBuf,
    pub present: bool,
    pub state: CredentialState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Picked at random among eligible cookies.
    Eligible(PathBuf),
    /// Every remaining cookie is cooling down; the least recently used one.
    Fallback(PathBuf),
    /// Nothing present and not excluded.
    Exhausted,
}

/// Chooses the next cookie to try. Pure apart from the random draw.
pub fn select_candidate(
    views: &[CandidateView],
    excluded: &HashSet<PathBuf>,
    now: SystemTime,
    policy: &CooldownPolicy,
    rng: &mut fastrand::Rng,
) -> Selection {
    let open: Vec<&CandidateView> = views
        .iter()
        .filter(|view| view.present && !excluded.contains(&view.locator))
        .collect();

    let eligible: Vec<&CandidateView> = open
        .iter()
        .copied()
        .filter(|view| view.state.is_eligible(now, policy))
        .collect();

    if !eligible.is_empty() {
        if let Some(view) = eligible.get(rng.usize(..eligible.len())) {
            return Selection::Eligible(view.locator.clone());
        }
    }

    // never-used sorts first; ties keep configured priority
    open.into_iter()
        .min_by_key(|view| view.state.last_used_at())
        .map_or(Selection::Exhausted, |view| {
            Selection::Fallback(view.locator.clone())
        })
}

/// Hands out validated cookie copies to request handlers.
pub struct CredentialRotator {
    store: Mutex<CredentialStore>,
    validator: Arc<dyn CredentialValidator>,
    policy: CooldownPolicy,
    runtime_dir: PathBuf,
}

impl CredentialRotator {
    /// Creates a rotator over `candidates`, writing private copies into
    /// `runtime_dir`.
    pub fn new(
        candidates: Vec<PathBuf>,
        validator: Arc<dyn CredentialValidator>,
        policy: CooldownPolicy,
        runtime_dir: PathBuf,
    ) -> Self {
        Self {
            store: Mutex::new(CredentialStore::new(candidates)),
            validator,
            policy,
            runtime_dir,
        }
    }

    pub async fn candidates(&self) -> Vec<PathBuf> {
        self.store.lock().await.list_candidates().to_vec()
    }

    pub async fn state(&self, locator: &Path) -> CredentialState {
        self.store.lock().await.state(locator).clone()
    }

    /// Whether at least one configured cookie file exists and is non-empty.
    pub async fn has_available(&self) -> bool {
        for candidate in self.candidates().await {
            if is_present(&candidate).await {
                return true;
            }
        }
        false
    }

    /// Acquires a validated cookie copy.
    ///
    /// # Errors
    ///
    /// - [`AcquisitionFailure::NoCredentialsConfigured`] - no configured cookie
    ///   file exists or has content
    /// - [`AcquisitionFailure::AllCredentialsExhausted`] - every cookie was
    ///   tried and failed to copy or validate
    pub async fn acquire(&self) -> Result<MaterializedCredential, AcquisitionFailure> {
        self.acquire_with(SystemTime::now).await
    }

    /// [`acquire`](Self::acquire) with the clock frozen at `now`.
    pub async fn acquire_at(
        &self,
        now: SystemTime,
    ) -> Result<MaterializedCredential, AcquisitionFailure> {
        self.acquire_with(move || now).await
    }

    /// The clock is read again on every attempt and for every recorded
    /// outcome, since a single probe can take as long as its timeout.
    #[tracing::instrument(skip(self, clock))]
    async fn acquire_with<C>(&self, clock: C) -> Result<MaterializedCredential, AcquisitionFailure>
    where
        C: Fn() -> SystemTime + Send + Sync,
    {
        let candidates = self.candidates().await;
        let mut excluded: HashSet<PathBuf> = HashSet::with_capacity(candidates.len());
        let mut rng = fastrand::Rng::new();

        for attempt in 0..candidates.len() {
            let now = clock();
            let mut presence = Vec::with_capacity(candidates.len());
            for candidate in &candidates {
                presence.push(is_present(candidate).await);
            }

            let selection = {
                let mut store = self.store.lock().await;
                let views: Vec<CandidateView> = candidates
                    .iter()
                    .zip(presence)
                    .map(|(locator, present)| CandidateView {
                        locator: locator.clone(),
                        present,
                        state: store.state(locator).clone(),
                    })
                    .collect();
                select_candidate(&views, &excluded, now, &self.policy, &mut rng)
            };

            let locator = match selection {
                Selection::Eligible(locator) => locator,
                Selection::Fallback(locator) => {
                    tracing::warn!(
                        "[gateway] all cookies cooling down, falling back to least recently used {}",
                        locator.display()
                    );
                    locator
                }
                Selection::Exhausted if attempt == 0 => break,
                Selection::Exhausted => {
                    tracing::error!("[gateway] no usable cookies left after {} attempts", attempt);
                    return Err(AcquisitionFailure::AllCredentialsExhausted);
                }
            };

            tracing::debug!(
                "[gateway] trying cookie {} (attempt {})",
                locator.display(),
                attempt + 1
            );

            let credential = match MaterializedCredential::materialize(
                locator.clone(),
                self.runtime_dir.clone(),
            )
            .await
            {
                Ok(credential) => credential,
                Err(e) => {
                    tracing::warn!(
                        "[gateway] unable to materialize cookie {}: {}",
                        locator.display(),
                        e
                    );
                    self.store.lock().await.mark_failed(&locator, clock());
                    excluded.insert(locator);
                    continue;
                }
            };

            if self.validator.validate(&credential).await {
                self.store.lock().await.mark_used(&locator, clock());
                tracing::info!("[gateway] using cookie {}", locator.display());
                return Ok(credential);
            }

            tracing::warn!(
                "[gateway] cookie {} failed validation, cooling down",
                locator.display()
            );
            self.store.lock().await.mark_failed(&locator, clock());
            excluded.insert(locator);
        }

        if excluded.is_empty() {
            tracing::error!("[gateway] no cookie files configured or present");
            Err(AcquisitionFailure::NoCredentialsConfigured)
        } else {
            tracing::error!(
                "[gateway] all {} cookie files failed validation",
                excluded.len()
            );
            Err(AcquisitionFailure::AllCredentialsExhausted)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::constants::MAX_COOKIE_FILE_BYTES;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::{Duration, UNIX_EPOCH};

    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Accepts every cookie except those whose source path is rejected.
    #[derive(Default)]
    struct FakeValidator {
        rejected: HashSet<PathBuf>,
        calls: AtomicUsize,
    }

    impl FakeValidator {
        fn rejecting(rejected: &[&PathBuf]) -> Self {
            Self {
                rejected: rejected.iter().map(|p| (*p).clone()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialValidator for FakeValidator {
        async fn validate(&self, credential: &MaterializedCredential) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            !self.rejected.contains(credential.source())
        }
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn cookie(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn rotator(
        dir: &TempDir,
        candidates: Vec<PathBuf>,
        validator: Arc<FakeValidator>,
        policy: CooldownPolicy,
    ) -> CredentialRotator {
        CredentialRotator::new(candidates, validator, policy, dir.path().to_path_buf())
    }

    fn view(locator: &str, state: CredentialState) -> CandidateView {
        CandidateView {
            locator: PathBuf::from(locator),
            present: true,
            state,
        }
    }

    #[tokio::test]
    async fn test_acquire_single_good_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let good = cookie(&dir, "cookies.txt", "SID=1");
        let validator = Arc::new(FakeValidator::default());
        let rotator = rotator(&dir, vec![good.clone()], validator.clone(), CooldownPolicy::default());

        let credential = rotator.acquire_at(at(1_000)).await.unwrap();

        assert_eq!(credential.source(), good.as_path());
        assert_eq!(rotator.state(&good).await.last_used_at(), Some(at(1_000)));
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_and_empty_cookies_are_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let empty = cookie(&dir, "empty.txt", "");
        let missing = dir.path().join("missing.txt");
        let validator = Arc::new(FakeValidator::default());
        let rotator = rotator(&dir, vec![missing, empty], validator.clone(), CooldownPolicy::default());

        let result = rotator.acquire_at(at(1_000)).await;

        assert_eq!(result.unwrap_err(), AcquisitionFailure::NoCredentialsConfigured);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
        assert!(!rotator.has_available().await);
    }

    #[tokio::test]
    async fn test_whitespace_only_pool_is_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let a = cookie(&dir, "a.txt", "\n");
        let b = cookie(&dir, "b.txt", "  \t\n");
        let validator = Arc::new(FakeValidator::default());
        let rotator = rotator(&dir, vec![a.clone(), b.clone()], validator.clone(), CooldownPolicy::default());

        assert!(!rotator.has_available().await);
        assert_eq!(
            rotator.acquire_at(at(1_000)).await.unwrap_err(),
            AcquisitionFailure::NoCredentialsConfigured
        );
        assert!(!rotator.state(&a).await.is_failed());
        assert!(!rotator.state(&b).await.is_failed());
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_uncopyable_cookie_is_failed_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = cookie(&dir, "good.txt", "SID=good");
        let oversized = dir.path().join("oversized.txt");
        std::fs::write(&oversized, vec![b'a'; MAX_COOKIE_FILE_BYTES as usize + 1]).unwrap();
        let validator = Arc::new(FakeValidator::default());
        let rotator = rotator(
            &dir,
            vec![good.clone(), oversized.clone()],
            validator.clone(),
            CooldownPolicy::default(),
        );
        // good is cooling down, so the oversized file is the only eligible pick
        rotator.store.lock().await.mark_used(&good, at(900));

        let credential = rotator.acquire_at(at(1_000)).await.unwrap();

        assert_eq!(credential.source(), good.as_path());
        assert_eq!(rotator.state(&oversized).await.failed_at(), Some(at(1_000)));
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_outcomes_use_fresh_clock_readings() {
        let dir = tempfile::tempdir().unwrap();
        let good = cookie(&dir, "good.txt", "SID=good");
        let bad = cookie(&dir, "bad.txt", "SID=bad");
        let validator = Arc::new(FakeValidator::rejecting(&[&bad]));
        let rotator = rotator(
            &dir,
            vec![good.clone(), bad.clone()],
            validator,
            CooldownPolicy::default(),
        );
        rotator.store.lock().await.mark_used(&good, at(0));

        // every reading advances the clock by 30s
        let ticks = AtomicU64::new(0);
        let clock = || at(1_000 + 30 * ticks.fetch_add(1, Ordering::SeqCst));
        let credential = rotator.acquire_with(clock).await.unwrap();

        assert_eq!(credential.source(), good.as_path());
        let failed_at = rotator.state(&bad).await.failed_at().unwrap();
        let used_at = rotator.state(&good).await.last_used_at().unwrap();
        assert!(failed_at > at(1_000));
        assert!(used_at > failed_at);
    }

    #[tokio::test]
    async fn test_no_candidates_is_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let rotator = rotator(&dir, Vec::new(), Arc::new(FakeValidator::default()), CooldownPolicy::default());
        assert_eq!(
            rotator.acquire_at(at(1)).await.unwrap_err(),
            AcquisitionFailure::NoCredentialsConfigured
        );
    }

    #[tokio::test]
    async fn test_failed_validation_moves_to_next_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let bad = cookie(&dir, "bad.txt", "SID=bad");
        let good = cookie(&dir, "good.txt", "SID=good");
        let validator = Arc::new(FakeValidator::rejecting(&[&bad]));
        let rotator = rotator(
            &dir,
            vec![bad.clone(), good.clone()],
            validator.clone(),
            CooldownPolicy::default(),
        );

        // Whatever the random order, the good cookie wins within two attempts.
        let credential = rotator.acquire_at(at(1_000)).await.unwrap();
        assert_eq!(credential.source(), good.as_path());
        assert!(validator.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_rejected_cookie_is_marked_failed() {
        let dir = tempfile::tempdir().unwrap();
        let bad = cookie(&dir, "bad.txt", "SID=bad");
        let validator = Arc::new(FakeValidator::rejecting(&[&bad]));
        let rotator = rotator(&dir, vec![bad.clone()], validator, CooldownPolicy::default());

        assert_eq!(
            rotator.acquire_at(at(1_000)).await.unwrap_err(),
            AcquisitionFailure::AllCredentialsExhausted
        );

        let state = rotator.state(&bad).await;
        assert!(state.is_failed());
        assert_eq!(state.failed_at(), Some(at(1_000)));
    }

    #[tokio::test]
    async fn test_all_rejected_is_exhausted_after_one_try_each() {
        let dir = tempfile::tempdir().unwrap();
        let a = cookie(&dir, "a.txt", "SID=a");
        let b = cookie(&dir, "b.txt", "SID=b");
        let c = cookie(&dir, "c.txt", "SID=c");
        let validator = Arc::new(FakeValidator::rejecting(&[&a, &b, &c]));
        let rotator = rotator(&dir, vec![a, b, c], validator.clone(), CooldownPolicy::default());

        let result = rotator.acquire_at(at(1_000)).await;

        assert_eq!(result.unwrap_err(), AcquisitionFailure::AllCredentialsExhausted);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejected_copies_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = tempfile::tempdir().unwrap();
        let bad = cookie(&dir, "bad.txt", "SID=bad");
        let validator = Arc::new(FakeValidator::rejecting(&[&bad]));
        let rotator = CredentialRotator::new(
            vec![bad],
            validator,
            CooldownPolicy::default(),
            runtime.path().to_path_buf(),
        );

        let _ = rotator.acquire_at(at(1_000)).await;
        assert_eq!(std::fs::read_dir(runtime.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cooling_cookie_still_served_as_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let only = cookie(&dir, "cookies.txt", "SID=1");
        let rotator = rotator(
            &dir,
            vec![only.clone()],
            Arc::new(FakeValidator::default()),
            CooldownPolicy::default(),
        );

        rotator.acquire_at(at(1_000)).await.unwrap();
        // Well inside the one hour use cooldown.
        let credential = rotator.acquire_at(at(1_010)).await.unwrap();
        assert_eq!(credential.source(), only.as_path());
    }

    #[tokio::test]
    async fn test_concurrent_acquirers_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![
            cookie(&dir, "a.txt", "SID=a"),
            cookie(&dir, "b.txt", "SID=b"),
            cookie(&dir, "c.txt", "SID=c"),
        ];
        let rotator = Arc::new(rotator(
            &dir,
            candidates,
            Arc::new(FakeValidator::default()),
            CooldownPolicy::default(),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let rotator = rotator.clone();
            handles.push(tokio::spawn(async move {
                rotator.acquire().await.map(|c| c.source().to_path_buf())
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_rotation_spreads_across_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![
            cookie(&dir, "a.txt", "SID=a"),
            cookie(&dir, "b.txt", "SID=b"),
            cookie(&dir, "c.txt", "SID=c"),
        ];
        let policy = CooldownPolicy {
            use_cooldown: Duration::ZERO,
            failure_cooldown: Duration::from_secs(6 * 3600),
        };
        let rotator = rotator(&dir, candidates.clone(), Arc::new(FakeValidator::default()), policy);

        let mut counts: HashMap<PathBuf, usize> = HashMap::new();
        for i in 0..300 {
            let credential = rotator.acquire_at(at(10_000 + i)).await.unwrap();
            *counts.entry(credential.source().to_path_buf()).or_default() += 1;
        }

        for candidate in &candidates {
            assert!(counts.get(candidate).copied().unwrap_or(0) > 0);
        }
    }

    #[test]
    fn test_select_prefers_eligible_over_cooling() {
        let policy = CooldownPolicy::default();
        let mut store = CredentialStore::new(vec![]);
        store.mark_used(Path::new("used.txt"), at(1_000));
        let views = vec![
            view("used.txt", store.state(Path::new("used.txt")).clone()),
            view("fresh.txt", CredentialState::default()),
        ];

        let mut rng = fastrand::Rng::with_seed(1);
        for _ in 0..50 {
            assert_eq!(
                select_candidate(&views, &HashSet::new(), at(1_010), &policy, &mut rng),
                Selection::Eligible(PathBuf::from("fresh.txt"))
            );
        }
    }

    #[test]
    fn test_select_failure_cooldown_boundary() {
        let policy = CooldownPolicy::default();
        let failed_at = at(100_000);
        let mut store = CredentialStore::new(vec![]);
        store.mark_failed(Path::new("failed.txt"), failed_at);
        let views = vec![
            view("failed.txt", store.state(Path::new("failed.txt")).clone()),
            view("ok.txt", CredentialState::default()),
        ];
        let mut rng = fastrand::Rng::with_seed(42);

        let during = failed_at + policy.failure_cooldown - Duration::from_secs(1);
        for _ in 0..50 {
            assert_eq!(
                select_candidate(&views, &HashSet::new(), during, &policy, &mut rng),
                Selection::Eligible(PathBuf::from("ok.txt"))
            );
        }

        let after = failed_at + policy.failure_cooldown + Duration::from_secs(1);
        let picked_failed = (0..200).any(|_| {
            select_candidate(&views, &HashSet::new(), after, &policy, &mut rng)
                == Selection::Eligible(PathBuf::from("failed.txt"))
        });
        assert!(picked_failed);
    }

    #[test]
    fn test_select_fallback_is_least_recently_used() {
        let policy = CooldownPolicy::default();
        let mut store = CredentialStore::new(vec![]);
        store.mark_used(Path::new("recent.txt"), at(5_000));
        store.mark_used(Path::new("older.txt"), at(4_000));
        let views = vec![
            view("recent.txt", store.state(Path::new("recent.txt")).clone()),
            view("older.txt", store.state(Path::new("older.txt")).clone()),
        ];
        let mut rng = fastrand::Rng::with_seed(3);

        assert_eq!(
            select_candidate(&views, &HashSet::new(), at(5_001), &policy, &mut rng),
            Selection::Fallback(PathBuf::from("older.txt"))
        );
    }

    #[test]
    fn test_select_skips_excluded_and_absent() {
        let policy = CooldownPolicy::default();
        let mut absent = view("absent.txt", CredentialState::default());
        absent.present = false;
        let views = vec![absent, view("excluded.txt", CredentialState::default())];
        let excluded: HashSet<PathBuf> = [PathBuf::from("excluded.txt")].into_iter().collect();
        let mut rng = fastrand::Rng::with_seed(9);

        assert_eq!(
            select_candidate(&views, &excluded, at(1), &policy, &mut rng),
            Selection::Exhausted
        );
    }

    #[test]
    fn test_select_is_fair_between_eligible() {
        let policy = CooldownPolicy::default();
        let views = vec![
            view("a.txt", CredentialState::default()),
            view("b.txt", CredentialState::default()),
            view("c.txt", CredentialState::default()),
            view("d.txt", CredentialState::default()),
        ];
        let mut rng = fastrand::Rng::with_seed(2024);
        let mut counts: HashMap<PathBuf, usize> = HashMap::new();

        for _ in 0..400 {
            if let Selection::Eligible(locator) =
                select_candidate(&views, &HashSet::new(), at(1), &policy, &mut rng)
            {
                *counts.entry(locator).or_default() += 1;
            }
        }

        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|count| *count >= 50));
    }
}
