// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Per-client request admission.
//!
//! Every client (identified by forwarded-for address or peer address) keeps a
//! history of admitted request times for the trailing 24 hours. A request is
//! checked against, in order:
//!
//! | Rule | Denial reason |
//! |------|---------------|
//! | admitted requests in the last 24h ≥ daily limit | `daily limit` |
//! | admitted requests in the last hour ≥ hourly limit | `hourly limit` |
//! | time since the last admitted request < minimum interval | `interval` |
//!
//! The limits are conservative ceilings to keep the upstream provider from
//! flagging the gateway, not a fairness mechanism, so a pruned sliding list is
//! enough; this is not a token bucket.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;

use crate::constants::{DAILY_WINDOW, HOURLY_WINDOW};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub min_interval: Duration,
    pub hourly_limit: usize,
    pub daily_limit: usize,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(8),
            hourly_limit: 25,
            daily_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    Interval,
    Hourly,
    Daily,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Interval => "interval",
            Self::Hourly => "hourly limit",
            Self::Daily => "daily limit",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied {
        reason: DenialReason,
        retry_after_secs: u64,
    },
}

pub struct AdmissionController {
    limits: AdmissionLimits,
    clients: Mutex<HashMap<String, VecDeque<SystemTime>>>,
}

impl AdmissionController {
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            limits,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    pub async fn check(&self, client_id: &str) -> Admission {
        self.check_at(client_id, SystemTime::now()).await
    }

    /// Checks and, when admitted, records a request made at `now`.
    #[tracing::instrument(skip(self))]
    pub async fn check_at(&self, client_id: &str, now: SystemTime) -> Admission {
        let mut clients = self.clients.lock().await;
        let history = clients.entry(client_id.to_string()).or_default();

        while history
            .front()
            .is_some_and(|oldest| age(now, *oldest) >= DAILY_WINDOW)
        {
            history.pop_front();
        }

        if history.len() >= self.limits.daily_limit {
            let oldest = history.front().copied().unwrap_or(now);
            return deny(DenialReason::Daily, DAILY_WINDOW.saturating_sub(age(now, oldest)));
        }

        let in_last_hour = history
            .iter()
            .rev()
            .take_while(|at| age(now, **at) < HOURLY_WINDOW)
            .count();
        if in_last_hour >= self.limits.hourly_limit {
            let oldest_in_hour = history
                .get(history.len() - in_last_hour)
                .copied()
                .unwrap_or(now);
            return deny(
                DenialReason::Hourly,
                HOURLY_WINDOW.saturating_sub(age(now, oldest_in_hour)),
            );
        }

        if let Some(latest) = history.back().copied() {
            let since = age(now, latest);
            if since < self.limits.min_interval {
                return deny(DenialReason::Interval, self.limits.min_interval - since);
            }
        }

        // keep the history non-decreasing even if the wall clock steps back
        let stamp = history.back().map_or(now, |latest| now.max(*latest));
        history.push_back(stamp);

        Admission::Admitted
    }

    /// Drops clients with no admitted request in the last 24 hours.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(SystemTime::now()).await
    }

    pub async fn sweep_at(&self, now: SystemTime) -> usize {
        let mut clients = self.clients.lock().await;
        let before = clients.len();
        clients.retain(|_, history| {
            history
                .back()
                .is_some_and(|latest| age(now, *latest) < DAILY_WINDOW)
        });
        before - clients.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.clients.lock().await.len()
    }
}

fn age(now: SystemTime, at: SystemTime) -> Duration {
    now.duration_since(at).unwrap_or(Duration::ZERO)
}

fn deny(reason: DenialReason, wait: Duration) -> Admission {
    let retry_after_secs = (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1);
    tracing::info!(
        "[gateway] request denied ({}), retry after {}s",
        reason,
        retry_after_secs
    );
    Admission::Denied {
        reason,
        retry_after_secs,
    }
}
