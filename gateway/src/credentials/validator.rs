// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::MaterializedCredential;
use crate::constants::UPSTREAM_LOG_LIMIT;
use crate::resolver::{MediaResolver, truncate_for_log};

/// Decides whether a cookie file is still accepted upstream.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Never fails: any error counts as `false`.
    async fn validate(&self, credential: &MaterializedCredential) -> bool;
}

/// Validates a cookie file by resolving a reference video that is always
/// available. One probe costs one upstream round trip per rotation event.
pub struct ProbeValidator {
    resolver: Arc<dyn MediaResolver>,
    probe_url: String,
    timeout: Duration,
}

impl ProbeValidator {
    pub fn new(resolver: Arc<dyn MediaResolver>, probe_url: String, timeout: Duration) -> Self {
        Self {
            resolver,
            probe_url,
            timeout,
        }
    }
}

#[async_trait]
impl CredentialValidator for ProbeValidator {
    #[tracing::instrument(skip_all, fields(source = %credential.source().display()))]
    async fn validate(&self, credential: &MaterializedCredential) -> bool {
        let probe = self
            .resolver
            .resolve_metadata(&self.probe_url, credential.auth_context());

        match tokio::time::timeout(self.timeout, probe).await {
            Ok(Ok(info)) if info.title.as_deref().is_some_and(|t| !t.trim().is_empty()) => {
                tracing::debug!("[gateway] cookie probe succeeded");
                true
            }
            Ok(Ok(_)) => {
                tracing::warn!("[gateway] cookie probe returned empty metadata");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    kind = %e.kind,
                    "[gateway] cookie probe failed: {}",
                    truncate_for_log(&e.detail, UPSTREAM_LOG_LIMIT)
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    "[gateway] cookie probe timed out after {:?}",
                    self.timeout
                );
                false
            }
        }
    }
}
