// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Cookie pool management.
//!
//! The gateway presents an authenticated identity to the upstream provider by
//! handing `yt-dlp` a Netscape cookie file. Several cookie files may be
//! configured; this module decides which one a request gets.
//!
//! - [`store`]: the ordered candidate list and per-cookie lifecycle state
//! - [`validator`]: a liveness probe run against a fixed reference video
//! - [`rotator`]: selection, cooldowns, and the bounded retry-with-exclusion loop
//!
//! A cookie file is never handed out directly. The rotator copies it into a
//! private [`MaterializedCredential`] that lives for one operation and is
//! deleted when dropped.

pub mod rotator;
pub mod store;
pub mod validator;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::constants::{MATERIALIZED_PREFIX, MAX_COOKIE_FILE_BYTES};
use crate::resolver::AuthContext;
use store::has_material;

pub use rotator::CredentialRotator;
pub use store::{CooldownPolicy, CredentialState, CredentialStore};
pub use validator::{CredentialValidator, ProbeValidator};

/// Why no credential could be handed out.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionFailure {
    #[error("no cookie files are configured or present")]
    NoCredentialsConfigured,
    #[error("every configured cookie file failed validation")]
    AllCredentialsExhausted,
}

#[derive(thiserror::Error, Debug)]
pub enum MaterializeError {
    #[error("cookie file is empty")]
    Empty,
    #[error("cookie file is larger than {} bytes", MAX_COOKIE_FILE_BYTES)]
    TooLarge,
    #[error("unable to copy cookie file: {0}")]
    Io(#[from] std::io::Error),
    #[error("materialization task was interrupted")]
    Interrupted,
}

/// A private, single-use copy of a cookie file.
///
/// The copy is created with owner-only permissions inside the runtime
/// directory and removed from disk when this value is dropped.
pub struct MaterializedCredential {
    source: PathBuf,
    file: NamedTempFile,
}

impl MaterializedCredential {
    /// Copies `source` into a fresh temporary file under `runtime_dir`.
    ///
    /// # Errors
    ///
    /// - [`MaterializeError::Empty`] - the source holds only whitespace
    /// - [`MaterializeError::TooLarge`] - the source exceeds the size cap
    /// - [`MaterializeError::Io`] - the source cannot be read or the copy
    ///   cannot be written
    pub async fn materialize(
        source: PathBuf,
        runtime_dir: PathBuf,
    ) -> Result<Self, MaterializeError> {
        tokio::task::spawn_blocking(move || Self::materialize_blocking(source, &runtime_dir))
            .await
            .map_err(|_| MaterializeError::Interrupted)?
    }

    fn materialize_blocking(source: PathBuf, runtime_dir: &Path) -> Result<Self, MaterializeError> {
        if std::fs::metadata(&source)?.len() > MAX_COOKIE_FILE_BYTES {
            return Err(MaterializeError::TooLarge);
        }
        let material = Zeroizing::new(std::fs::read(&source)?);
        if !has_material(&material) {
            return Err(MaterializeError::Empty);
        }

        let mut file = tempfile::Builder::new()
            .prefix(MATERIALIZED_PREFIX)
            .suffix(".txt")
            .tempfile_in(runtime_dir)?;
        file.write_all(&material)?;
        file.flush()?;

        Ok(Self { source, file })
    }

    /// The configured cookie file this copy was taken from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Location of the private copy.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn auth_context(&self) -> AuthContext<'_> {
        AuthContext {
            cookie_file: self.path(),
        }
    }
}

impl fmt::Debug for MaterializedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedCredential")
            .field("source", &self.source)
            .field("path", &self.file.path())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_materialize_copies_content() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cookies.txt");
        std::fs::write(&source, "# Netscape HTTP Cookie File\n").unwrap();

        let credential = MaterializedCredential::materialize(source.clone(), dir.path().into())
            .await
            .unwrap();

        assert_eq!(credential.source(), source.as_path());
        assert_ne!(credential.path(), source.as_path());
        assert_eq!(
            std::fs::read_to_string(credential.path()).unwrap(),
            "# Netscape HTTP Cookie File\n"
        );
    }

    #[tokio::test]
    async fn test_copy_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cookies.txt");
        std::fs::write(&source, "SID=1").unwrap();

        let credential = MaterializedCredential::materialize(source.clone(), dir.path().into())
            .await
            .unwrap();
        let copy = credential.path().to_path_buf();
        assert!(copy.exists());

        drop(credential);
        assert!(!copy.exists());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_whitespace_only_source_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cookies.txt");
        std::fs::write(&source, "  \n\t").unwrap();

        let result = MaterializedCredential::materialize(source, dir.path().into()).await;
        assert!(matches!(result, Err(MaterializeError::Empty)));
    }

    #[tokio::test]
    async fn test_oversized_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cookies.txt");
        std::fs::write(&source, vec![b'a'; MAX_COOKIE_FILE_BYTES as usize + 1]).unwrap();

        let result = MaterializedCredential::materialize(source, dir.path().into()).await;
        assert!(matches!(result, Err(MaterializeError::TooLarge)));
    }

    #[tokio::test]
    async fn test_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            MaterializedCredential::materialize(dir.path().join("absent.txt"), dir.path().into())
                .await;
        assert!(matches!(result, Err(MaterializeError::Io(_))));
    }

    #[tokio::test]
    async fn test_debug_does_not_print_material() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cookies.txt");
        std::fs::write(&source, "SID=topsecret").unwrap();

        let credential = MaterializedCredential::materialize(source, dir.path().into())
            .await
            .unwrap();
        assert!(!format!("{:?}", credential).contains("topsecret"));
    }
}
