//! Cluster-admin credential
//!
//! Administrators are served with the gateway's own service-account token,
//! read once at startup from the standard mount path.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};
use warden_common::{Error, Result};
use zeroize::Zeroizing;

/// Path to the in-cluster service-account token
pub const ADMIN_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Source of the admin token
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenReader: Send + Sync {
    /// Read the token
    async fn read_token(&self) -> Result<String>;
}

/// Reads the token from a file
#[derive(Clone, Debug)]
pub struct FileTokenReader {
    path: PathBuf,
}

impl FileTokenReader {
    /// Reader for an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for FileTokenReader {
    fn default() -> Self {
        Self::new(ADMIN_TOKEN_PATH)
    }
}

#[async_trait]
impl TokenReader for FileTokenReader {
    async fn read_token(&self) -> Result<String> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::credential(format!(
                "failed to read admin token from {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(Error::credential(format!(
                "admin token at {} is empty",
                self.path.display()
            )));
        }
        Ok(token.to_string())
    }
}

/// Load the admin token
///
/// When `required` is set a missing token is an error and the process should
/// not start. Otherwise the failure is logged and administrators will be
/// refused until the gateway is restarted with a token.
pub async fn load_admin_token(
    reader: &dyn TokenReader,
    required: bool,
) -> Result<Option<Zeroizing<String>>> {
    match reader.read_token().await {
        Ok(token) => {
            info!("Loaded admin token");
            Ok(Some(Zeroizing::new(token)))
        }
        Err(e) if required => Err(e),
        Err(e) => {
            warn!(error = %e, "Admin token unavailable, administrator requests will be refused");
            Ok(None)
        }
    }
}
