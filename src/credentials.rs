//! Data-upload API credentials.
//!
//! Read from a small JSON file: `{"api_key": "...", "api_key_id": "..."}`.

use serde::Deserialize;
use std::path::Path;

use crate::error::{AppResult, KettleError};

/// Well-known location of the credentials file.
pub const DEFAULT_CREDENTIALS_PATH: &str = "/etc/kettle-cycle/data-credentials.json";

/// API key pair for the dataset upload service.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct DataCredentials {
    /// Secret key
    #[serde(default)]
    pub api_key: String,
    /// Key identifier
    #[serde(default)]
    pub api_key_id: String,
}

impl std::fmt::Debug for DataCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCredentials")
            .field("api_key", &"<redacted>")
            .field("api_key_id", &self.api_key_id)
            .finish()
    }
}

impl DataCredentials {
    /// Read and check the credentials file at `path`.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            KettleError::Credentials(format!(
                "reading credentials file {}: {e}",
                path.display()
            ))
        })?;
        let creds: Self = serde_json::from_str(&data).map_err(|e| {
            KettleError::Credentials(format!(
                "parsing credentials file {}: {e}",
                path.display()
            ))
        })?;
        if creds.api_key.is_empty() || creds.api_key_id.is_empty() {
            return Err(KettleError::Credentials(
                "credentials file missing api_key or api_key_id".to_string(),
            ));
        }
        Ok(creds)
    }
}
