//! Persistence of per-account OAuth2 credentials

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::Credential;

/// Key-value store of credentials keyed by account id
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the credential for an account, `None` when it was never authorized
    async fn load(&self, account_id: &str) -> Result<Option<Credential>>;

    /// Persist the credential for an account, replacing any previous one
    async fn save(&self, account_id: &str, credential: &Credential) -> Result<()>;

    /// Forget an account's credential (used by `auth --force`)
    async fn remove(&self, account_id: &str) -> Result<()>;
}

/// On-disk record, one JSON file per account
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenRecord {
    access_token: String,
    refresh_token: String,
    /// Lifetime of the access token in seconds
    expire_in: i64,
    /// Unix timestamp the access token was issued at
    created_at: i64,
}

impl TokenRecord {
    fn from_credential(credential: &Credential, now: DateTime<Utc>) -> Self {
        Self {
            access_token: credential.access_token.clone(),
            refresh_token: credential.refresh_token.clone(),
            expire_in: (credential.expires_at - now).num_seconds().max(0),
            created_at: now.timestamp(),
        }
    }

    fn into_credential(self, account_id: &str) -> Credential {
        let created_at = DateTime::from_timestamp(self.created_at, 0).unwrap_or(DateTime::UNIX_EPOCH);
        Credential {
            account_id: account_id.to_string(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: created_at + Duration::seconds(self.expire_in),
        }
    }
}

/// Stores each account's credential at `<dir>/<account_id>.json`
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, account_id: &str) -> PathBuf {
        let file_name: String = account_id
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, account_id: &str) -> Result<Option<Credential>> {
        let path = self.path_for(account_id);
        if !path.exists() {
            tracing::debug!("No cached token for {} at {:?}", account_id, path);
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(&path).await?;
        let record: TokenRecord = serde_json::from_str(&json)?;
        tracing::debug!("Found cached token for {} at {:?}", account_id, path);
        Ok(Some(record.into_credential(account_id)))
    }

    async fn save(&self, account_id: &str, credential: &Credential) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(account_id);
        let record = TokenRecord::from_credential(credential, Utc::now());
        let json = serde_json::to_string_pretty(&record)?;
        tokio::fs::write(&path, json).await?;
        secure_token_file(&path).await?;

        tracing::debug!("Saved token for {} to {:?}", account_id, path);
        Ok(())
    }

    async fn remove(&self, account_id: &str) -> Result<()> {
        let path = self.path_for(account_id);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
            tracing::info!("Removed cached token {:?}", path);
        }
        Ok(())
    }
}

/// Process-local store, for automation and tests
#[derive(Default)]
pub struct MemoryTokenStore {
    credentials: Mutex<HashMap<String, Credential>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        let mut credentials = HashMap::new();
        credentials.insert(credential.account_id.clone(), credential);
        Self {
            credentials: Mutex::new(credentials),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, account_id: &str) -> Result<Option<Credential>> {
        Ok(self.credentials.lock().await.get(account_id).cloned())
    }

    async fn save(&self, account_id: &str, credential: &Credential) -> Result<()> {
        self.credentials
            .lock()
            .await
            .insert(account_id.to_string(), credential.clone());
        Ok(())
    }

    async fn remove(&self, account_id: &str) -> Result<()> {
        self.credentials.lock().await.remove(account_id);
        Ok(())
    }
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows relies on the user profile ACLs
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
