//! Token pair persistence
//!
//! The access token and the refresh token always travel together: they are
//! saved together and removed together. A store never holds just one of them.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::ApiError;

/// Access/refresh token pair held by the coordinator
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }
}

/// On-disk / in-memory representation of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    access_token: String,
    refresh_token: String,
    saved_at: DateTime<Utc>,
}

impl StoredSession {
    fn from_pair(tokens: &TokenPair) -> Self {
        Self {
            access_token: tokens.access_token.expose_secret().to_string(),
            refresh_token: tokens.refresh_token.expose_secret().to_string(),
            saved_at: Utc::now(),
        }
    }

    fn into_pair(self) -> Option<TokenPair> {
        if self.access_token.is_empty() || self.refresh_token.is_empty() {
            return None;
        }
        Some(TokenPair::new(self.access_token, self.refresh_token))
    }
}

/// Key-value persistence for the session's token pair
pub trait TokenStore: Send + Sync {
    /// Load the persisted pair, if a complete one exists
    fn load(&self) -> Result<Option<TokenPair>, ApiError>;

    /// Persist both tokens
    fn save(&self, tokens: &TokenPair) -> Result<(), ApiError>;

    /// Remove both tokens
    fn clear(&self) -> Result<(), ApiError>;
}

/// Session-scoped store; forgotten when the process exits
#[derive(Default)]
pub struct MemoryTokenStore {
    session: Mutex<Option<StoredSession>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a pair (restored session)
    pub fn with_tokens(tokens: &TokenPair) -> Self {
        Self {
            session: Mutex::new(Some(StoredSession::from_pair(tokens))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenPair>, ApiError> {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        Ok(session.clone().and_then(StoredSession::into_pair))
    }

    fn save(&self, tokens: &TokenPair) -> Result<(), ApiError> {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        *session = Some(StoredSession::from_pair(tokens));
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        *session = None;
        Ok(())
    }
}

/// JSON file store with owner-only permissions
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<TokenPair>, ApiError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<StoredSession>(&json) {
            Ok(session) => Ok(session.into_pair()),
            Err(e) => {
                // A corrupt file is treated as "signed out" rather than a hard error
                warn!("Ignoring unreadable session file {:?}: {}", self.path, e);
                Ok(None)
            }
        }
    }

    fn save(&self, tokens: &TokenPair) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&StoredSession::from_pair(tokens))?;
        std::fs::write(&self.path, json)?;
        ensure_secure_permissions(&self.path)?;
        info!("Session tokens stored in {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!("Session tokens removed from {:?}", self.path);
        }
        Ok(())
    }
}

/// Restrict a file to its owner (0600)
pub fn ensure_secure_permissions(path: &Path) -> Result<(), ApiError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
