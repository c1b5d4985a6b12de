//! Credential record and on-disk token cache

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::StoreError;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// One issued token pair. Replaced wholesale on every successful grant,
/// never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Validity in seconds as reported by the server at issuance.
    pub expires_in: u64,
    /// Unix seconds after which the token must not be used
    /// (issuance + expires_in - safety margin).
    pub expires_at: u64,
}

impl Credential {
    /// Build a credential from a fresh grant, deriving `expires_at` with the
    /// configured safety margin.
    pub fn new(
        access_token: String,
        refresh_token: String,
        expires_in: u64,
        safety_margin_secs: u64,
    ) -> Self {
        let expires_at = unix_now() + expires_in.saturating_sub(safety_margin_secs);
        Self {
            access_token,
            refresh_token,
            expires_in,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        unix_now() >= self.expires_at
    }
}

/// Durable cache for a single credential: one JSON file, one writer.
///
/// Stores `expires_at` verbatim; expiry interpretation lives in the manager.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached credential, distinguishing "absent" from "unreadable".
    pub fn load(&self) -> Result<Credential, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Overwrite the cache. Writes to a temp sibling and renames so a crash
    /// mid-write leaves either the old record or nothing parseable as new.
    pub fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = serde_json::to_string_pretty(credential)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;

        // Restrict permissions before the record becomes visible (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Remove the cache file. Absence is not an error.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_credential() -> Credential {
        Credential::new("access-a".to_string(), "refresh-r".to_string(), 600, 10)
    }

    #[test]
    fn test_expires_at_subtracts_safety_margin() {
        let before = unix_now();
        let cred = Credential::new("a".to_string(), "r".to_string(), 600, 10);
        let after = unix_now();
        assert!(cred.expires_at >= before + 590);
        assert!(cred.expires_at <= after + 590);
        assert!(!cred.is_expired());
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let mut cred = sample_credential();
        cred.expires_at = unix_now() - 1;
        assert!(cred.is_expired());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));

        let cred = sample_credential();
        store.save(&cred).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, cred);
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        assert!(matches!(store.load(), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "{not json").unwrap();

        let store = TokenStore::new(path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_save_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));

        store.save(&sample_credential()).unwrap();
        let newer = Credential::new("access-b".to_string(), "refresh-r2".to_string(), 600, 10);
        store.save(&newer).unwrap();

        assert_eq!(store.load().unwrap().access_token, "access-b");
        // No temp file left behind
        assert!(!dir.path().join("token.json.tmp").exists());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));

        store.save(&sample_credential()).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(matches!(store.load(), Err(StoreError::NotFound)));
    }
}
