//! Process-wide session context.
//!
//! Holds the auth tokens and session identifiers that every network-calling
//! component needs. Components receive a cloned handle and read it fresh on
//! each call; nothing else in the crate keeps its own copy of a token.
//!
//! Two token keys exist. `session_token` (issued by a QR sign-in) is preferred
//! over `access_token` (issued by a username/password login).

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

pub const SESSION_TOKEN_KEY: &str = "session_token";
pub const ACCESS_TOKEN_KEY: &str = "access_token";

const TOKEN_KEYS: [&str; 2] = [SESSION_TOKEN_KEY, ACCESS_TOKEN_KEY];

#[derive(Debug, Default)]
struct SessionState {
    values: HashMap<String, String>,
    class_id: Option<i64>,
    teacher_id: Option<i64>,
}

/// Cloneable handle to the shared session state.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`. Empty values are ignored.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }
        let mut state = self.write()?;
        state.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().ok()?.values.get(key).cloned()
    }

    /// Returns the preferred token: `session_token` first, then `access_token`.
    pub fn token(&self) -> Option<String> {
        let state = self.read().ok()?;
        TOKEN_KEYS
            .iter()
            .find_map(|key| state.values.get(*key).cloned())
    }

    pub fn set_class_id(&self, class_id: i64) -> Result<()> {
        self.write()?.class_id = Some(class_id);
        Ok(())
    }

    pub fn set_teacher_id(&self, teacher_id: i64) -> Result<()> {
        self.write()?.teacher_id = Some(teacher_id);
        Ok(())
    }

    pub fn class_id(&self) -> Option<i64> {
        self.read().ok()?.class_id
    }

    pub fn teacher_id(&self) -> Option<i64> {
        self.read().ok()?.teacher_id
    }

    /// Both identifiers a detection or report call needs, if present.
    pub fn identifiers(&self) -> Option<(i64, i64)> {
        let state = self.read().ok()?;
        Some((state.class_id?, state.teacher_id?))
    }

    /// Logout: drops tokens and identifiers.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.write()?;
        *state = SessionState::default();
        Ok(())
    }

    /// Load a token persisted by [`SessionContext::persist_token_file`].
    ///
    /// The file holds the token on its first line and is stored as the
    /// `access_token`, so a later QR sign-in still takes precedence.
    pub fn load_token_file(&self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read token file {}", path.display()))?;
        let token = raw.lines().next().unwrap_or("").trim();
        if token.is_empty() {
            return Err(anyhow!("token file {} is empty", path.display()));
        }
        self.set(ACCESS_TOKEN_KEY, token)
    }

    pub fn persist_token_file(&self, path: &Path) -> Result<()> {
        let token = self
            .token()
            .ok_or_else(|| anyhow!("no token in session to persist"))?;
        std::fs::write(path, format!("{token}\n"))
            .with_context(|| format!("write token file {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, SessionState>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("session lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, SessionState>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("session lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_token_preferred_over_access_token() {
        let session = SessionContext::new();
        session.set(ACCESS_TOKEN_KEY, "identity").unwrap();
        assert_eq!(session.token().as_deref(), Some("identity"));
        session.set(SESSION_TOKEN_KEY, "monitoring").unwrap();
        assert_eq!(session.token().as_deref(), Some("monitoring"));
    }

    #[test]
    fn clear_drops_tokens_and_identifiers() {
        let session = SessionContext::new();
        session.set(SESSION_TOKEN_KEY, "abc").unwrap();
        session.set_class_id(3).unwrap();
        session.set_teacher_id(7).unwrap();
        assert_eq!(session.identifiers(), Some((3, 7)));

        session.clear().unwrap();
        assert!(session.token().is_none());
        assert!(session.identifiers().is_none());
    }

    #[test]
    fn identifiers_require_both_ids() {
        let session = SessionContext::new();
        session.set_class_id(3).unwrap();
        assert!(session.identifiers().is_none());
    }

    #[test]
    fn clones_share_state() {
        let session = SessionContext::new();
        let handle = session.clone();
        session.set(ACCESS_TOKEN_KEY, "shared").unwrap();
        assert_eq!(handle.token().as_deref(), Some("shared"));
    }

    #[test]
    fn token_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        let session = SessionContext::new();
        session.set(SESSION_TOKEN_KEY, "persist-me").unwrap();
        session.persist_token_file(&path).unwrap();

        let restored = SessionContext::new();
        restored.load_token_file(&path).unwrap();
        assert_eq!(restored.get(ACCESS_TOKEN_KEY).as_deref(), Some("persist-me"));
    }

    #[test]
    fn empty_token_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "\n").unwrap();
        let session = SessionContext::new();
        assert!(session.load_token_file(&path).is_err());
    }
}
