//! Per-source HTTP sessions.
//!
//! A session is the cookie jar a source's HTTP client starts with, plus the
//! user agent those cookies were minted under. Sessions are only ever read
//! or replaced as a whole, and each one is persisted as
//! `<dir>/<source_id>.json` so it survives restarts.

use crate::models::HttpClientKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix timestamp; `None` for session cookies
    pub expires: Option<i64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl StoredCookie {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires, Some(at) if at <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub source_id: String,
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub client_kind: HttpClientKind,
    /// User agent of the browser that produced the cookies
    pub user_agent: Option<String>,
    pub created_at: i64,
    /// Set when a challenge completed without the site issuing a clearance cookie
    #[serde(default)]
    pub placeholder_clearance: bool,
}

impl Session {
    pub fn new(source_id: impl Into<String>, client_kind: HttpClientKind) -> Self {
        Self {
            source_id: source_id.into(),
            cookies: Vec::new(),
            client_kind,
            user_agent: None,
            created_at: Utc::now().timestamp(),
            placeholder_clearance: false,
        }
    }

    /// Cookies that have not expired yet
    pub fn live_cookies(&self) -> impl Iterator<Item = &StoredCookie> {
        let now = Utc::now().timestamp();
        self.cookies.iter().filter(move |c| !c.is_expired(now))
    }

    pub fn has_clearance(&self, cookie_name: &str) -> bool {
        self.placeholder_clearance || self.live_cookies().any(|c| c.name == cookie_name)
    }

    /// Add cookies, replacing any with the same name, domain and path
    pub fn merge_cookies(&mut self, cookies: impl IntoIterator<Item = StoredCookie>) {
        for cookie in cookies {
            self.cookies
                .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
            self.cookies.push(cookie);
        }
    }
}

pub struct SessionStore {
    dir: Option<PathBuf>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Store persisting sessions under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Store that forgets everything on exit
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn file_for(dir: &Path, source_id: &str) -> PathBuf {
        let safe: String = source_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        dir.join(format!("{}.json", safe))
    }

    fn load_session(file_path: &Path) -> Result<Session, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(file_path)?;
        let session: Session = serde_json::from_str(&content)?;
        Ok(session)
    }

    /// Current session for a source, loading it from disk on first access
    pub fn get(&self, source_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get(source_id) {
            return Some(session.clone());
        }

        let dir = self.dir.as_ref()?;
        let path = Self::file_for(dir, source_id);
        if !path.exists() {
            return None;
        }
        match Self::load_session(&path) {
            Ok(session) => {
                log::debug!("Restored {} cookies for {}", session.cookies.len(), source_id);
                sessions.insert(source_id.to_string(), session.clone());
                Some(session)
            }
            Err(e) => {
                log::warn!("Discarding unreadable session file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Replace the whole session of `session.source_id` and persist it.
    ///
    /// The in-memory copy is updated even when writing the file fails.
    pub fn replace(&self, session: Session) -> io::Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.source_id.clone(), session.clone());

        if let Some(dir) = &self.dir {
            fs::create_dir_all(dir)?;
            let path = Self::file_for(dir, &session.source_id);
            let tmp = path.with_extension("json.tmp");
            let content = serde_json::to_string_pretty(&session)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            fs::write(&tmp, content)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    /// Forget a session after a live request proved it stale
    pub fn invalidate(&self, source_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(source_id);
        if let Some(dir) = &self.dir {
            let path = Self::file_for(dir, source_id);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("Could not remove session file {}: {}", path.display(), e);
                }
            }
        }
        log::info!("Session for {} invalidated", source_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, expires: Option<i64>) -> StoredCookie {
        StoredCookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: "example.com".to_string(),
            path: "/".to_string(),
            expires,
            secure: false,
            http_only: true,
        }
    }

    #[test]
    fn test_clearance_ignores_expired_cookies() {
        let mut session = Session::new("s", HttpClientKind::Impersonating);
        session.cookies.push(cookie("cf_clearance", Some(1)));
        assert!(!session.has_clearance("cf_clearance"));

        session.merge_cookies(vec![cookie("cf_clearance", None)]);
        assert_eq!(session.cookies.len(), 1);
        assert!(session.has_clearance("cf_clearance"));
    }

    #[test]
    fn test_placeholder_counts_as_clearance() {
        let mut session = Session::new("s", HttpClientKind::Default);
        assert!(!session.has_clearance("cf_clearance"));
        session.placeholder_clearance = true;
        assert!(session.has_clearance("cf_clearance"));
    }

    #[test]
    fn test_sessions_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new("site/one", HttpClientKind::Impersonating);
        session.user_agent = Some("UA".into());
        session.cookies.push(cookie("cf_clearance", None));

        SessionStore::new(dir.path()).replace(session.clone()).unwrap();

        let reopened = SessionStore::new(dir.path());
        assert_eq!(reopened.get("site/one"), Some(session));

        reopened.invalidate("site/one");
        assert_eq!(SessionStore::new(dir.path()).get("site/one"), None);
    }

    #[test]
    fn test_unwritable_dir_keeps_session_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let store = SessionStore::new(blocker.clone());

        let mut session = Session::new("site", HttpClientKind::Impersonating);
        session.cookies.push(cookie("cf_clearance", None));

        assert!(store.replace(session.clone()).is_err());
        assert_eq!(store.get("site"), Some(session));
    }
}
