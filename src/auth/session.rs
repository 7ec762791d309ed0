use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};
use dashmap::DashMap;
use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use serde::Serialize;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::config::SessionConfig;

const SESSION_ID_BYTES: usize = 32;

/// The authenticated identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone)]
struct Session {
    principal: Principal,
    expires_at: OffsetDateTime,
}

/// Server-side sessions keyed by an opaque random id carried in a cookie.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Session>>,
    ttl: Duration,
    cookie_name: String,
    cookie_secure: bool,
    expired_cookie: HeaderValue,
}

pub(crate) fn is_valid_session_id(id: &str) -> bool {
    lazy_static! {
        static ref SESSION_ID_RE: Regex = Regex::new(r"^[0-9a-f]{64}$").unwrap();
    }
    SESSION_ID_RE.is_match(id)
}

impl SessionStore {
    pub fn new(cfg: &SessionConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let expired_cookie = HeaderValue::from_str(&format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            cfg.cookie_name
        ))?;
        Ok(Self {
            sessions: Arc::new(DashMap::new()),
            ttl: Duration::minutes(cfg.ttl_minutes),
            cookie_name: cfg.cookie_name.clone(),
            cookie_secure: cfg.cookie_secure,
            expired_cookie,
        })
    }

    /// Starts a session for `principal` and returns its id.
    pub fn create(&self, principal: Principal) -> String {
        let now = OffsetDateTime::now_utc();
        self.sessions.retain(|_, s| s.expires_at > now);

        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let id = hex::encode(bytes);

        debug!(username = %principal.username, "session created");
        self.sessions.insert(
            id.clone(),
            Session {
                principal,
                expires_at: now
                    .checked_add(self.ttl)
                    .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc()),
            },
        );
        id
    }

    /// Returns the principal for a live session; expired entries are dropped.
    pub fn get(&self, id: &str) -> Option<Principal> {
        if !is_valid_session_id(id) {
            return None;
        }
        let now = OffsetDateTime::now_utc();
        let principal = {
            let entry = self.sessions.get(id)?;
            (entry.expires_at > now).then(|| entry.principal.clone())
        };
        if principal.is_none() {
            debug!("session expired");
            self.sessions.remove(id);
        }
        principal
    }

    pub fn invalidate(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Session id from the request's `Cookie` headers, if any.
    pub fn session_id(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim().to_string())
    }

    /// Principal for the session named by the request's cookie.
    pub fn principal(&self, headers: &HeaderMap) -> Option<Principal> {
        self.session_id(headers).and_then(|id| self.get(&id))
    }

    pub fn cookie(&self, id: &str) -> anyhow::Result<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.cookie_name,
            id,
            self.ttl.whole_seconds()
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        Ok(HeaderValue::from_str(&cookie)?)
    }

    pub fn expired_cookie(&self) -> HeaderValue {
        self.expired_cookie.clone()
    }

    #[cfg(test)]
    pub(crate) fn force_expire(&self, id: &str) {
        if let Some(mut s) = self.sessions.get_mut(id) {
            s.expires_at = OffsetDateTime::now_utc() - Duration::seconds(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn store() -> SessionStore {
        SessionStore::new(&AppConfig::for_tests().session).expect("test session config is valid")
    }

    fn alice() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            username: "alice".into(),
            roles: vec!["ROLE_USER".into()],
        }
    }

    #[test]
    fn create_then_get() {
        let sessions = store();
        let id = sessions.create(alice());
        assert!(is_valid_session_id(&id));
        let p = sessions.get(&id).expect("live session");
        assert_eq!(p.username, "alice");
        assert_eq!(p.roles, vec!["ROLE_USER".to_string()]);
    }

    #[test]
    fn ids_are_unique() {
        let sessions = store();
        let a = sessions.create(alice());
        let b = sessions.create(alice());
        assert_ne!(a, b);
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn invalidate_removes_session() {
        let sessions = store();
        let id = sessions.create(alice());
        assert!(sessions.invalidate(&id));
        assert!(sessions.get(&id).is_none());
        assert!(!sessions.invalidate(&id));
    }

    #[test]
    fn expired_session_is_dropped() {
        let sessions = store();
        let id = sessions.create(alice());
        sessions.force_expire(&id);
        assert!(sessions.get(&id).is_none());
        assert_eq!(sessions.len(), 0);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        let sessions = store();
        assert!(sessions.get("").is_none());
        assert!(sessions.get("not-hex").is_none());
        assert!(sessions.get(&"A".repeat(64)).is_none());
    }

    #[test]
    fn reads_session_id_from_cookie_header() {
        let sessions = store();
        let id = sessions.create(alice());
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; SESSIONID={id}; lang=en")).unwrap(),
        );
        assert_eq!(sessions.session_id(&headers).as_deref(), Some(id.as_str()));
        assert_eq!(sessions.principal(&headers).unwrap().username, "alice");
    }

    #[test]
    fn cookie_attributes() {
        let sessions = store();
        let cookie = sessions.cookie("abc").unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("SESSIONID=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=1800"));
        assert!(!cookie.contains("Secure"));

        let expired = sessions.expired_cookie();
        assert!(expired.to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn rejects_out_of_range_ttl_and_bad_cookie_name() {
        let mut cfg = AppConfig::for_tests().session;
        cfg.ttl_minutes = 1_000_000_000_000;
        assert!(SessionStore::new(&cfg).is_err());
        cfg.ttl_minutes = i64::MAX;
        assert!(SessionStore::new(&cfg).is_err());

        let mut cfg = AppConfig::for_tests().session;
        cfg.cookie_name = "bad\nname".into();
        assert!(SessionStore::new(&cfg).is_err());
    }

    #[test]
    fn longest_ttl_creates_live_session() {
        let mut cfg = AppConfig::for_tests().session;
        cfg.ttl_minutes = crate::config::MAX_SESSION_TTL_MINUTES;
        let sessions = SessionStore::new(&cfg).unwrap();
        let id = sessions.create(alice());
        assert!(sessions.get(&id).is_some());
        let cookie = sessions.cookie(&id).unwrap();
        assert!(cookie.to_str().unwrap().contains("Max-Age=31536000"));
    }
}
