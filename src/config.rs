use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

/// One year.
pub const MAX_SESSION_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
    pub cookie_name: String,
    pub cookie_secure: bool,
}

impl SessionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=MAX_SESSION_TTL_MINUTES).contains(&self.ttl_minutes) {
            anyhow::bail!(
                "SESSION_TTL_MINUTES must be between 1 and {MAX_SESSION_TTL_MINUTES}, got {}",
                self.ttl_minutes
            );
        }
        if !is_valid_cookie_name(&self.cookie_name) {
            anyhow::bail!(
                "SESSION_COOKIE_NAME {:?} is not a valid cookie name",
                self.cookie_name
            );
        }
        Ok(())
    }
}

/// RFC 6265 cookie-name token characters.
fn is_valid_cookie_name(name: &str) -> bool {
    lazy_static! {
        static ref COOKIE_NAME_RE: Regex =
            Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").unwrap();
    }
    COOKIE_NAME_RE.is_match(name)
}

/// Argon2 cost parameters used when hashing new passwords.
#[derive(Debug, Clone, Deserialize)]
pub struct HasherConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub session: SessionConfig,
    pub hasher: HasherConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let session = SessionConfig {
            ttl_minutes: env_parse("SESSION_TTL_MINUTES")?.unwrap_or(30),
            cookie_name: std::env::var("SESSION_COOKIE_NAME").unwrap_or_else(|_| "SESSIONID".into()),
            cookie_secure: env_parse("SESSION_COOKIE_SECURE")?.unwrap_or(false),
        };
        let defaults = HasherConfig::default();
        let hasher = HasherConfig {
            memory_kib: env_parse("ARGON2_MEMORY_KIB")?.unwrap_or(defaults.memory_kib),
            iterations: env_parse("ARGON2_ITERATIONS")?.unwrap_or(defaults.iterations),
            parallelism: env_parse("ARGON2_PARALLELISM")?.unwrap_or(defaults.parallelism),
        };
        session.validate()?;
        Ok(Self {
            database_url,
            session,
            hasher,
        })
    }

    /// Config for tests: memory store and the cheapest Argon2 parameters.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            session: SessionConfig {
                ttl_minutes: 30,
                cookie_name: "SESSIONID".into(),
                cookie_secure: false,
            },
            hasher: HasherConfig {
                memory_kib: argon2::Params::MIN_M_COST,
                iterations: argon2::Params::MIN_T_COST,
                parallelism: argon2::Params::MIN_P_COST,
            },
        }
    }
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hasher_defaults_match_argon2() {
        let cfg = HasherConfig::default();
        assert_eq!(cfg.memory_kib, argon2::Params::DEFAULT_M_COST);
        assert_eq!(cfg.iterations, argon2::Params::DEFAULT_T_COST);
        assert_eq!(cfg.parallelism, argon2::Params::DEFAULT_P_COST);
    }

    #[test]
    fn env_parse_reports_key_on_bad_value() {
        std::env::set_var("AUTHGATE_TEST_BAD_NUMBER", "twelve");
        let err = env_parse::<u32>("AUTHGATE_TEST_BAD_NUMBER").unwrap_err();
        assert!(err.to_string().contains("AUTHGATE_TEST_BAD_NUMBER"));
        std::env::remove_var("AUTHGATE_TEST_BAD_NUMBER");
    }

    fn session(ttl_minutes: i64, cookie_name: &str) -> SessionConfig {
        SessionConfig {
            ttl_minutes,
            cookie_name: cookie_name.into(),
            cookie_secure: false,
        }
    }

    #[test]
    fn session_ttl_must_be_within_a_year() {
        assert!(session(30, "SESSIONID").validate().is_ok());
        assert!(session(MAX_SESSION_TTL_MINUTES, "SESSIONID").validate().is_ok());

        for ttl in [0, -5, MAX_SESSION_TTL_MINUTES + 1, 1_000_000_000_000, i64::MAX] {
            let err = session(ttl, "SESSIONID").validate().unwrap_err();
            assert!(err.to_string().contains("SESSION_TTL_MINUTES"), "ttl {ttl}");
        }
    }

    #[test]
    fn cookie_name_must_be_a_token() {
        assert!(session(30, "__Host-sid").validate().is_ok());
        for name in ["", "my session", "sid;x", "sid=1", "s\u{e9}ssion", "sid\n"] {
            let err = session(30, name).validate().unwrap_err();
            assert!(err.to_string().contains("SESSION_COOKIE_NAME"), "name {name:?}");
        }
    }

    #[test]
    fn test_config_is_valid() {
        AppConfig::for_tests().session.validate().unwrap();
    }

    #[test]
    fn env_parse_missing_is_none() {
        let v = env_parse::<u32>("AUTHGATE_TEST_SURELY_UNSET").unwrap();
        assert!(v.is_none());
    }
}
