use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_ROLE: &str = "ROLE_USER";

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,      // Argon2 PHC string, never exposed in JSON
    pub roles: String,              // comma-delimited, e.g. "ROLE_USER,ROLE_ADMIN"
    pub enabled: bool,
    pub created_at: OffsetDateTime,
}

impl User {
    /// Role names parsed from the stored comma-delimited list.
    pub fn role_list(&self) -> Vec<String> {
        parse_roles(&self.roles)
    }
}

/// Fields supplied when inserting a user; id and created_at come from the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: String,
    pub enabled: bool,
}

pub fn parse_roles(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_roles() {
        assert_eq!(
            parse_roles("ROLE_USER,ROLE_ADMIN"),
            vec!["ROLE_USER".to_string(), "ROLE_ADMIN".to_string()]
        );
    }

    #[test]
    fn drops_blank_entries_and_whitespace() {
        assert_eq!(parse_roles(" ROLE_USER , ,"), vec!["ROLE_USER".to_string()]);
        assert!(parse_roles("").is_empty());
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@x.com".into(),
            password_hash: "$argon2id$secret".into(),
            roles: DEFAULT_ROLE.into(),
            enabled: true,
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("alice@x.com"));
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("secret"));
    }
}
