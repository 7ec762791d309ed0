use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

const USERNAME_CONSTRAINT: &str = "users_username_key";
const EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already exists")]
    UsernameTaken,
    #[error("email already exists")]
    EmailTaken,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence for user accounts.
///
/// Implementations must enforce username and email uniqueness themselves;
/// `insert` reports a violation as [`StoreError::UsernameTaken`] or
/// [`StoreError::EmailTaken`] even when a caller's pre-check raced.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError>;
    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)"#,
        )
        .bind(username)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)"#,
        )
        .bind(email)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, roles, enabled, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, roles, enabled)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, username, email, password_hash, roles, enabled, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.roles)
        .bind(user.enabled)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)
    }
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(USERNAME_CONSTRAINT) => return StoreError::UsernameTaken,
                Some(EMAIL_CONSTRAINT) => return StoreError::EmailTaken,
                _ => {}
            }
        }
    }
    StoreError::Database(err)
}

#[derive(Default)]
struct MemoryTables {
    by_id: HashMap<Uuid, User>,
    username_idx: HashMap<String, Uuid>,
    email_idx: HashMap<String, Uuid>,
}

/// In-process store; one write lock covers both unique indexes.
#[derive(Default)]
pub struct MemoryUserStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.tables.read().await.by_id.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.username_idx.contains_key(username))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.email_idx.contains_key(email))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .username_idx
            .get(username)
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.username_idx.contains_key(&user.username) {
            return Err(StoreError::UsernameTaken);
        }
        if tables.email_idx.contains_key(&user.email) {
            return Err(StoreError::EmailTaken);
        }
        let stored = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            roles: user.roles,
            enabled: user.enabled,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.username_idx.insert(stored.username.clone(), stored.id);
        tables.email_idx.insert(stored.email.clone(), stored.id);
        tables.by_id.insert(stored.id, stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "$argon2id$placeholder".into(),
            roles: "ROLE_USER".into(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn insert_then_lookup() {
        let store = MemoryUserStore::new();
        let created = store.insert(new_user("alice", "alice@x.com")).await.unwrap();

        assert!(store.exists_by_username("alice").await.unwrap());
        assert!(store.exists_by_email("alice@x.com").await.unwrap());
        assert!(!store.exists_by_username("bob").await.unwrap());

        let found = store.find_by_username("alice").await.unwrap().expect("user present");
        assert_eq!(found.id, created.id);
        assert_eq!(found.email, "alice@x.com");
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_username_then_email() {
        let store = MemoryUserStore::new();
        store.insert(new_user("alice", "alice@x.com")).await.unwrap();

        let err = store.insert(new_user("alice", "other@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::UsernameTaken));

        let err = store.insert(new_user("bob", "alice@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken));

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_keep_usernames_unique() {
        let store = Arc::new(MemoryUserStore::new());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.insert(new_user("racer", &format!("racer{i}@x.com"))).await
            }));
        }
        let mut ok = 0;
        for t in tasks {
            if t.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn non_database_errors_pass_through() {
        let err = map_unique_violation(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn constraint_names_match_migration() {
        let migration = include_str!("../../migrations/0001_create_users.sql");
        assert!(migration.contains(&format!("CONSTRAINT {USERNAME_CONSTRAINT} UNIQUE (username)")));
        assert!(migration.contains(&format!("CONSTRAINT {EMAIL_CONSTRAINT} UNIQUE (email)")));
    }
}
