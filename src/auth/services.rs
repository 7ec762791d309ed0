use tracing::{info, warn};

use crate::{
    auth::{
        password::PasswordHasher,
        repo::UserStore,
        repo_types::{NewUser, User, DEFAULT_ROLE},
        session::Principal,
    },
    error::AuthError,
};

/// Creates an account with the default role, enabled.
///
/// Uniqueness is checked up front for a clean error, and again by the store
/// on insert so two racing registrations cannot both succeed.
pub async fn register_user(
    users: &dyn UserStore,
    hasher: &PasswordHasher,
    username: &str,
    email: &str,
    password: &str,
) -> Result<User, AuthError> {
    if users.exists_by_username(username).await? {
        warn!(%username, "username already taken");
        return Err(AuthError::DuplicateUsername);
    }
    if users.exists_by_email(email).await? {
        warn!(%email, "email already in use");
        return Err(AuthError::DuplicateEmail);
    }

    let password_hash = hasher.hash_blocking(password.to_owned()).await?;

    let user = users
        .insert(NewUser {
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash,
            roles: DEFAULT_ROLE.to_owned(),
            enabled: true,
        })
        .await
        .map_err(|e| {
            warn!(%username, error = %e, "insert rejected");
            AuthError::from(e)
        })?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

/// Checks a username/password pair and returns the principal to attach to a session.
pub async fn authenticate(
    users: &dyn UserStore,
    hasher: &PasswordHasher,
    username: &str,
    password: &str,
) -> Result<Principal, AuthError> {
    let Some(user) = users.find_by_username(username).await? else {
        // Burn a verification so unknown users cost the same as wrong passwords.
        let _ = hasher
            .verify_blocking(password.to_owned(), hasher.dummy_hash().to_owned())
            .await;
        warn!(%username, "login unknown username");
        return Err(AuthError::UserNotFound);
    };

    if !user.enabled {
        warn!(user_id = %user.id, "login for disabled account");
        return Err(AuthError::Disabled);
    }

    let ok = hasher
        .verify_blocking(password.to_owned(), user.password_hash.clone())
        .await?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AuthError::BadCredentials);
    }

    info!(user_id = %user.id, username = %user.username, "user authenticated");
    Ok(Principal {
        id: user.id,
        roles: user.role_list(),
        username: user.username,
    })
}
