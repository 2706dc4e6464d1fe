use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::auth::{
    password::{self, HashingError},
    repo::UserRepository,
    repo_types::UserIdentity,
};
use crate::db::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no user with that email")]
    UserNotFound,
    #[error("password does not match")]
    InvalidCredentials,
    #[error(transparent)]
    Hashing(#[from] HashingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Hashes on the blocking pool; argon2 is deliberately slow.
pub async fn hash_password(plain: String) -> Result<String, HashingError> {
    tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| HashingError(e.to_string()))?
}

pub async fn verify_password(plain: String, hash: String) -> Result<bool, HashingError> {
    tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| HashingError(e.to_string()))?
}

/// Resolves an (email, password) pair into the caller's identity. Read-only.
pub async fn authenticate(
    users: &dyn UserRepository,
    email: &str,
    password: &str,
) -> Result<UserIdentity, AuthError> {
    let Some(user) = users.find_by_email(email).await? else {
        warn!(%email, "authentication failed: unknown email");
        return Err(AuthError::UserNotFound);
    };

    if !verify_password(password.to_owned(), user.password_hash.clone()).await? {
        warn!(%email, user_id = user.id, "authentication failed: wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    Ok(user.into())
}
