use std::time::Duration;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;

use crate::config::DbConfig;

/// Failure reported by a repository.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("email already registered")]
    DuplicateEmail,
    #[error("username already taken")]
    DuplicateUsername,
    #[error("username is held by existing posts")]
    UsernameLocked,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Maps a unique violation on `users` to the column that collided.
    pub(crate) fn from_write(e: sqlx::Error) -> Self {
        let duplicate = match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                db.constraint().and_then(Self::from_constraint)
            }
            _ => None,
        };
        duplicate.unwrap_or(Self::Database(e))
    }

    fn from_constraint(name: &str) -> Option<Self> {
        match name {
            "users_email_key" => Some(Self::DuplicateEmail),
            "users_username_key" => Some(Self::DuplicateUsername),
            _ => None,
        }
    }
}

pub async fn connect(cfg: &DbConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
        .connect(&cfg.url)
        .await
        .context("connect to database")?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("run migrations")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_constraints_map_to_their_column() {
        assert!(matches!(
            StoreError::from_constraint("users_email_key"),
            Some(StoreError::DuplicateEmail)
        ));
        assert!(matches!(
            StoreError::from_constraint("users_username_key"),
            Some(StoreError::DuplicateUsername)
        ));
        assert!(StoreError::from_constraint("blogs_pkey").is_none());
    }

    #[test]
    fn other_errors_pass_through() {
        assert!(matches!(
            StoreError::from_write(sqlx::Error::RowNotFound),
            StoreError::Database(sqlx::Error::RowNotFound)
        ));
    }
}
