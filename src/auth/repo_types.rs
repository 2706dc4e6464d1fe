use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,             // unique
    pub name: String,
    pub email: String,                // unique
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 PHC string, never plaintext
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// Partial profile update. `None` keeps the stored value, `Some("")` stores an
/// empty string.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
}

/// Who the caller is once authenticated. Carries no credential material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub name: String,
}

impl From<User> for UserIdentity {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            name: u.name,
        }
    }
}
