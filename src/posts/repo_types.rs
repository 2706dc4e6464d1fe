use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Row of the `blogs` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub name: String,
    pub title: String,
    pub content: String,
    pub username: String, // owning author, immutable
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub name: String,
    pub title: String,
    pub content: String,
    pub username: String,
}

/// Mutable part of a post. `username` only scopes the write.
#[derive(Debug, Clone)]
pub struct PostUpdate {
    pub id: i64,
    pub username: String,
    pub title: String,
    pub content: String,
    pub updated_at: OffsetDateTime,
}
