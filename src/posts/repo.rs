use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::db::StoreError;
use crate::posts::repo_types::{NewPost, Post, PostUpdate};

#[async_trait]
pub trait PostRepository: Send + Sync {
    /// `NotFound` when no user currently holds `post.username`.
    async fn create(&self, post: NewPost) -> Result<Post, StoreError>;
    async fn list(&self) -> Result<Vec<Post>, StoreError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<Post>, StoreError>;
    /// Writes only when both id and owner match.
    async fn update(&self, update: PostUpdate) -> Result<Post, StoreError>;
    /// Deletes only when both id and owner match.
    async fn delete(&self, id: i64, username: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgPostRepository {
    db: PgPool,
}

impl PgPostRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PostRepository for PgPostRepository {
    async fn create(&self, post: NewPost) -> Result<Post, StoreError> {
        let now = OffsetDateTime::now_utc();
        // Share-locks the author row so a concurrent rename cannot slip between
        // the check and the insert.
        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO blogs (name, title, content, username, created_at, updated_at)
            SELECT $1, $2, $3, u.username, $5, $5
              FROM users u
             WHERE u.username = $4
               FOR SHARE
            RETURNING id, name, title, content, username, created_at, updated_at
            "#,
        )
        .bind(&post.name)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.username)
        .bind(now)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Post>, StoreError> {
        let rows = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, name, title, content, username, created_at, updated_at
            FROM blogs
            ORDER BY id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Post>, StoreError> {
        let row = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, name, title, content, username, created_at, updated_at
            FROM blogs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn update(&self, update: PostUpdate) -> Result<Post, StoreError> {
        sqlx::query_as::<_, Post>(
            r#"
            UPDATE blogs
               SET title = $1, content = $2, updated_at = $3
             WHERE id = $4 AND username = $5
            RETURNING id, name, title, content, username, created_at, updated_at
            "#,
        )
        .bind(&update.title)
        .bind(&update.content)
        .bind(update.updated_at)
        .bind(update.id)
        .bind(&update.username)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: i64, username: &str) -> Result<(), StoreError> {
        let result = sqlx::query(r#"DELETE FROM blogs WHERE id = $1 AND username = $2"#)
            .bind(id)
            .bind(username)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// Process-local `blogs` table; ids are never reused.
#[derive(Default)]
pub struct MemoryPostRepository {
    inner: RwLock<MemoryPosts>,
}

#[derive(Default)]
struct MemoryPosts {
    next_id: i64,
    rows: BTreeMap<i64, Post>,
}

impl MemoryPostRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn has_author(&self, username: &str) -> bool {
        self.inner.read().await.rows.values().any(|p| p.username == username)
    }
}

#[async_trait]
impl PostRepository for MemoryPostRepository {
    async fn create(&self, post: NewPost) -> Result<Post, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let now = OffsetDateTime::now_utc();
        let row = Post {
            id: inner.next_id,
            name: post.name,
            title: post.title,
            content: post.content,
            username: post.username,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list(&self) -> Result<Vec<Post>, StoreError> {
        Ok(self.inner.read().await.rows.values().cloned().collect())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Post>, StoreError> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn update(&self, update: PostUpdate) -> Result<Post, StoreError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .rows
            .get_mut(&update.id)
            .filter(|p| p.username == update.username)
            .ok_or(StoreError::NotFound)?;
        row.title = update.title;
        row.content = update.content;
        row.updated_at = update.updated_at;
        Ok(row.clone())
    }

    async fn delete(&self, id: i64, username: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.rows.get(&id).is_some_and(|p| p.username == username) {
            return Err(StoreError::NotFound);
        }
        inner.rows.remove(&id);
        Ok(())
    }
}
