use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::auth::repo_types::{NewUser, ProfileChanges, User};
use crate::db::StoreError;
use crate::posts::repo::MemoryPostRepository;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn update_profile(&self, id: i64, changes: ProfileChanges) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, name, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, name, email, password_hash, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(StoreError::from_write)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, name, email, password_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, name, email, password_hash, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    /// Applies the change under a row lock on the user. A username that
    /// still owns posts cannot change, since posts keep their author's name.
    async fn update_profile(&self, id: i64, changes: ProfileChanges) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT username FROM users WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.ok_or(StoreError::NotFound)?;

        if changes.username.as_ref().is_some_and(|u| *u != current) {
            let has_posts: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM blogs WHERE username = $1)")
                    .bind(&current)
                    .fetch_one(&mut *tx)
                    .await?;
            if has_posts {
                return Err(StoreError::UsernameLocked);
            }
        }

        sqlx::query(
            r#"
            UPDATE users
               SET name = COALESCE($1, name),
                   username = COALESCE($2, username),
                   email = COALESCE($3, email)
             WHERE id = $4
            "#,
        )
        .bind(changes.name)
        .bind(changes.username)
        .bind(changes.email)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_write)?;

        tx.commit().await?;
        Ok(())
    }
}

/// Process-local user table, used by tests and when no `DATABASE_URL` is set.
/// When linked to a post store, a username that owns posts cannot change.
#[derive(Default)]
pub struct MemoryUserRepository {
    rows: RwLock<BTreeMap<i64, User>>,
    posts: Option<Arc<MemoryPostRepository>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(posts: Arc<MemoryPostRepository>) -> Self {
        Self {
            rows: RwLock::default(),
            posts: Some(posts),
        }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        if rows.values().any(|u| u.username == user.username) {
            return Err(StoreError::DuplicateUsername);
        }
        let id = rows.keys().next_back().map_or(1, |last| last + 1);
        let record = User {
            id,
            username: user.username,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        rows.insert(id, record.clone());
        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn update_profile(&self, id: i64, changes: ProfileChanges) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        if let Some(email) = &changes.email {
            if rows.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::DuplicateEmail);
            }
        }
        if let Some(username) = &changes.username {
            if rows.values().any(|u| u.id != id && &u.username == username) {
                return Err(StoreError::DuplicateUsername);
            }
        }
        let user = rows.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let (Some(username), Some(posts)) = (&changes.username, &self.posts) {
            if *username != user.username && posts.has_author(&user.username).await {
                return Err(StoreError::UsernameLocked);
            }
        }
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::{hash_password, verify_password};

    fn new_user(email: &str, plain: &str) -> NewUser {
        let local = email.split('@').next().unwrap_or(email);
        NewUser {
            username: format!("alice-{local}"),
            name: "Alice".into(),
            email: email.into(),
            password_hash: hash_password(plain).unwrap(),
        }
    }

    #[tokio::test]
    async fn find_by_email_returns_created_user() {
        let repo = MemoryUserRepository::new();
        let created = repo.create(new_user("a@x.com", "ABcde12!")).await.unwrap();

        let found = repo.find_by_email("a@x.com").await.unwrap().expect("user");
        assert_eq!(found.id, created.id);
        assert_eq!(found.username, "alice-a");
        assert_eq!(found.name, "Alice");
        assert_eq!(found.email, "a@x.com");
        assert!(verify_password("ABcde12!", &found.password_hash).unwrap());

        assert_eq!(repo.find_by_id(created.id).await.unwrap().unwrap().email, "a@x.com");
        assert!(repo.find_by_id(created.id + 1).await.unwrap().is_none());
        assert!(repo.find_by_email("b@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let repo = MemoryUserRepository::new();
        repo.create(new_user("a@x.com", "p")).await.unwrap();
        let err = repo.create(new_user("a@x.com", "q")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn update_profile_is_partial() {
        let repo = MemoryUserRepository::new();
        let user = repo.create(new_user("a@x.com", "p")).await.unwrap();

        repo.update_profile(
            user.id,
            ProfileChanges {
                name: Some(String::new()),
                username: None,
                email: Some("new@x.com".into()),
            },
        )
        .await
        .unwrap();

        let after = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(after.name, "");
        assert_eq!(after.username, "alice-a");
        assert_eq!(after.email, "new@x.com");
        assert_eq!(after.password_hash, user.password_hash);
    }

    #[tokio::test]
    async fn update_profile_guards_email_and_missing_user() {
        let repo = MemoryUserRepository::new();
        let a = repo.create(new_user("a@x.com", "p")).await.unwrap();
        repo.create(new_user("b@x.com", "p")).await.unwrap();

        let taken = ProfileChanges {
            email: Some("b@x.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            repo.update_profile(a.id, taken).await,
            Err(StoreError::DuplicateEmail)
        ));

        // keeping one's own email is not a collision
        let same = ProfileChanges {
            email: Some("a@x.com".into()),
            ..Default::default()
        };
        assert!(repo.update_profile(a.id, same).await.is_ok());

        assert!(matches!(
            repo.update_profile(999, ProfileChanges::default()).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn usernames_are_unique_on_create_and_rename() {
        let repo = MemoryUserRepository::new();
        let a = repo.create(new_user("a@x.com", "p")).await.unwrap();
        repo.create(new_user("b@x.com", "p")).await.unwrap();

        let copycat = NewUser {
            email: "c@x.com".into(),
            ..new_user("a@x.com", "p")
        };
        assert!(matches!(repo.create(copycat).await, Err(StoreError::DuplicateUsername)));

        let takeover = ProfileChanges {
            username: Some("alice-b".into()),
            ..Default::default()
        };
        assert!(matches!(
            repo.update_profile(a.id, takeover).await,
            Err(StoreError::DuplicateUsername)
        ));

        let keep = ProfileChanges {
            username: Some("alice-a".into()),
            ..Default::default()
        };
        assert!(repo.update_profile(a.id, keep).await.is_ok());
    }

    #[tokio::test]
    async fn username_with_posts_cannot_change() {
        use crate::posts::repo::PostRepository;
        use crate::posts::repo_types::NewPost;

        let posts = Arc::new(MemoryPostRepository::new());
        let repo = MemoryUserRepository::with_posts(posts.clone());
        let a = repo.create(new_user("a@x.com", "p")).await.unwrap();

        let rename = |to: &str| ProfileChanges {
            username: Some(to.into()),
            ..Default::default()
        };
        repo.update_profile(a.id, rename("alice-free")).await.unwrap();

        let post = posts
            .create(NewPost {
                name: "Alice".into(),
                title: "t".into(),
                content: "c".into(),
                username: "alice-free".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            repo.update_profile(a.id, rename("alice-other")).await,
            Err(StoreError::UsernameLocked)
        ));
        // unchanged username and other fields are still editable
        let keep = ProfileChanges {
            name: Some("Al".into()),
            ..rename("alice-free")
        };
        repo.update_profile(a.id, keep).await.unwrap();
        assert_eq!(repo.find_by_id(a.id).await.unwrap().unwrap().username, "alice-free");

        posts.delete(post.id, "alice-free").await.unwrap();
        repo.update_profile(a.id, rename("alice-other")).await.unwrap();
    }

    mod postgres {
        use super::*;
        use crate::posts::repo::{PgPostRepository, PostRepository};
        use crate::posts::repo_types::NewPost;

        #[sqlx::test]
        #[ignore = "needs DATABASE_URL"]
        async fn partial_update_and_unique_columns(pool: PgPool) {
            let repo = PgUserRepository::new(pool);
            let a = repo.create(new_user("a@x.com", "p")).await.unwrap();
            repo.create(new_user("b@x.com", "p")).await.unwrap();

            let copycat = NewUser {
                email: "c@x.com".into(),
                ..new_user("a@x.com", "p")
            };
            assert!(matches!(repo.create(copycat).await, Err(StoreError::DuplicateUsername)));
            assert!(matches!(
                repo.create(new_user("a@x.com", "p")).await,
                Err(StoreError::DuplicateEmail)
            ));

            let changes = ProfileChanges {
                name: Some("Alicia".into()),
                ..Default::default()
            };
            repo.update_profile(a.id, changes).await.unwrap();
            let after = repo.find_by_id(a.id).await.unwrap().unwrap();
            assert_eq!(after.name, "Alicia");
            assert_eq!(after.username, "alice-a");
            assert_eq!(after.email, "a@x.com");

            let takeover = ProfileChanges {
                username: Some("alice-b".into()),
                ..Default::default()
            };
            assert!(matches!(
                repo.update_profile(a.id, takeover).await,
                Err(StoreError::DuplicateUsername)
            ));
            assert!(matches!(
                repo.update_profile(999, ProfileChanges::default()).await,
                Err(StoreError::NotFound)
            ));
        }

        #[sqlx::test]
        #[ignore = "needs DATABASE_URL"]
        async fn posts_pin_username_and_delete_is_guarded(pool: PgPool) {
            let users = PgUserRepository::new(pool.clone());
            let posts = PgPostRepository::new(pool);
            let a = users.create(new_user("a@x.com", "p")).await.unwrap();
            let post = posts
                .create(NewPost {
                    name: "Alice".into(),
                    title: "t".into(),
                    content: "c".into(),
                    username: a.username.clone(),
                })
                .await
                .unwrap();

            let rename = ProfileChanges {
                username: Some("alice-renamed".into()),
                ..Default::default()
            };
            assert!(matches!(
                users.update_profile(a.id, rename.clone()).await,
                Err(StoreError::UsernameLocked)
            ));

            let orphan = NewPost {
                name: "Ghost".into(),
                title: "t".into(),
                content: "c".into(),
                username: "nobody".into(),
            };
            assert!(matches!(posts.create(orphan).await, Err(StoreError::NotFound)));

            assert!(matches!(posts.delete(post.id, "someone").await, Err(StoreError::NotFound)));
            posts.delete(post.id, &a.username).await.unwrap();
            assert!(posts.find_by_id(post.id).await.unwrap().is_none());

            users.update_profile(a.id, rename).await.unwrap();
        }
    }
}
