use std::sync::Arc;

use sqlx::PgPool;
use tracing::warn;

use crate::auth::jwt::JwtKeys;
use crate::auth::repo::{MemoryUserRepository, PgUserRepository, UserRepository};
use crate::config::AppConfig;
use crate::db;
use crate::posts::repo::{MemoryPostRepository, PgPostRepository, PostRepository};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub posts: Arc<dyn PostRepository>,
    pub jwt: JwtKeys,
    pub config: Arc<AppConfig>,
    /// Kept so the pool can be closed on shutdown; `None` for the in-memory store.
    pub db: Option<PgPool>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        match &config.database {
            Some(db_cfg) => {
                let pool = db::connect(db_cfg).await?;
                db::migrate(&pool).await?;
                Ok(Self::from_parts(
                    Arc::new(PgUserRepository::new(pool.clone())),
                    Arc::new(PgPostRepository::new(pool.clone())),
                    config,
                    Some(pool),
                ))
            }
            None => {
                warn!("DATABASE_URL not set; using the in-memory store");
                Ok(Self::in_memory(config))
            }
        }
    }

    pub fn from_parts(
        users: Arc<dyn UserRepository>,
        posts: Arc<dyn PostRepository>,
        config: Arc<AppConfig>,
        db: Option<PgPool>,
    ) -> Self {
        Self {
            users,
            posts,
            jwt: JwtKeys::new(&config.jwt),
            config,
            db,
        }
    }

    pub fn in_memory(config: Arc<AppConfig>) -> Self {
        let posts = Arc::new(MemoryPostRepository::new());
        Self::from_parts(
            Arc::new(MemoryUserRepository::with_posts(posts.clone())),
            posts,
            config,
            None,
        )
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::JwtConfig;

        Self::in_memory(Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database: None,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "quill-test".into(),
            },
            request_timeout_secs: 5,
        }))
    }
}
