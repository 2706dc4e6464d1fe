use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{
    dto::{CreatePostRequest, UpdatePostRequest},
    repo_types::{NewPost, Post, PostUpdate},
};
use crate::{
    auth::{
        dto::MessageResponse,
        extractors::{Authenticated, NoBody},
        repo_types::UserIdentity,
    },
    db::StoreError,
    error::AppError,
    state::AppState,
};

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/:id", get(get_post))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/createpost", post(create_post))
        .route("/updatepost/:id", put(update_post))
        .route("/deletepost/:id", delete(delete_post))
}

// --- handlers ---

#[instrument(skip(state))]
pub async fn list_posts(State(state): State<AppState>) -> Result<Json<Vec<Post>>, AppError> {
    Ok(Json(state.posts.list().await?))
}

#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Post>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(find_post(&state, id).await?))
}

#[instrument(skip_all)]
pub async fn create_post(
    State(state): State<AppState>,
    Authenticated(user, payload): Authenticated<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    require_title_and_content(&payload.title, &payload.content)?;

    let post = state
        .posts
        .create(NewPost {
            name: payload.name.unwrap_or_else(|| user.name.clone()),
            title: payload.title,
            content: payload.content,
            username: user.username,
        })
        .await
        .map_err(|e| match e {
            StoreError::NotFound => AppError::Conflict("Username changed during request".into()),
            other => other.into(),
        })?;

    info!(post_id = post.id, username = %post.username, "post created");
    Ok((StatusCode::CREATED, Json(post)))
}

#[instrument(skip(state, user, payload))]
pub async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Authenticated(user, payload): Authenticated<UpdatePostRequest>,
) -> Result<Json<Post>, AppError> {
    let id = parse_id(&id)?;
    require_title_and_content(&payload.title, &payload.content)?;

    let post = find_post(&state, id).await?;
    ensure_owner(&post, &user, "update")?;

    // The write re-checks the owner; a miss here means the post changed hands
    // or vanished after the fetch above.
    let updated = state
        .posts
        .update(PostUpdate {
            id,
            username: user.username,
            title: payload.title,
            content: payload.content,
            updated_at: OffsetDateTime::now_utc(),
        })
        .await
        .map_err(not_found_as_post)?;

    info!(post_id = id, "post updated");
    Ok(Json(updated))
}

#[instrument(skip(state, user))]
pub async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Authenticated(user, _): Authenticated<NoBody>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_id(&id)?;

    let post = find_post(&state, id).await?;
    ensure_owner(&post, &user, "delete")?;

    state
        .posts
        .delete(id, &user.username)
        .await
        .map_err(not_found_as_post)?;

    info!(post_id = id, "post deleted");
    Ok(Json(MessageResponse::new("Post deleted successfully")))
}

// --- helpers ---

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::validation("Post ID must be a positive integer"))
}

async fn find_post(state: &AppState, id: i64) -> Result<Post, AppError> {
    state
        .posts
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".into()))
}

fn not_found_as_post(e: StoreError) -> AppError {
    match e {
        StoreError::NotFound => AppError::NotFound("Post not found".into()),
        other => other.into(),
    }
}

fn require_title_and_content(title: &str, content: &str) -> Result<(), AppError> {
    if title.is_empty() || content.is_empty() {
        return Err(AppError::validation("Title and content are required"));
    }
    Ok(())
}

fn ensure_owner(post: &Post, user: &UserIdentity, action: &str) -> Result<(), AppError> {
    if post.username != user.username {
        warn!(post_id = post.id, owner = %post.username, caller = %user.username, "forbidden {action}");
        return Err(AppError::Forbidden(format!(
            "You are not authorized to {action} this post"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_by(username: &str) -> Post {
        let now = OffsetDateTime::now_utc();
        Post {
            id: 1,
            name: "n".into(),
            title: "t".into(),
            content: "c".into(),
            username: username.into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn caller(username: &str) -> UserIdentity {
        UserIdentity {
            id: 1,
            username: username.into(),
            email: format!("{username}@x.com"),
            name: username.into(),
        }
    }

    #[test]
    fn parse_id_accepts_only_positive_integers() {
        assert_eq!(parse_id("12").unwrap(), 12);
        for bad in ["0", "-3", "abc", "1.5", ""] {
            assert!(matches!(parse_id(bad), Err(AppError::Validation(_))), "{bad}");
        }
    }

    #[test]
    fn ownership_is_by_username() {
        assert!(ensure_owner(&post_by("alice"), &caller("alice"), "update").is_ok());
        let err = ensure_owner(&post_by("alice"), &caller("bob"), "delete").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "You are not authorized to delete this post");
    }

    #[test]
    fn title_and_content_are_required() {
        assert!(require_title_and_content("t", "c").is_ok());
        assert!(require_title_and_content("", "c").is_err());
        assert!(require_title_and_content("t", "").is_err());
    }
}
