use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequest, Request},
    http::{header::AUTHORIZATION, HeaderMap},
};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::warn;

use super::{jwt::JwtKeys, repo_types::UserIdentity, services::authenticate};
use crate::{error::AppError, state::AppState};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The caller's identity, resolved once per request, together with the rest
/// of the JSON body decoded as `T`.
///
/// A `Bearer` token in the `Authorization` header takes precedence. Without
/// one, the body must carry `email` and `password`.
pub struct Authenticated<T>(pub UserIdentity, pub T);

/// Empty payload for endpoints that need nothing besides the identity.
#[derive(Debug, Default, Deserialize)]
pub struct NoBody {}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(flatten)]
    inner: T,
}

#[async_trait]
impl<T> FromRequest<AppState> for Authenticated<T>
where
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();

        let from_token = match bearer_token(&parts.headers)? {
            Some(token) => Some(identity_from_token(state, token).await?),
            None => None,
        };

        let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|_| AppError::validation("Invalid request payload"))?;
        let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes
        };
        let envelope: Envelope<T> = serde_json::from_slice(raw).map_err(|e| {
            warn!(error = %e, "rejected request body");
            AppError::validation("Invalid request payload")
        })?;

        let identity = match from_token {
            Some(identity) => identity,
            None => {
                let email = envelope.email.unwrap_or_default();
                let password = envelope.password.unwrap_or_default();
                if email.is_empty() || password.is_empty() {
                    return Err(AppError::validation("Email and password are required"));
                }
                authenticate(state.users.as_ref(), &email, &password).await?
            }
        };

        Ok(Authenticated(identity, envelope.inner))
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AppError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header".into()))?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|t| Some(t.trim()))
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header".into()))
}

async fn identity_from_token(state: &AppState, token: &str) -> Result<UserIdentity, AppError> {
    let claims = JwtKeys::from_ref(state).validate(token).map_err(|e| {
        warn!(error = %e, "bearer token rejected");
        AppError::from(e)
    })?;
    let Some(user_id) = claims.user_id() else {
        warn!(sub = %claims.sub, "token subject is not a user id");
        return Err(AppError::Unauthorized("Invalid token".into()));
    };
    match state.users.find_by_id(user_id).await? {
        Some(user) => Ok(user.into()),
        None => {
            warn!(user_id, "token refers to a missing user");
            Err(AppError::Unauthorized("Invalid token".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Ok(None)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(matches!(bearer_token(&headers), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn envelope_splits_credentials_from_payload() {
        #[derive(Deserialize)]
        struct Payload {
            title: String,
        }
        let env: Envelope<Payload> =
            serde_json::from_str(r#"{"email":"a@x.com","password":"p","title":"t"}"#).unwrap();
        assert_eq!(env.email.as_deref(), Some("a@x.com"));
        assert_eq!(env.password.as_deref(), Some("p"));
        assert_eq!(env.inner.title, "t");

        let bare: Envelope<NoBody> = serde_json::from_str("{}").unwrap();
        assert!(bare.email.is_none() && bare.password.is_none());
    }
}
