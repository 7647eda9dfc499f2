use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use ring::digest;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tower_sessions::{cookie::Key, Session};

use crate::config::Config;
use crate::db::DbPool;
use crate::error::AppError;
use crate::lifecycle::Lifecycle;

/// Session keys used in the application
pub const SESSION_KEY_USER: &str = "user";
pub const SESSION_KEY_NGO: &str = "ngo";
pub const SESSION_KEY_VOLUNTEER: &str = "volunteer";

pub const SESSION_COOKIE_NAME: &str = "ngo.sid";

/// Sessions expire after five days without a request.
pub const SESSION_MAX_AGE: time::Duration = time::Duration::days(5);

/// Derives the 64-byte cookie signing key from `SECRET_KEY`.
pub fn signing_key(secret: &Secret<String>) -> Key {
    let hash = digest::digest(&digest::SHA512, secret.expose_secret().as_bytes());
    Key::from(hash.as_ref())
}

/// Application state shared with every handler
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub lifecycle: Lifecycle,
}

impl FromRef<AppState> for MySqlPool {
    fn from_ref(state: &AppState) -> MySqlPool {
        state.db.pool().clone()
    }
}

/// A logged-in identity as stored by the auth routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Identities made available to every rendered page.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub user: Option<SessionIdentity>,
    pub ngo: Option<SessionIdentity>,
    pub volunteer: Option<SessionIdentity>,
}

impl SessionContext {
    pub async fn load(session: &Session) -> Result<Self, tower_sessions::session::Error> {
        Ok(Self {
            user: session.get(SESSION_KEY_USER).await?,
            ngo: session.get(SESSION_KEY_NGO).await?,
            volunteer: session.get(SESSION_KEY_VOLUNTEER).await?,
        })
    }

    pub fn is_anonymous(&self) -> bool {
        self.user.is_none() && self.ngo.is_none() && self.volunteer.is_none()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| AppError::Internal(anyhow::anyhow!(message)))?;

        Ok(Self::load(&session).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tower_sessions::MemoryStore;

    fn session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    #[tokio::test]
    async fn test_empty_session_is_anonymous() {
        let context = SessionContext::load(&session()).await.unwrap();

        assert!(context.is_anonymous());
    }

    #[tokio::test]
    async fn test_context_reads_each_role() {
        let session = session();
        let volunteer = SessionIdentity {
            id: 7,
            name: "Asha".to_string(),
            email: None,
        };
        session.insert(SESSION_KEY_VOLUNTEER, &volunteer).await.unwrap();

        let context = SessionContext::load(&session).await.unwrap();

        assert!(context.user.is_none());
        assert!(context.ngo.is_none());
        assert_eq!(context.volunteer, Some(volunteer));
        assert!(!context.is_anonymous());
    }

    #[test]
    fn test_signing_key_is_deterministic() {
        let a = signing_key(&Secret::new("same-secret".to_string()));
        let b = signing_key(&Secret::new("same-secret".to_string()));
        let c = signing_key(&Secret::new("other-secret".to_string()));

        assert_eq!(a.master(), b.master());
        assert_ne!(a.master(), c.master());
    }
}
