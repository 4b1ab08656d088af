//! Auth collaborator — resolves the authenticated user behind a thread.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::thread::Thread;

/// The user a thread belongs to, as far as prompt rendering cares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The auth collaborator trait.
#[async_trait]
pub trait AuthResolver: Send + Sync {
    /// Resolve the authenticated user by thread ownership, if any.
    async fn resolve_user(
        &self,
        thread: &Thread,
    ) -> std::result::Result<Option<AuthenticatedUser>, AuthError>;
}

/// Resolver that knows no users. Useful for tests and tool-originated
/// threads.
pub struct NoAuth;

#[async_trait]
impl AuthResolver for NoAuth {
    async fn resolve_user(
        &self,
        _thread: &Thread,
    ) -> std::result::Result<Option<AuthenticatedUser>, AuthError> {
        Ok(None)
    }
}
