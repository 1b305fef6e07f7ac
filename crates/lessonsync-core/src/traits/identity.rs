//! Identity provider trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;
use crate::types::{Role, UserId};

/// The authenticated participant as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User id.
    pub user_id: UserId,
    /// Participant role.
    pub role: Role,
    /// Contact email, if the provider exposes one.
    pub email: Option<String>,
}

/// Supplies the identity of the user running this client.
///
/// Credential verification happens behind this trait and is not part of
/// LessonSync.
#[async_trait]
pub trait IdentityProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Return the currently signed-in identity, if any.
    async fn current_identity(&self) -> AppResult<Option<Identity>>;
}
