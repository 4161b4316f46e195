use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use token_store_core::{
    AccessToken, AuthorizationCode, Client, EntityKind, RefreshToken, Scope, Session, StorageError,
};

/// Client persistence. `client_id` is the external lookup key.
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Fails with `DuplicateKey` when the `client_id` is already registered.
    async fn create_client(&self, client: &Client) -> Result<(), StorageError>;
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, StorageError>;
    /// Fails with `NotFound` when the client does not exist.
    async fn update_client(&self, client: &Client) -> Result<(), StorageError>;
    /// Removes the client row and its associations. Sessions referencing the
    /// client are left in place; a client is referenced, never owned.
    async fn delete_client(&self, client_id: &str) -> Result<(), StorageError>;
    async fn list_clients(&self, limit: u32, offset: u32) -> Result<Vec<Client>, StorageError>;
}

/// Scope persistence. `name` is the external lookup key.
#[async_trait]
pub trait ScopeStorage: Send + Sync {
    async fn create_scope(&self, scope: &Scope) -> Result<(), StorageError>;
    async fn get_scope(&self, name: &str) -> Result<Option<Scope>, StorageError>;
    async fn update_scope(&self, scope: &Scope) -> Result<(), StorageError>;
    /// Removes the scope row and its associations only; clients and sessions
    /// that referenced the scope are never deleted.
    async fn delete_scope(&self, name: &str) -> Result<(), StorageError>;
    async fn list_scopes(&self, limit: u32, offset: u32) -> Result<Vec<Scope>, StorageError>;
}

#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<(), StorageError>;
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StorageError>;
    async fn update_session(&self, session: &Session) -> Result<(), StorageError>;
    /// Cascades: the session's authorization codes, access tokens, refresh
    /// tokens of those access tokens, and its scope associations.
    async fn delete_session(&self, id: &str) -> Result<(), StorageError>;
    async fn list_client_sessions(&self, client_id: &str) -> Result<Vec<Session>, StorageError>;
}

#[async_trait]
pub trait AuthCodeStorage: Send + Sync {
    async fn create_authorization_code(
        &self,
        auth_code: &AuthorizationCode,
    ) -> Result<(), StorageError>;
    async fn get_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, StorageError>;
    /// Atomically mark an unused, unexpired code as used and return it.
    ///
    /// Exactly one of N concurrent callers receives `Some`; the rest get
    /// `None`. `None` is also returned for absent, expired, or already
    /// consumed codes — classification is the caller's job.
    async fn consume_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StorageError>;
    async fn delete_authorization_code(&self, code: &str) -> Result<(), StorageError>;
    /// Reclaim codes past their expiry. Returns the number of rows removed.
    async fn purge_expired_codes(&self, now: DateTime<Utc>) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait AccessTokenStorage: Send + Sync {
    async fn create_access_token(&self, token: &AccessToken) -> Result<(), StorageError>;
    async fn get_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<AccessToken>, StorageError>;
    /// Lookup by surrogate id (used when resolving a refresh token's parent).
    async fn get_access_token_by_id(&self, id: &str) -> Result<Option<AccessToken>, StorageError>;
    async fn delete_access_token(&self, access_token: &str) -> Result<(), StorageError>;
    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait RefreshTokenStorage: Send + Sync {
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError>;
    async fn get_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<RefreshToken>, StorageError>;
    /// Rotation as one store-level atomic unit: conditionally revoke the old
    /// refresh token (`revoked = false` and not expired at `now`), then
    /// persist the replacement access/refresh pair.
    ///
    /// Returns `false` without writing anything when another caller already
    /// consumed the old token.
    async fn rotate_refresh_token(
        &self,
        old_refresh_token: &str,
        now: DateTime<Utc>,
        new_access: &AccessToken,
        new_refresh: &RefreshToken,
    ) -> Result<bool, StorageError>;
    async fn delete_refresh_token(&self, refresh_token: &str) -> Result<(), StorageError>;
}

/// Many-to-many associations between entities, keyed by external identifiers
/// (client_id, scope name, grant name, session id).
///
/// Deleting an entity that is the target of a policy restriction removes only
/// the association rows, never the referenced entity.
#[async_trait]
pub trait RelationStorage: Send + Sync {
    /// Idempotent: associating an existing pair is a successful no-op.
    async fn associate(
        &self,
        a_kind: EntityKind,
        a_id: &str,
        b_kind: EntityKind,
        b_id: &str,
    ) -> Result<(), StorageError>;
    async fn dissociate(
        &self,
        a_kind: EntityKind,
        a_id: &str,
        b_kind: EntityKind,
        b_id: &str,
    ) -> Result<(), StorageError>;
    /// Every entity associated with `(kind, id)`, regardless of which side of
    /// the row it was recorded on.
    async fn related(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Vec<(EntityKind, String)>, StorageError>;
    async fn dissociate_all(&self, kind: EntityKind, id: &str) -> Result<(), StorageError>;
}

/// Trait implemented by all persistence backends.
#[async_trait]
pub trait Storage:
    ClientStorage
    + ScopeStorage
    + SessionStorage
    + AuthCodeStorage
    + AccessTokenStorage
    + RefreshTokenStorage
    + RelationStorage
{
    /// Initialize the backing store (e.g., bootstrap schema / create indexes).
    async fn init(&self) -> Result<(), StorageError>;

    /// Revoke by token value, matching either an access token or a refresh
    /// token. Revoking an access token also revokes its child refresh tokens.
    /// Idempotent: absent or already-revoked values are a successful no-op.
    async fn revoke_token(&self, token: &str) -> Result<(), StorageError>;

    /// Lightweight liveness/readiness check.
    ///
    /// Implementations may override to do something cheaper than `init()`.
    async fn healthcheck(&self) -> Result<(), StorageError> {
        self.init().await
    }
}

pub type DynStorage = Arc<dyn Storage>;
