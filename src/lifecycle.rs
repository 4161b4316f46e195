//! Token issuance, validation, and rotation on top of a storage backend.
//!
//! The lifecycle manager is stateless: the store is the single source of
//! truth, and every single-winner decision (code consumption, refresh
//! rotation) happens as an atomic conditional write at the store level.

use chrono::Duration;
use std::sync::Arc;

use token_store_config::PolicyConfig;
use token_store_core::{
    validate_scopes, AccessToken, AuthorizationCode, Client, Clock, EntityKind, RefreshToken,
    Scope, Session, StorageError,
};
use token_store_ports::DynStorage;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

/// How many times to re-generate a token value after a unique-index collision
/// before giving up. With 256-bit values a single retry is already unheard of.
const MAX_GENERATION_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct TokenLifecycle {
    storage: DynStorage,
    clock: Arc<dyn Clock>,
    policy: PolicyConfig,
}

impl TokenLifecycle {
    pub fn new(storage: DynStorage, clock: Arc<dyn Clock>, policy: PolicyConfig) -> Self {
        Self {
            storage,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> PolicyConfig {
        self.policy
    }

    /// Verify client credentials (and, optionally, redirect URI and grant).
    ///
    /// The secret comparison is constant-time against the stored digest, and
    /// a wrong secret is indistinguishable from an unknown client. When
    /// `limit_clients_to_grants` is on and a grant is supplied, the grant
    /// must be associated with the client.
    pub async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: Option<&str>,
        grant: Option<&str>,
    ) -> Result<Client, StorageError> {
        let client = self
            .storage
            .get_client(client_id)
            .await?
            .ok_or_else(|| StorageError::not_found("client"))?;

        if !client.verify_secret(client_secret) {
            return Err(StorageError::not_found("client"));
        }

        if let Some(uri) = redirect_uri {
            if uri != client.redirect_uri {
                return Err(StorageError::not_found("client"));
            }
        }

        if let Some(grant) = grant {
            self.enforce_grant_policy_if_limited(client_id, grant).await?;
        }

        Ok(client)
    }

    /// Resolve requested scope names to stored scopes, applying restriction
    /// policy for whichever of grant/client is present.
    pub async fn resolve_scopes(
        &self,
        scope: &str,
        grant: Option<&str>,
        client_id: Option<&str>,
    ) -> Result<Vec<Scope>, StorageError> {
        let mut resolved = Vec::new();

        for name in scope.split_whitespace() {
            let stored = self
                .storage
                .get_scope(name)
                .await?
                .ok_or_else(|| StorageError::not_found(&format!("scope `{name}`")))?;

            if self.policy.limit_scopes_to_grants {
                if let Some(grant) = grant {
                    self.require_association(
                        EntityKind::Scope,
                        name,
                        EntityKind::Grant,
                        grant,
                        &format!("scope `{name}` may not be requested under grant `{grant}`"),
                    )
                    .await?;
                }
            }

            if self.policy.limit_clients_to_scopes {
                if let Some(client_id) = client_id {
                    self.require_association(
                        EntityKind::Client,
                        client_id,
                        EntityKind::Scope,
                        name,
                        &format!("scope `{name}` is not allowed for client `{client_id}`"),
                    )
                    .await?;
                }
            }

            resolved.push(stored);
        }

        Ok(resolved)
    }

    /// Issue a single-use authorization code for a session.
    pub async fn issue_auth_code(
        &self,
        session_id: &str,
        redirect_uri: &str,
        scope: &str,
        ttl: Duration,
    ) -> Result<AuthorizationCode, StorageError> {
        let session = self.require_session(session_id).await?;

        self.enforce_grant_policy_if_limited(&session.client_id, GRANT_AUTHORIZATION_CODE)
            .await?;
        self.enforce_scope_policy(&session.client_id, Some(GRANT_AUTHORIZATION_CODE), scope)
            .await?;

        let now = self.clock.now();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let code = AuthorizationCode::new(
                session.id.clone(),
                redirect_uri.to_string(),
                scope.to_string(),
                now,
                ttl,
            );

            match self.storage.create_authorization_code(&code).await {
                Ok(()) => {
                    tracing::debug!(session_id = %session.id, "issued authorization code");
                    return Ok(code);
                }
                Err(StorageError::DuplicateKey(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::store_unavailable(
            "could not generate a unique authorization code",
        ))
    }

    /// Exchange a code for its session, consuming it.
    ///
    /// Exactly one of N concurrent exchanges of the same code succeeds; the
    /// rest fail with `NotFound` (or `Expired` when past expiry).
    pub async fn exchange_auth_code(&self, code: &str) -> Result<Session, StorageError> {
        let now = self.clock.now();

        // Pre-fetch only to classify the failure; the conditional consume
        // below is the actual gate.
        let existing = self
            .storage
            .get_authorization_code(code)
            .await?
            .ok_or_else(|| StorageError::not_found("authorization code"))?;

        if existing.is_expired(now) {
            return Err(StorageError::expired("authorization code"));
        }

        let consumed = self
            .storage
            .consume_authorization_code(code, now)
            .await?
            .ok_or_else(|| StorageError::not_found("authorization code"))?;

        self.require_session(&consumed.session_id).await
    }

    /// Issue an access token for a session.
    pub async fn issue_access_token(
        &self,
        session_id: &str,
        scope: &str,
        ttl: Duration,
    ) -> Result<AccessToken, StorageError> {
        let session = self.require_session(session_id).await?;

        self.enforce_scope_policy(&session.client_id, None, scope)
            .await?;

        let now = self.clock.now();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let token = AccessToken::new(session.id.clone(), scope.to_string(), now, ttl);

            match self.storage.create_access_token(&token).await {
                Ok(()) => {
                    tracing::debug!(session_id = %session.id, "issued access token");
                    return Ok(token);
                }
                Err(StorageError::DuplicateKey(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::store_unavailable(
            "could not generate a unique access token",
        ))
    }

    /// Issue a refresh token bound to an existing access token.
    pub async fn issue_refresh_token(
        &self,
        access_token: &str,
        ttl: Duration,
    ) -> Result<RefreshToken, StorageError> {
        let parent = self
            .storage
            .get_access_token(access_token)
            .await?
            .ok_or_else(|| StorageError::not_found("access token"))?;

        let now = self.clock.now();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let token = RefreshToken::new(parent.id.clone(), now, ttl);

            match self.storage.create_refresh_token(&token).await {
                Ok(()) => return Ok(token),
                Err(StorageError::DuplicateKey(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::store_unavailable(
            "could not generate a unique refresh token",
        ))
    }

    /// Rotate a refresh token: atomically invalidate it and issue a fresh
    /// access/refresh pair.
    ///
    /// Requested scopes must be a subset of the original access token's
    /// scopes; `None` keeps the original set.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        requested_scope: Option<&str>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<(AccessToken, RefreshToken), StorageError> {
        let now = self.clock.now();

        let existing = self
            .storage
            .get_refresh_token(refresh_token)
            .await?
            .ok_or_else(|| StorageError::not_found("refresh token"))?;

        if existing.is_expired(now) {
            return Err(StorageError::expired("refresh token"));
        }
        if existing.revoked {
            return Err(StorageError::revoked("refresh token"));
        }

        let original = self
            .storage
            .get_access_token_by_id(&existing.access_token_id)
            .await?
            .ok_or_else(|| StorageError::not_found("access token"))?;

        let scope = match requested_scope {
            Some(requested) => {
                if !validate_scopes(requested, &original.scope) {
                    return Err(StorageError::scope_escalation(&format!(
                        "requested scopes `{requested}` exceed original `{}`",
                        original.scope
                    )));
                }
                requested.to_string()
            }
            None => original.scope.clone(),
        };

        let session = self.require_session(&original.session_id).await?;
        self.enforce_scope_policy(&session.client_id, Some(GRANT_REFRESH_TOKEN), &scope)
            .await?;

        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let new_access = AccessToken::new(session.id.clone(), scope.clone(), now, access_ttl);
            let new_refresh = RefreshToken::new(new_access.id.clone(), now, refresh_ttl);

            match self
                .storage
                .rotate_refresh_token(refresh_token, now, &new_access, &new_refresh)
                .await
            {
                // Another caller consumed the old token between our pre-fetch
                // and the conditional write.
                Ok(false) => return Err(StorageError::not_found("refresh token")),
                Ok(true) => {
                    tracing::debug!(session_id = %session.id, "rotated refresh token");
                    return Ok((new_access, new_refresh));
                }
                Err(StorageError::DuplicateKey(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::store_unavailable(
            "could not generate a unique token pair",
        ))
    }

    /// Revoke by token value (access or refresh). Idempotent: revoking an
    /// absent or already-revoked token is a successful no-op.
    pub async fn revoke(&self, token: &str) -> Result<(), StorageError> {
        self.storage.revoke_token(token).await
    }

    /// Validate an access token and return its owning session.
    ///
    /// Expiry is checked before the revocation flag, so an expired token
    /// reports `Expired` regardless of revocation state. A revoked token is
    /// never resurrected.
    pub async fn validate_access_token(&self, token: &str) -> Result<Session, StorageError> {
        let now = self.clock.now();

        let stored = self
            .storage
            .get_access_token(token)
            .await?
            .ok_or_else(|| StorageError::not_found("access token"))?;

        if stored.is_expired(now) {
            return Err(StorageError::expired("access token"));
        }
        if stored.revoked {
            return Err(StorageError::revoked("access token"));
        }

        self.require_session(&stored.session_id).await
    }

    /// Reclaim expired codes and tokens. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        let now = self.clock.now();
        let codes = self.storage.purge_expired_codes(now).await?;
        let tokens = self.storage.purge_expired_tokens(now).await?;
        Ok(codes + tokens)
    }

    async fn require_session(&self, session_id: &str) -> Result<Session, StorageError> {
        self.storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| StorageError::not_found("session"))
    }

    async fn enforce_grant_policy(&self, client_id: &str, grant: &str) -> Result<(), StorageError> {
        self.require_association(
            EntityKind::Client,
            client_id,
            EntityKind::Grant,
            grant,
            &format!("grant `{grant}` is not allowed for client `{client_id}`"),
        )
        .await
    }

    async fn enforce_grant_policy_if_limited(
        &self,
        client_id: &str,
        grant: &str,
    ) -> Result<(), StorageError> {
        if !self.policy.limit_clients_to_grants {
            return Ok(());
        }
        self.enforce_grant_policy(client_id, grant).await
    }

    async fn enforce_scope_policy(
        &self,
        client_id: &str,
        grant: Option<&str>,
        scope: &str,
    ) -> Result<(), StorageError> {
        if self.policy.limit_clients_to_scopes {
            for name in scope.split_whitespace() {
                self.require_association(
                    EntityKind::Client,
                    client_id,
                    EntityKind::Scope,
                    name,
                    &format!("scope `{name}` is not allowed for client `{client_id}`"),
                )
                .await?;
            }
        }

        if self.policy.limit_scopes_to_grants {
            if let Some(grant) = grant {
                for name in scope.split_whitespace() {
                    self.require_association(
                        EntityKind::Scope,
                        name,
                        EntityKind::Grant,
                        grant,
                        &format!("scope `{name}` may not be requested under grant `{grant}`"),
                    )
                    .await?;
                }
            }
        }

        Ok(())
    }

    async fn require_association(
        &self,
        kind: EntityKind,
        id: &str,
        target_kind: EntityKind,
        target_id: &str,
        detail: &str,
    ) -> Result<(), StorageError> {
        let related = self.storage.related(kind, id).await?;
        let allowed = related
            .iter()
            .any(|(k, other)| *k == target_kind && other == target_id);

        if !allowed {
            return Err(StorageError::policy_violation(detail));
        }

        Ok(())
    }
}
