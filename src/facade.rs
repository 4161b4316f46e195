//! The single entry point an external grant-flow engine talks to.
//!
//! One facade is constructed per configured connection at startup and handed
//! to the engine by reference. Methods are thin pass-throughs to the storage
//! backend and the lifecycle manager: input validation, a per-call deadline,
//! and nothing else.

use chrono::Duration;
use std::future::Future;
use std::sync::Arc;

use token_store_config::{Config, LifetimeConfig};
use token_store_core::{
    AccessToken, AuthorizationCode, Client, Clock, EntityKind, RefreshToken, Scope, Session,
    StorageError, SystemClock,
};
use token_store_factory::create_storage;
use token_store_ports::DynStorage;

use crate::lifecycle::TokenLifecycle;

/// Identifiers longer than this are rejected before touching storage.
const MAX_IDENTIFIER_LEN: usize = 128;

pub struct StorageFacade {
    storage: DynStorage,
    lifecycle: TokenLifecycle,
    lifetimes: LifetimeConfig,
    op_timeout: Option<std::time::Duration>,
}

impl StorageFacade {
    /// Bootstrap a backend for the configured connection and compose the
    /// lifecycle manager around it.
    pub async fn connect(config: &Config) -> Result<Self, StorageError> {
        let storage = create_storage(&config.database.url).await?;
        storage.init().await?;

        tracing::info!(
            database = %config.sanitized().database.url,
            "storage facade connected"
        );

        Ok(Self::new(storage, Arc::new(SystemClock), config))
    }

    pub fn new(storage: DynStorage, clock: Arc<dyn Clock>, config: &Config) -> Self {
        let lifecycle = TokenLifecycle::new(storage.clone(), clock, config.policy);

        Self {
            storage,
            lifecycle,
            lifetimes: config.lifetimes,
            op_timeout: config.op_timeout_secs.map(std::time::Duration::from_secs),
        }
    }

    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.lifecycle
    }

    pub async fn healthcheck(&self) -> Result<(), StorageError> {
        self.bounded(self.storage.healthcheck()).await
    }

    // Client operations

    pub async fn create_client(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        name: &str,
    ) -> Result<Client, StorageError> {
        validate_identifier(client_id, "client_id")?;

        let client = Client::new(
            client_id.to_string(),
            client_secret,
            redirect_uri.to_string(),
            name.to_string(),
        );
        self.bounded(self.storage.create_client(&client)).await?;

        Ok(client)
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Option<Client>, StorageError> {
        validate_identifier(client_id, "client_id")?;
        self.bounded(self.storage.get_client(client_id)).await
    }

    pub async fn update_client(&self, client: &Client) -> Result<(), StorageError> {
        validate_identifier(&client.client_id, "client_id")?;
        self.bounded(self.storage.update_client(client)).await
    }

    pub async fn delete_client(&self, client_id: &str) -> Result<(), StorageError> {
        validate_identifier(client_id, "client_id")?;
        self.bounded(self.storage.delete_client(client_id)).await
    }

    pub async fn list_clients(&self, limit: u32, offset: u32) -> Result<Vec<Client>, StorageError> {
        self.bounded(self.storage.list_clients(limit, offset)).await
    }

    pub async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: Option<&str>,
        grant: Option<&str>,
    ) -> Result<Client, StorageError> {
        validate_identifier(client_id, "client_id")?;
        self.bounded(self.lifecycle.authenticate_client(
            client_id,
            client_secret,
            redirect_uri,
            grant,
        ))
        .await
    }

    // Scope operations

    pub async fn create_scope(&self, name: &str, description: &str) -> Result<Scope, StorageError> {
        validate_identifier(name, "scope name")?;

        let scope = Scope::new(name.to_string(), description.to_string());
        self.bounded(self.storage.create_scope(&scope)).await?;

        Ok(scope)
    }

    pub async fn get_scope(&self, name: &str) -> Result<Option<Scope>, StorageError> {
        validate_identifier(name, "scope name")?;
        self.bounded(self.storage.get_scope(name)).await
    }

    pub async fn update_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        validate_identifier(&scope.name, "scope name")?;
        self.bounded(self.storage.update_scope(scope)).await
    }

    pub async fn delete_scope(&self, name: &str) -> Result<(), StorageError> {
        validate_identifier(name, "scope name")?;
        self.bounded(self.storage.delete_scope(name)).await
    }

    pub async fn list_scopes(&self, limit: u32, offset: u32) -> Result<Vec<Scope>, StorageError> {
        self.bounded(self.storage.list_scopes(limit, offset)).await
    }

    pub async fn resolve_scopes(
        &self,
        scope: &str,
        grant: Option<&str>,
        client_id: Option<&str>,
    ) -> Result<Vec<Scope>, StorageError> {
        validate_scope_set(scope)?;
        self.bounded(self.lifecycle.resolve_scopes(scope, grant, client_id))
            .await
    }

    // Policy associations

    pub async fn allow_client_grant(&self, client_id: &str, grant: &str) -> Result<(), StorageError> {
        validate_identifier(client_id, "client_id")?;
        validate_identifier(grant, "grant")?;
        self.bounded(
            self.storage
                .associate(EntityKind::Client, client_id, EntityKind::Grant, grant),
        )
        .await
    }

    pub async fn forbid_client_grant(&self, client_id: &str, grant: &str) -> Result<(), StorageError> {
        validate_identifier(client_id, "client_id")?;
        validate_identifier(grant, "grant")?;
        self.bounded(
            self.storage
                .dissociate(EntityKind::Client, client_id, EntityKind::Grant, grant),
        )
        .await
    }

    pub async fn allow_client_scope(&self, client_id: &str, scope: &str) -> Result<(), StorageError> {
        validate_identifier(client_id, "client_id")?;
        validate_identifier(scope, "scope name")?;
        self.bounded(
            self.storage
                .associate(EntityKind::Client, client_id, EntityKind::Scope, scope),
        )
        .await
    }

    pub async fn forbid_client_scope(&self, client_id: &str, scope: &str) -> Result<(), StorageError> {
        validate_identifier(client_id, "client_id")?;
        validate_identifier(scope, "scope name")?;
        self.bounded(
            self.storage
                .dissociate(EntityKind::Client, client_id, EntityKind::Scope, scope),
        )
        .await
    }

    pub async fn allow_scope_grant(&self, scope: &str, grant: &str) -> Result<(), StorageError> {
        validate_identifier(scope, "scope name")?;
        validate_identifier(grant, "grant")?;
        self.bounded(
            self.storage
                .associate(EntityKind::Scope, scope, EntityKind::Grant, grant),
        )
        .await
    }

    pub async fn forbid_scope_grant(&self, scope: &str, grant: &str) -> Result<(), StorageError> {
        validate_identifier(scope, "scope name")?;
        validate_identifier(grant, "grant")?;
        self.bounded(
            self.storage
                .dissociate(EntityKind::Scope, scope, EntityKind::Grant, grant),
        )
        .await
    }

    // Session operations

    /// Start a session on behalf of a resource owner. The granted scope set
    /// is recorded as session<->scope associations.
    pub async fn start_user_session(
        &self,
        client_id: &str,
        user_id: &str,
        scope: &str,
    ) -> Result<Session, StorageError> {
        validate_identifier(client_id, "client_id")?;
        validate_identifier(user_id, "user_id")?;
        validate_scope_set(scope)?;

        let session = Session::for_user(client_id.to_string(), user_id.to_string());
        self.bounded(self.persist_session(session, scope)).await
    }

    /// Start a session where the client acts on its own behalf.
    pub async fn start_client_session(
        &self,
        client_id: &str,
        scope: &str,
    ) -> Result<Session, StorageError> {
        validate_identifier(client_id, "client_id")?;
        validate_scope_set(scope)?;

        let session = Session::for_client(client_id.to_string());
        self.bounded(self.persist_session(session, scope)).await
    }

    async fn persist_session(
        &self,
        session: Session,
        scope: &str,
    ) -> Result<Session, StorageError> {
        // A session belongs to exactly one client; reject unknown clients up
        // front rather than persisting a dangling reference.
        self.storage
            .get_client(&session.client_id)
            .await?
            .ok_or_else(|| StorageError::not_found("client"))?;

        self.storage.create_session(&session).await?;

        for name in scope.split_whitespace() {
            self.storage
                .associate(EntityKind::Session, &session.id, EntityKind::Scope, name)
                .await?;
        }

        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>, StorageError> {
        validate_identifier(id, "session id")?;
        self.bounded(self.storage.get_session(id)).await
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), StorageError> {
        validate_identifier(id, "session id")?;
        self.bounded(self.storage.delete_session(id)).await
    }

    pub async fn list_client_sessions(
        &self,
        client_id: &str,
    ) -> Result<Vec<Session>, StorageError> {
        validate_identifier(client_id, "client_id")?;
        self.bounded(self.storage.list_client_sessions(client_id))
            .await
    }

    /// The session's granted scope names, read back from the relation index.
    pub async fn session_scopes(&self, session_id: &str) -> Result<Vec<String>, StorageError> {
        validate_identifier(session_id, "session id")?;

        let related = self
            .bounded(self.storage.related(EntityKind::Session, session_id))
            .await?;

        Ok(related
            .into_iter()
            .filter_map(|(kind, id)| (kind == EntityKind::Scope).then_some(id))
            .collect())
    }

    // Authorization code operations

    pub async fn issue_authorization_code(
        &self,
        session_id: &str,
        redirect_uri: &str,
        scope: &str,
    ) -> Result<AuthorizationCode, StorageError> {
        validate_identifier(session_id, "session id")?;
        validate_scope_set(scope)?;

        let ttl = Duration::seconds(self.lifetimes.authorization_code_ttl_secs as i64);
        self.bounded(
            self.lifecycle
                .issue_auth_code(session_id, redirect_uri, scope, ttl),
        )
        .await
    }

    pub async fn exchange_authorization_code(&self, code: &str) -> Result<Session, StorageError> {
        validate_identifier(code, "authorization code")?;
        self.bounded(self.lifecycle.exchange_auth_code(code)).await
    }

    // Token operations

    pub async fn issue_access_token(
        &self,
        session_id: &str,
        scope: &str,
    ) -> Result<AccessToken, StorageError> {
        validate_identifier(session_id, "session id")?;
        validate_scope_set(scope)?;

        let ttl = Duration::seconds(self.lifetimes.access_token_ttl_secs as i64);
        self.bounded(self.lifecycle.issue_access_token(session_id, scope, ttl))
            .await
    }

    pub async fn issue_refresh_token(
        &self,
        access_token: &str,
    ) -> Result<RefreshToken, StorageError> {
        validate_identifier(access_token, "access token")?;

        let ttl = Duration::seconds(self.lifetimes.refresh_token_ttl_secs as i64);
        self.bounded(self.lifecycle.issue_refresh_token(access_token, ttl))
            .await
    }

    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        requested_scope: Option<&str>,
    ) -> Result<(AccessToken, RefreshToken), StorageError> {
        validate_identifier(refresh_token, "refresh token")?;
        if let Some(scope) = requested_scope {
            validate_scope_set(scope)?;
        }

        let access_ttl = Duration::seconds(self.lifetimes.access_token_ttl_secs as i64);
        let refresh_ttl = Duration::seconds(self.lifetimes.refresh_token_ttl_secs as i64);
        self.bounded(self.lifecycle.refresh(
            refresh_token,
            requested_scope,
            access_ttl,
            refresh_ttl,
        ))
        .await
    }

    pub async fn revoke_token(&self, token: &str) -> Result<(), StorageError> {
        validate_identifier(token, "token")?;
        self.bounded(self.lifecycle.revoke(token)).await
    }

    pub async fn validate_access_token(&self, token: &str) -> Result<Session, StorageError> {
        validate_identifier(token, "token")?;
        self.bounded(self.lifecycle.validate_access_token(token))
            .await
    }

    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        self.bounded(self.lifecycle.purge_expired()).await
    }

    /// Bound an operation by the configured deadline. Every mutation is a
    /// single conditional statement or transaction underneath, so hitting
    /// the deadline never leaves partial state behind.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match self.op_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::store_unavailable(
                    "storage operation timed out",
                )),
            },
            None => fut.await,
        }
    }
}

fn validate_identifier(value: &str, what: &str) -> Result<(), StorageError> {
    if value.is_empty() {
        return Err(StorageError::invalid_identifier(&format!(
            "{what} must not be empty"
        )));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(StorageError::invalid_identifier(&format!(
            "{what} exceeds {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if !value.chars().all(|c| c.is_ascii_graphic()) {
        return Err(StorageError::invalid_identifier(&format!(
            "{what} contains whitespace or non-printable characters"
        )));
    }

    Ok(())
}

/// A scope set is zero or more space-delimited identifiers.
fn validate_scope_set(scope: &str) -> Result<(), StorageError> {
    for name in scope.split_whitespace() {
        validate_identifier(name, "scope name")?;
    }

    Ok(())
}
