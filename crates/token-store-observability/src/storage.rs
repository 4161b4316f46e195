use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::Instrument;

use token_store_core::{
    AccessToken, AuthorizationCode, Client, EntityKind, RefreshToken, Scope, Session, StorageError,
};
use token_store_ports::{
    AccessTokenStorage, AuthCodeStorage, ClientStorage, DynStorage, RefreshTokenStorage,
    RelationStorage, ScopeStorage, SessionStorage, Storage,
};

/// A thin wrapper around a `DynStorage` that creates a tracing span for each
/// storage call.
///
/// This lets caller spans extend naturally down into persistence calls.
/// Token, code, and secret values are never logged in full; at most a short
/// prefix plus length.
pub struct ObservedStorage {
    inner: DynStorage,
    db_system: String,
}

impl ObservedStorage {
    pub fn new(inner: DynStorage, db_system: String) -> Self {
        Self { inner, db_system }
    }

    fn span(&self, operation: &'static str) -> tracing::Span {
        tracing::info_span!(
            "db",
            db_system = %self.db_system,
            db_operation = operation
        )
    }

    fn keyed_span(&self, operation: &'static str, key: &str) -> tracing::Span {
        tracing::info_span!(
            "db",
            db_system = %self.db_system,
            db_operation = operation,
            key = %key
        )
    }

    fn secret_span(&self, operation: &'static str, value: &str) -> tracing::Span {
        let prefix = Self::token_prefix(value);
        tracing::info_span!(
            "db",
            db_system = %self.db_system,
            db_operation = operation,
            token_prefix = %prefix,
            token_len = value.len()
        )
    }

    fn token_prefix(token: &str) -> String {
        token.chars().take(12).collect::<String>()
    }
}

#[async_trait]
impl ClientStorage for ObservedStorage {
    async fn create_client(&self, client: &Client) -> Result<(), StorageError> {
        let span = self.keyed_span("create_client", &client.client_id);
        async move { self.inner.create_client(client).await }
            .instrument(span)
            .await
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, StorageError> {
        let span = self.keyed_span("get_client", client_id);
        async move { self.inner.get_client(client_id).await }
            .instrument(span)
            .await
    }

    async fn update_client(&self, client: &Client) -> Result<(), StorageError> {
        let span = self.keyed_span("update_client", &client.client_id);
        async move { self.inner.update_client(client).await }
            .instrument(span)
            .await
    }

    async fn delete_client(&self, client_id: &str) -> Result<(), StorageError> {
        let span = self.keyed_span("delete_client", client_id);
        async move { self.inner.delete_client(client_id).await }
            .instrument(span)
            .await
    }

    async fn list_clients(&self, limit: u32, offset: u32) -> Result<Vec<Client>, StorageError> {
        let span = self.span("list_clients");
        async move { self.inner.list_clients(limit, offset).await }
            .instrument(span)
            .await
    }
}

#[async_trait]
impl ScopeStorage for ObservedStorage {
    async fn create_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        let span = self.keyed_span("create_scope", &scope.name);
        async move { self.inner.create_scope(scope).await }
            .instrument(span)
            .await
    }

    async fn get_scope(&self, name: &str) -> Result<Option<Scope>, StorageError> {
        let span = self.keyed_span("get_scope", name);
        async move { self.inner.get_scope(name).await }
            .instrument(span)
            .await
    }

    async fn update_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        let span = self.keyed_span("update_scope", &scope.name);
        async move { self.inner.update_scope(scope).await }
            .instrument(span)
            .await
    }

    async fn delete_scope(&self, name: &str) -> Result<(), StorageError> {
        let span = self.keyed_span("delete_scope", name);
        async move { self.inner.delete_scope(name).await }
            .instrument(span)
            .await
    }

    async fn list_scopes(&self, limit: u32, offset: u32) -> Result<Vec<Scope>, StorageError> {
        let span = self.span("list_scopes");
        async move { self.inner.list_scopes(limit, offset).await }
            .instrument(span)
            .await
    }
}

#[async_trait]
impl SessionStorage for ObservedStorage {
    async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
        let span = tracing::info_span!(
            "db",
            db_system = %self.db_system,
            db_operation = "create_session",
            session_id = %session.id,
            client_id = %session.client_id
        );
        async move { self.inner.create_session(session).await }
            .instrument(span)
            .await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StorageError> {
        let span = self.keyed_span("get_session", id);
        async move { self.inner.get_session(id).await }
            .instrument(span)
            .await
    }

    async fn update_session(&self, session: &Session) -> Result<(), StorageError> {
        let span = self.keyed_span("update_session", &session.id);
        async move { self.inner.update_session(session).await }
            .instrument(span)
            .await
    }

    async fn delete_session(&self, id: &str) -> Result<(), StorageError> {
        let span = self.keyed_span("delete_session", id);
        async move { self.inner.delete_session(id).await }
            .instrument(span)
            .await
    }

    async fn list_client_sessions(&self, client_id: &str) -> Result<Vec<Session>, StorageError> {
        let span = self.keyed_span("list_client_sessions", client_id);
        async move { self.inner.list_client_sessions(client_id).await }
            .instrument(span)
            .await
    }
}

#[async_trait]
impl AuthCodeStorage for ObservedStorage {
    async fn create_authorization_code(
        &self,
        auth_code: &AuthorizationCode,
    ) -> Result<(), StorageError> {
        let span = self.secret_span("create_authorization_code", &auth_code.code);
        async move { self.inner.create_authorization_code(auth_code).await }
            .instrument(span)
            .await
    }

    async fn get_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, StorageError> {
        let span = self.secret_span("get_authorization_code", code);
        async move { self.inner.get_authorization_code(code).await }
            .instrument(span)
            .await
    }

    async fn consume_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StorageError> {
        let span = self.secret_span("consume_authorization_code", code);
        async move { self.inner.consume_authorization_code(code, now).await }
            .instrument(span)
            .await
    }

    async fn delete_authorization_code(&self, code: &str) -> Result<(), StorageError> {
        let span = self.secret_span("delete_authorization_code", code);
        async move { self.inner.delete_authorization_code(code).await }
            .instrument(span)
            .await
    }

    async fn purge_expired_codes(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let span = self.span("purge_expired_codes");
        async move { self.inner.purge_expired_codes(now).await }
            .instrument(span)
            .await
    }
}

#[async_trait]
impl AccessTokenStorage for ObservedStorage {
    async fn create_access_token(&self, token: &AccessToken) -> Result<(), StorageError> {
        let span = self.secret_span("create_access_token", &token.access_token);
        async move { self.inner.create_access_token(token).await }
            .instrument(span)
            .await
    }

    async fn get_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<AccessToken>, StorageError> {
        let span = self.secret_span("get_access_token", access_token);
        async move { self.inner.get_access_token(access_token).await }
            .instrument(span)
            .await
    }

    async fn get_access_token_by_id(&self, id: &str) -> Result<Option<AccessToken>, StorageError> {
        let span = self.keyed_span("get_access_token_by_id", id);
        async move { self.inner.get_access_token_by_id(id).await }
            .instrument(span)
            .await
    }

    async fn delete_access_token(&self, access_token: &str) -> Result<(), StorageError> {
        let span = self.secret_span("delete_access_token", access_token);
        async move { self.inner.delete_access_token(access_token).await }
            .instrument(span)
            .await
    }

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let span = self.span("purge_expired_tokens");
        async move { self.inner.purge_expired_tokens(now).await }
            .instrument(span)
            .await
    }
}

#[async_trait]
impl RefreshTokenStorage for ObservedStorage {
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError> {
        let span = self.secret_span("create_refresh_token", &token.refresh_token);
        async move { self.inner.create_refresh_token(token).await }
            .instrument(span)
            .await
    }

    async fn get_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<RefreshToken>, StorageError> {
        let span = self.secret_span("get_refresh_token", refresh_token);
        async move { self.inner.get_refresh_token(refresh_token).await }
            .instrument(span)
            .await
    }

    async fn rotate_refresh_token(
        &self,
        old_refresh_token: &str,
        now: DateTime<Utc>,
        new_access: &AccessToken,
        new_refresh: &RefreshToken,
    ) -> Result<bool, StorageError> {
        let span = self.secret_span("rotate_refresh_token", old_refresh_token);
        async move {
            self.inner
                .rotate_refresh_token(old_refresh_token, now, new_access, new_refresh)
                .await
        }
        .instrument(span)
        .await
    }

    async fn delete_refresh_token(&self, refresh_token: &str) -> Result<(), StorageError> {
        let span = self.secret_span("delete_refresh_token", refresh_token);
        async move { self.inner.delete_refresh_token(refresh_token).await }
            .instrument(span)
            .await
    }
}

#[async_trait]
impl RelationStorage for ObservedStorage {
    async fn associate(
        &self,
        a_kind: EntityKind,
        a_id: &str,
        b_kind: EntityKind,
        b_id: &str,
    ) -> Result<(), StorageError> {
        let span = tracing::info_span!(
            "db",
            db_system = %self.db_system,
            db_operation = "associate",
            a_kind = %a_kind,
            a_id = %a_id,
            b_kind = %b_kind,
            b_id = %b_id
        );
        async move { self.inner.associate(a_kind, a_id, b_kind, b_id).await }
            .instrument(span)
            .await
    }

    async fn dissociate(
        &self,
        a_kind: EntityKind,
        a_id: &str,
        b_kind: EntityKind,
        b_id: &str,
    ) -> Result<(), StorageError> {
        let span = tracing::info_span!(
            "db",
            db_system = %self.db_system,
            db_operation = "dissociate",
            a_kind = %a_kind,
            a_id = %a_id,
            b_kind = %b_kind,
            b_id = %b_id
        );
        async move { self.inner.dissociate(a_kind, a_id, b_kind, b_id).await }
            .instrument(span)
            .await
    }

    async fn related(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Vec<(EntityKind, String)>, StorageError> {
        let span = self.keyed_span("related", id);
        async move { self.inner.related(kind, id).await }
            .instrument(span)
            .await
    }

    async fn dissociate_all(&self, kind: EntityKind, id: &str) -> Result<(), StorageError> {
        let span = self.keyed_span("dissociate_all", id);
        async move { self.inner.dissociate_all(kind, id).await }
            .instrument(span)
            .await
    }
}

#[async_trait]
impl Storage for ObservedStorage {
    async fn init(&self) -> Result<(), StorageError> {
        let span = self.span("init");
        async move { self.inner.init().await }.instrument(span).await
    }

    async fn revoke_token(&self, token: &str) -> Result<(), StorageError> {
        let span = self.secret_span("revoke_token", token);
        async move { self.inner.revoke_token(token).await }
            .instrument(span)
            .await
    }

    async fn healthcheck(&self) -> Result<(), StorageError> {
        let span = self.span("healthcheck");
        async move { self.inner.healthcheck().await }
            .instrument(span)
            .await
    }
}
