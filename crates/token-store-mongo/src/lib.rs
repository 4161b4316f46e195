use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson},
    options::{ClientOptions, FindOneAndUpdateOptions, FindOptions, IndexOptions, UpdateOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};

use token_store_core::{
    AccessToken, AuthorizationCode, Client, EntityKind, RefreshToken, Relation, Scope, Session,
    StorageError,
};
use token_store_ports::{
    AccessTokenStorage, AuthCodeStorage, ClientStorage, RefreshTokenStorage, RelationStorage,
    ScopeStorage, SessionStorage, Storage,
};

/// MongoDB-backed storage implementation.
///
/// Notes:
/// - Uses the core models as documents via `serde`.
/// - Uses unique indexes on the same fields that are unique in SQL.
/// - Single-winner operations are `find_one_and_update` with conditional
///   filters, the per-document atomic write.
pub struct MongoStorage {
    db: Database,
    clients: Collection<Client>,
    scopes: Collection<Scope>,
    sessions: Collection<Session>,
    authorization_codes: Collection<AuthorizationCode>,
    access_tokens: Collection<AccessToken>,
    refresh_tokens: Collection<RefreshToken>,
    relations: Collection<Relation>,
}

impl MongoStorage {
    pub async fn new(uri: &str) -> Result<Self, StorageError> {
        let mut opts = ClientOptions::parse(uri)
            .await
            .map_err(Self::mongo_err_to_storage)?;
        if opts.app_name.is_none() {
            opts.app_name = Some("token-store-mongo".to_string());
        }

        let client = MongoClient::with_options(opts).map_err(Self::mongo_err_to_storage)?;

        // If the URI doesn't specify a database, fall back to "token_store".
        let db_name = client
            .default_database()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| "token_store".to_string());

        let db = client.database(&db_name);

        let clients = db.collection::<Client>("clients");
        let scopes = db.collection::<Scope>("scopes");
        let sessions = db.collection::<Session>("sessions");
        let authorization_codes = db.collection::<AuthorizationCode>("authorization_codes");
        let access_tokens = db.collection::<AccessToken>("access_tokens");
        let refresh_tokens = db.collection::<RefreshToken>("refresh_tokens");
        let relations = db.collection::<Relation>("relations");

        Ok(Self {
            db,
            clients,
            scopes,
            sessions,
            authorization_codes,
            access_tokens,
            refresh_tokens,
            relations,
        })
    }

    async fn ensure_indexes(&self) -> Result<(), StorageError> {
        // clients.client_id unique
        self.clients
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "client_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        // scopes.name unique
        self.scopes
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        // sessions.client_id non-unique
        self.sessions
            .create_index(
                IndexModel::builder().keys(doc! { "client_id": 1 }).build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        // authorization_codes.code unique
        self.authorization_codes
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "code": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        // access_tokens.access_token unique
        self.access_tokens
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "access_token": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        // refresh_tokens.refresh_token unique
        self.refresh_tokens
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "refresh_token": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        self.refresh_tokens
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "access_token_id": 1 })
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        // relations compound unique makes `associate` idempotent
        self.relations
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "a_kind": 1, "a_id": 1, "b_kind": 1, "b_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        Ok(())
    }

    fn duplicate_key_error(err: &mongodb::error::Error) -> bool {
        // Canonical server-side message includes "E11000".
        err.to_string().contains("E11000")
    }

    fn mongo_err_to_storage(err: mongodb::error::Error) -> StorageError {
        if Self::duplicate_key_error(&err) {
            return StorageError::duplicate_key(&err.to_string());
        }

        StorageError::store_unavailable(&err.to_string())
    }

    /// Timestamps must be serialized the same way in filters as in documents
    /// (chrono via serde), otherwise `$gt` comparisons silently fail.
    fn bson_timestamp(value: DateTime<Utc>) -> Result<Bson, StorageError> {
        bson::to_bson(&value).map_err(|e| StorageError::store_unavailable(&e.to_string()))
    }
}

#[async_trait]
impl ClientStorage for MongoStorage {
    async fn create_client(&self, client: &Client) -> Result<(), StorageError> {
        self.clients
            .insert_one(client, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, StorageError> {
        self.clients
            .find_one(doc! { "client_id": client_id }, None)
            .await
            .map_err(Self::mongo_err_to_storage)
    }

    async fn update_client(&self, client: &Client) -> Result<(), StorageError> {
        let result = self
            .clients
            .update_one(
                doc! { "client_id": client.client_id.as_str() },
                doc! { "$set": {
                    "client_secret_hash": client.client_secret_hash.as_str(),
                    "redirect_uri": client.redirect_uri.as_str(),
                    "name": client.name.as_str(),
                    "updated_at": Self::bson_timestamp(client.updated_at)?,
                } },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        if result.matched_count == 0 {
            return Err(StorageError::not_found("client"));
        }

        Ok(())
    }

    async fn delete_client(&self, client_id: &str) -> Result<(), StorageError> {
        self.relations
            .delete_many(
                doc! { "$or": [
                    { "a_kind": "client", "a_id": client_id },
                    { "b_kind": "client", "b_id": client_id },
                ] },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        self.clients
            .delete_one(doc! { "client_id": client_id }, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn list_clients(&self, limit: u32, offset: u32) -> Result<Vec<Client>, StorageError> {
        let options = FindOptions::builder()
            .sort(doc! { "client_id": 1 })
            .skip(u64::from(offset))
            .limit(i64::from(limit))
            .build();

        self.clients
            .find(None, options)
            .await
            .map_err(Self::mongo_err_to_storage)?
            .try_collect()
            .await
            .map_err(Self::mongo_err_to_storage)
    }
}

#[async_trait]
impl ScopeStorage for MongoStorage {
    async fn create_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        self.scopes
            .insert_one(scope, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn get_scope(&self, name: &str) -> Result<Option<Scope>, StorageError> {
        self.scopes
            .find_one(doc! { "name": name }, None)
            .await
            .map_err(Self::mongo_err_to_storage)
    }

    async fn update_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        let result = self
            .scopes
            .update_one(
                doc! { "name": scope.name.as_str() },
                doc! { "$set": {
                    "description": scope.description.as_str(),
                    "updated_at": Self::bson_timestamp(scope.updated_at)?,
                } },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        if result.matched_count == 0 {
            return Err(StorageError::not_found("scope"));
        }

        Ok(())
    }

    async fn delete_scope(&self, name: &str) -> Result<(), StorageError> {
        self.relations
            .delete_many(
                doc! { "$or": [
                    { "a_kind": "scope", "a_id": name },
                    { "b_kind": "scope", "b_id": name },
                ] },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        self.scopes
            .delete_one(doc! { "name": name }, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn list_scopes(&self, limit: u32, offset: u32) -> Result<Vec<Scope>, StorageError> {
        let options = FindOptions::builder()
            .sort(doc! { "name": 1 })
            .skip(u64::from(offset))
            .limit(i64::from(limit))
            .build();

        self.scopes
            .find(None, options)
            .await
            .map_err(Self::mongo_err_to_storage)?
            .try_collect()
            .await
            .map_err(Self::mongo_err_to_storage)
    }
}

#[async_trait]
impl SessionStorage for MongoStorage {
    async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
        self.sessions
            .insert_one(session, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StorageError> {
        self.sessions
            .find_one(doc! { "id": id }, None)
            .await
            .map_err(Self::mongo_err_to_storage)
    }

    async fn update_session(&self, session: &Session) -> Result<(), StorageError> {
        let result = self
            .sessions
            .update_one(
                doc! { "id": session.id.as_str() },
                doc! { "$set": {
                    "owner_type": session.owner_type.as_str(),
                    "owner_id": session.owner_id.as_str(),
                    "updated_at": Self::bson_timestamp(session.updated_at)?,
                } },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        if result.matched_count == 0 {
            return Err(StorageError::not_found("session"));
        }

        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StorageError> {
        // Cascade children first so a crash mid-delete leaves orphaned
        // children reachable for a retry, never a childless dangling session.
        let token_ids: Vec<String> = self
            .access_tokens
            .find(doc! { "session_id": id }, None)
            .await
            .map_err(Self::mongo_err_to_storage)?
            .try_collect::<Vec<AccessToken>>()
            .await
            .map_err(Self::mongo_err_to_storage)?
            .into_iter()
            .map(|t| t.id)
            .collect();

        if !token_ids.is_empty() {
            self.refresh_tokens
                .delete_many(doc! { "access_token_id": { "$in": token_ids } }, None)
                .await
                .map_err(Self::mongo_err_to_storage)?;
        }

        self.access_tokens
            .delete_many(doc! { "session_id": id }, None)
            .await
            .map_err(Self::mongo_err_to_storage)?;

        self.authorization_codes
            .delete_many(doc! { "session_id": id }, None)
            .await
            .map_err(Self::mongo_err_to_storage)?;

        self.relations
            .delete_many(
                doc! { "$or": [
                    { "a_kind": "session", "a_id": id },
                    { "b_kind": "session", "b_id": id },
                ] },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        self.sessions
            .delete_one(doc! { "id": id }, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn list_client_sessions(&self, client_id: &str) -> Result<Vec<Session>, StorageError> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();

        self.sessions
            .find(doc! { "client_id": client_id }, options)
            .await
            .map_err(Self::mongo_err_to_storage)?
            .try_collect()
            .await
            .map_err(Self::mongo_err_to_storage)
    }
}

#[async_trait]
impl AuthCodeStorage for MongoStorage {
    async fn create_authorization_code(
        &self,
        auth_code: &AuthorizationCode,
    ) -> Result<(), StorageError> {
        self.authorization_codes
            .insert_one(auth_code, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn get_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, StorageError> {
        self.authorization_codes
            .find_one(doc! { "code": code }, None)
            .await
            .map_err(Self::mongo_err_to_storage)
    }

    async fn consume_authorization_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StorageError> {
        let filter = doc! {
            "code": code,
            "used": false,
            "expires_at": { "$gt": Self::bson_timestamp(now)? },
        };

        let consumed = self
            .authorization_codes
            .find_one_and_update(
                filter,
                doc! { "$set": { "used": true } },
                FindOneAndUpdateOptions::default(),
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        // The default return is the pre-image; reflect the flip.
        Ok(consumed.map(|mut c| {
            c.used = true;
            c
        }))
    }

    async fn delete_authorization_code(&self, code: &str) -> Result<(), StorageError> {
        self.authorization_codes
            .delete_one(doc! { "code": code }, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn purge_expired_codes(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        self.authorization_codes
            .delete_many(
                doc! { "expires_at": { "$lte": Self::bson_timestamp(now)? } },
                None,
            )
            .await
            .map(|r| r.deleted_count)
            .map_err(Self::mongo_err_to_storage)
    }
}

#[async_trait]
impl AccessTokenStorage for MongoStorage {
    async fn create_access_token(&self, token: &AccessToken) -> Result<(), StorageError> {
        self.access_tokens
            .insert_one(token, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn get_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<AccessToken>, StorageError> {
        self.access_tokens
            .find_one(doc! { "access_token": access_token }, None)
            .await
            .map_err(Self::mongo_err_to_storage)
    }

    async fn get_access_token_by_id(&self, id: &str) -> Result<Option<AccessToken>, StorageError> {
        self.access_tokens
            .find_one(doc! { "id": id }, None)
            .await
            .map_err(Self::mongo_err_to_storage)
    }

    async fn delete_access_token(&self, access_token: &str) -> Result<(), StorageError> {
        if let Some(token) = self.get_access_token(access_token).await? {
            self.refresh_tokens
                .delete_many(doc! { "access_token_id": token.id.as_str() }, None)
                .await
                .map_err(Self::mongo_err_to_storage)?;
        }

        self.access_tokens
            .delete_one(doc! { "access_token": access_token }, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let cutoff = Self::bson_timestamp(now)?;

        let expired_ids: Vec<String> = self
            .access_tokens
            .find(doc! { "expires_at": { "$lte": cutoff.clone() } }, None)
            .await
            .map_err(Self::mongo_err_to_storage)?
            .try_collect::<Vec<AccessToken>>()
            .await
            .map_err(Self::mongo_err_to_storage)?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let refresh = self
            .refresh_tokens
            .delete_many(
                doc! { "$or": [
                    { "expires_at": { "$lte": cutoff.clone() } },
                    { "access_token_id": { "$in": expired_ids } },
                ] },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?
            .deleted_count;

        let access = self
            .access_tokens
            .delete_many(doc! { "expires_at": { "$lte": cutoff } }, None)
            .await
            .map_err(Self::mongo_err_to_storage)?
            .deleted_count;

        Ok(refresh + access)
    }
}

#[async_trait]
impl RefreshTokenStorage for MongoStorage {
    async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), StorageError> {
        self.refresh_tokens
            .insert_one(token, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn get_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<RefreshToken>, StorageError> {
        self.refresh_tokens
            .find_one(doc! { "refresh_token": refresh_token }, None)
            .await
            .map_err(Self::mongo_err_to_storage)
    }

    async fn rotate_refresh_token(
        &self,
        old_refresh_token: &str,
        now: DateTime<Utc>,
        new_access: &AccessToken,
        new_refresh: &RefreshToken,
    ) -> Result<bool, StorageError> {
        // The conditional consume is the single-winner gate. The follow-up
        // inserts are not in the same atomic unit (no multi-document
        // transaction assumed); a failure there leaves only an
        // already-revoked old token, which fails closed.
        let filter = doc! {
            "refresh_token": old_refresh_token,
            "revoked": false,
            "expires_at": { "$gt": Self::bson_timestamp(now)? },
        };

        let consumed = self
            .refresh_tokens
            .find_one_and_update(
                filter,
                doc! { "$set": { "revoked": true } },
                FindOneAndUpdateOptions::default(),
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        if consumed.is_none() {
            return Ok(false);
        }

        self.create_access_token(new_access).await?;
        self.create_refresh_token(new_refresh).await?;

        Ok(true)
    }

    async fn delete_refresh_token(&self, refresh_token: &str) -> Result<(), StorageError> {
        self.refresh_tokens
            .delete_one(doc! { "refresh_token": refresh_token }, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }
}

#[async_trait]
impl RelationStorage for MongoStorage {
    async fn associate(
        &self,
        a_kind: EntityKind,
        a_id: &str,
        b_kind: EntityKind,
        b_id: &str,
    ) -> Result<(), StorageError> {
        let row = doc! {
            "a_kind": a_kind.as_str(),
            "a_id": a_id,
            "b_kind": b_kind.as_str(),
            "b_id": b_id,
        };

        // Upsert against the exact row: re-associating is a no-op.
        self.relations
            .update_one(
                row.clone(),
                doc! { "$setOnInsert": row },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn dissociate(
        &self,
        a_kind: EntityKind,
        a_id: &str,
        b_kind: EntityKind,
        b_id: &str,
    ) -> Result<(), StorageError> {
        self.relations
            .delete_many(
                doc! { "$or": [
                    { "a_kind": a_kind.as_str(), "a_id": a_id, "b_kind": b_kind.as_str(), "b_id": b_id },
                    { "a_kind": b_kind.as_str(), "a_id": b_id, "b_kind": a_kind.as_str(), "b_id": a_id },
                ] },
                None,
            )
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn related(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Vec<(EntityKind, String)>, StorageError> {
        let rows: Vec<Relation> = self
            .relations
            .find(
                doc! { "$or": [
                    { "a_kind": kind.as_str(), "a_id": id },
                    { "b_kind": kind.as_str(), "b_id": id },
                ] },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?
            .try_collect()
            .await
            .map_err(Self::mongo_err_to_storage)?;

        Ok(rows.iter().filter_map(|rel| rel.other(kind, id)).collect())
    }

    async fn dissociate_all(&self, kind: EntityKind, id: &str) -> Result<(), StorageError> {
        self.relations
            .delete_many(
                doc! { "$or": [
                    { "a_kind": kind.as_str(), "a_id": id },
                    { "b_kind": kind.as_str(), "b_id": id },
                ] },
                None,
            )
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }
}

#[async_trait]
impl Storage for MongoStorage {
    async fn init(&self) -> Result<(), StorageError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(Self::mongo_err_to_storage)?;
        self.ensure_indexes().await
    }

    async fn revoke_token(&self, token: &str) -> Result<(), StorageError> {
        self.access_tokens
            .update_many(
                doc! { "access_token": token },
                doc! { "$set": { "revoked": true } },
                None,
            )
            .await
            .map_err(Self::mongo_err_to_storage)?;

        // A matching access token also takes its child refresh tokens down.
        let access_token_id = self
            .get_access_token(token)
            .await?
            .map(|t| t.id)
            .unwrap_or_default();

        self.refresh_tokens
            .update_many(
                doc! { "$or": [
                    { "refresh_token": token },
                    { "access_token_id": access_token_id.as_str() },
                ] },
                doc! { "$set": { "revoked": true } },
                None,
            )
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }

    async fn healthcheck(&self) -> Result<(), StorageError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(Self::mongo_err_to_storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn timestamp_filters_match_document_serialization() {
        let now = Utc::now();
        let token = AccessToken::new(
            "session_1".to_string(),
            "read".to_string(),
            now,
            Duration::seconds(60),
        );

        let doc = bson::to_document(&token).expect("token should serialize to bson document");
        let filter_value =
            MongoStorage::bson_timestamp(token.expires_at).expect("timestamp should serialize");

        assert_eq!(doc.get("expires_at"), Some(&filter_value));
    }

    #[test]
    fn relation_documents_store_kind_strings() {
        let rel = Relation::new(EntityKind::Client, "c1", EntityKind::Grant, "client_credentials");
        let doc = bson::to_document(&rel).expect("relation should serialize");

        assert_eq!(doc.get_str("a_kind").unwrap(), "client");
        assert_eq!(doc.get_str("b_kind").unwrap(), "grant");
    }
}
