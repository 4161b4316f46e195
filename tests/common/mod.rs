use chrono::{Duration, Utc};

use token_store_core::{
    AccessToken, AuthorizationCode, Client, EntityKind, RefreshToken, Scope, Session, StorageError,
};
use token_store_ports::Storage;

/// A contract test suite that every `Storage` backend must satisfy.
///
/// This keeps backend parity honest (SQLx, Mongo, and any future backends).
pub async fn run_storage_contract(storage: &dyn Storage) -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc::now();

    // Client roundtrip
    let client = Client::new(
        "client_1".to_string(),
        "secret",
        "http://localhost/cb".to_string(),
        "test client".to_string(),
    );

    storage.create_client(&client).await?;

    let fetched = storage
        .get_client("client_1")
        .await?
        .ok_or("client should exist")?;

    assert_eq!(fetched.client_id, client.client_id);
    assert_eq!(fetched.redirect_uri, client.redirect_uri);
    assert_ne!(fetched.client_secret_hash, "secret");

    // Uniqueness parity: saving the same client_id twice must fail typed.
    let dup = storage.create_client(&client).await;
    assert!(
        matches!(dup, Err(StorageError::DuplicateKey(_))),
        "saving the same client_id twice should fail with DuplicateKey, got {dup:?}"
    );

    // Update roundtrip + missing-row behavior
    let mut renamed = fetched.clone();
    renamed.name = "renamed client".to_string();
    storage.update_client(&renamed).await?;

    let fetched = storage
        .get_client("client_1")
        .await?
        .ok_or("client should exist")?;
    assert_eq!(fetched.name, "renamed client");

    let ghost = Client::new(
        "client_ghost".to_string(),
        "secret",
        "http://localhost/cb".to_string(),
        "ghost".to_string(),
    );
    assert!(matches!(
        storage.update_client(&ghost).await,
        Err(StorageError::NotFound(_))
    ));

    assert_eq!(storage.list_clients(10, 0).await?.len(), 1);

    // Scope roundtrip
    let scope = Scope::new("read".to_string(), "read access".to_string());
    storage.create_scope(&scope).await?;

    let fetched_scope = storage
        .get_scope("read")
        .await?
        .ok_or("scope should exist")?;
    assert_eq!(fetched_scope.name, "read");

    assert!(matches!(
        storage.create_scope(&scope).await,
        Err(StorageError::DuplicateKey(_))
    ));

    let mut described = fetched_scope.clone();
    described.description = "read-only access".to_string();
    storage.update_scope(&described).await?;
    assert_eq!(
        storage
            .get_scope("read")
            .await?
            .ok_or("scope should exist")?
            .description,
        "read-only access"
    );

    storage
        .create_scope(&Scope::new("write".to_string(), "write access".to_string()))
        .await?;
    assert_eq!(storage.list_scopes(10, 0).await?.len(), 2);
    assert_eq!(storage.list_scopes(1, 1).await?.len(), 1);

    // Session roundtrip
    let session = Session::for_user("client_1".to_string(), "user_1".to_string());
    storage.create_session(&session).await?;

    let fetched_session = storage
        .get_session(&session.id)
        .await?
        .ok_or("session should exist")?;
    assert_eq!(fetched_session.client_id, "client_1");
    assert_eq!(fetched_session.owner_id, "user_1");

    assert_eq!(storage.list_client_sessions("client_1").await?.len(), 1);

    // Relation index: idempotent associate, bidirectional reads, dissociate
    storage
        .associate(EntityKind::Client, "client_1", EntityKind::Scope, "read")
        .await?;
    storage
        .associate(EntityKind::Client, "client_1", EntityKind::Scope, "read")
        .await?;

    let related = storage.related(EntityKind::Client, "client_1").await?;
    assert_eq!(related, vec![(EntityKind::Scope, "read".to_string())]);

    let reverse = storage.related(EntityKind::Scope, "read").await?;
    assert!(reverse.contains(&(EntityKind::Client, "client_1".to_string())));

    storage
        .dissociate(EntityKind::Client, "client_1", EntityKind::Scope, "read")
        .await?;
    assert!(storage
        .related(EntityKind::Client, "client_1")
        .await?
        .is_empty());

    // Deleting a scope removes only associations, never the client
    storage
        .associate(EntityKind::Client, "client_1", EntityKind::Scope, "write")
        .await?;
    storage.delete_scope("write").await?;
    assert!(storage.get_scope("write").await?.is_none());
    assert!(storage.get_client("client_1").await?.is_some());
    assert!(storage
        .related(EntityKind::Client, "client_1")
        .await?
        .is_empty());

    // Authorization code: roundtrip, then single-use consumption
    let code = AuthorizationCode::new(
        session.id.clone(),
        "http://localhost/cb".to_string(),
        "read".to_string(),
        now,
        Duration::seconds(60),
    );
    storage.create_authorization_code(&code).await?;

    let fetched_code = storage
        .get_authorization_code(&code.code)
        .await?
        .ok_or("auth code should exist")?;
    assert!(!fetched_code.used);

    let consumed = storage
        .consume_authorization_code(&code.code, now)
        .await?
        .ok_or("first consume should win")?;
    assert_eq!(consumed.session_id, session.id);

    assert!(
        storage
            .consume_authorization_code(&code.code, now)
            .await?
            .is_none(),
        "a consumed code must not be consumable again"
    );

    // An expired code is not consumable even when unused
    let stale = AuthorizationCode::new(
        session.id.clone(),
        "http://localhost/cb".to_string(),
        "read".to_string(),
        now - Duration::seconds(120),
        Duration::seconds(60),
    );
    storage.create_authorization_code(&stale).await?;
    assert!(storage
        .consume_authorization_code(&stale.code, now)
        .await?
        .is_none());

    // Access token roundtrip + revocation idempotency
    let token = AccessToken::new(
        session.id.clone(),
        "read".to_string(),
        now,
        Duration::seconds(3600),
    );
    storage.create_access_token(&token).await?;

    let fetched_token = storage
        .get_access_token(&token.access_token)
        .await?
        .ok_or("token should exist")?;
    assert!(!fetched_token.revoked);
    assert_eq!(
        storage
            .get_access_token_by_id(&token.id)
            .await?
            .ok_or("token should be readable by id")?
            .access_token,
        token.access_token
    );

    let refresh = RefreshToken::new(token.id.clone(), now, Duration::seconds(86400));
    storage.create_refresh_token(&refresh).await?;

    storage.revoke_token(&token.access_token).await?;
    storage.revoke_token(&token.access_token).await?; // idempotent
    storage.revoke_token("no-such-token").await?; // absent is a no-op

    assert!(
        storage
            .get_access_token(&token.access_token)
            .await?
            .ok_or("token should still exist")?
            .revoked
    );
    assert!(
        storage
            .get_refresh_token(&refresh.refresh_token)
            .await?
            .ok_or("refresh token should still exist")?
            .revoked,
        "revoking an access token must take its refresh tokens with it"
    );

    // Refresh rotation: single-winner conditional write
    let token2 = AccessToken::new(
        session.id.clone(),
        "read".to_string(),
        now,
        Duration::seconds(3600),
    );
    storage.create_access_token(&token2).await?;
    let refresh2 = RefreshToken::new(token2.id.clone(), now, Duration::seconds(86400));
    storage.create_refresh_token(&refresh2).await?;

    let next_access = AccessToken::new(
        session.id.clone(),
        "read".to_string(),
        now,
        Duration::seconds(3600),
    );
    let next_refresh = RefreshToken::new(next_access.id.clone(), now, Duration::seconds(86400));

    let rotated = storage
        .rotate_refresh_token(&refresh2.refresh_token, now, &next_access, &next_refresh)
        .await?;
    assert!(rotated);

    assert!(
        storage
            .get_refresh_token(&refresh2.refresh_token)
            .await?
            .ok_or("old refresh token should still exist")?
            .revoked
    );
    assert!(storage
        .get_refresh_token(&next_refresh.refresh_token)
        .await?
        .is_some());

    // Losing a rotation race writes nothing
    let orphan_access = AccessToken::new(
        session.id.clone(),
        "read".to_string(),
        now,
        Duration::seconds(3600),
    );
    let orphan_refresh = RefreshToken::new(orphan_access.id.clone(), now, Duration::seconds(86400));
    let rotated_again = storage
        .rotate_refresh_token(&refresh2.refresh_token, now, &orphan_access, &orphan_refresh)
        .await?;
    assert!(!rotated_again);
    assert!(storage
        .get_access_token(&orphan_access.access_token)
        .await?
        .is_none());

    // Session deletion cascades into codes, tokens, and scope associations
    storage
        .associate(EntityKind::Session, &session.id, EntityKind::Scope, "read")
        .await?;
    storage.delete_session(&session.id).await?;

    assert!(storage.get_session(&session.id).await?.is_none());
    assert!(storage
        .get_access_token(&token.access_token)
        .await?
        .is_none());
    assert!(storage
        .get_refresh_token(&next_refresh.refresh_token)
        .await?
        .is_none());
    assert!(storage.get_authorization_code(&code.code).await?.is_none());
    assert!(storage
        .related(EntityKind::Session, &session.id)
        .await?
        .is_empty());
    assert!(
        storage.get_client("client_1").await?.is_some(),
        "the referenced client must survive session deletion"
    );

    // Expiry purges
    let orphan_session = Session::for_client("client_1".to_string());
    storage.create_session(&orphan_session).await?;

    let old_code = AuthorizationCode::new(
        orphan_session.id.clone(),
        "http://localhost/cb".to_string(),
        "read".to_string(),
        now - Duration::seconds(7200),
        Duration::seconds(60),
    );
    storage.create_authorization_code(&old_code).await?;

    let old_token = AccessToken::new(
        orphan_session.id.clone(),
        "read".to_string(),
        now - Duration::seconds(7200),
        Duration::seconds(60),
    );
    storage.create_access_token(&old_token).await?;

    let purged_codes = storage.purge_expired_codes(now).await?;
    let purged_tokens = storage.purge_expired_tokens(now).await?;
    assert!(purged_codes >= 1, "expired codes should be reclaimed");
    assert!(purged_tokens >= 1, "expired tokens should be reclaimed");
    assert!(storage
        .get_authorization_code(&old_code.code)
        .await?
        .is_none());
    assert!(storage
        .get_access_token(&old_token.access_token)
        .await?
        .is_none());

    storage.healthcheck().await?;

    Ok(())
}
