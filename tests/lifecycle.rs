use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use oauth2_token_store::models::StorageError;
use oauth2_token_store::{Clock, Config, DatabaseConfig, LifetimeConfig, PolicyConfig, StorageFacade};

/// A clock the tests can move forward, so expiry is exercised without
/// sleeping.
struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

async fn setup(
    policy: PolicyConfig,
) -> Result<(StorageFacade, Arc<FixedClock>, tempfile::TempDir), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("store.db").display()
    );

    let config = Config {
        database: DatabaseConfig { url: url.clone() },
        policy,
        lifetimes: LifetimeConfig::default(),
        op_timeout_secs: Some(10),
    };

    let storage = oauth2_token_store::storage::create_storage(&url).await?;
    storage.init().await?;

    let clock = Arc::new(FixedClock::new(Utc::now()));
    let facade = StorageFacade::new(storage, clock.clone(), &config);

    Ok((facade, clock, dir))
}

#[tokio::test]
async fn authorization_code_flow_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let (facade, _clock, _dir) = setup(PolicyConfig::default()).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    facade.create_scope("read", "read access").await?;
    facade.create_scope("write", "write access").await?;

    let session = facade
        .start_user_session("client_1", "user_1", "read write")
        .await?;
    let mut granted = facade.session_scopes(&session.id).await?;
    granted.sort();
    assert_eq!(granted, vec!["read".to_string(), "write".to_string()]);

    let code = facade
        .issue_authorization_code(&session.id, "http://localhost/cb", "read write")
        .await?;

    let exchanged = facade.exchange_authorization_code(&code.code).await?;
    assert_eq!(exchanged.id, session.id);

    // Single-use: a second exchange of the same code fails.
    assert!(matches!(
        facade.exchange_authorization_code(&code.code).await,
        Err(StorageError::NotFound(_))
    ));

    let access = facade.issue_access_token(&session.id, "read write").await?;
    let validated = facade.validate_access_token(&access.access_token).await?;
    assert_eq!(validated.id, session.id);

    let refresh = facade.issue_refresh_token(&access.access_token).await?;

    // Narrowing the scope set on refresh is allowed; the old refresh token
    // dies with the rotation.
    let (new_access, new_refresh) = facade
        .refresh_access_token(&refresh.refresh_token, Some("read"))
        .await?;
    assert_eq!(new_access.scope, "read");
    assert_ne!(new_refresh.refresh_token, refresh.refresh_token);

    assert!(matches!(
        facade.refresh_access_token(&refresh.refresh_token, None).await,
        Err(StorageError::Revoked(_) | StorageError::NotFound(_))
    ));

    // The replacement pair works.
    facade.validate_access_token(&new_access.access_token).await?;
    facade
        .refresh_access_token(&new_refresh.refresh_token, None)
        .await?;

    Ok(())
}

#[tokio::test]
async fn expired_authorization_code_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (facade, clock, _dir) = setup(PolicyConfig::default()).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    let session = facade.start_user_session("client_1", "user_1", "read").await?;
    let code = facade
        .issue_authorization_code(&session.id, "http://localhost/cb", "read")
        .await?;

    clock.advance(Duration::seconds(601));

    assert!(matches!(
        facade.exchange_authorization_code(&code.code).await,
        Err(StorageError::Expired(_))
    ));

    // An unknown code is NotFound, not Expired.
    assert!(matches!(
        facade.exchange_authorization_code("bogus-code").await,
        Err(StorageError::NotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn validation_reports_expiry_before_revocation() -> Result<(), Box<dyn std::error::Error>> {
    let (facade, clock, _dir) = setup(PolicyConfig::default()).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    let session = facade.start_client_session("client_1", "read").await?;
    let token = facade.issue_access_token(&session.id, "read").await?;

    facade.revoke_token(&token.access_token).await?;
    facade.revoke_token(&token.access_token).await?; // revoking twice is not an error

    assert!(matches!(
        facade.validate_access_token(&token.access_token).await,
        Err(StorageError::Revoked(_))
    ));

    // Once past expiry the token reports Expired regardless of revocation.
    clock.advance(Duration::seconds(3601));
    assert!(matches!(
        facade.validate_access_token(&token.access_token).await,
        Err(StorageError::Expired(_))
    ));

    assert!(matches!(
        facade.validate_access_token("unknown-token").await,
        Err(StorageError::NotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn refresh_rejects_scope_escalation() -> Result<(), Box<dyn std::error::Error>> {
    let (facade, _clock, _dir) = setup(PolicyConfig::default()).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    let session = facade.start_user_session("client_1", "user_1", "read").await?;
    let access = facade.issue_access_token(&session.id, "read").await?;
    let refresh = facade.issue_refresh_token(&access.access_token).await?;

    let escalated = facade
        .refresh_access_token(&refresh.refresh_token, Some("read write"))
        .await;
    assert!(matches!(escalated, Err(StorageError::ScopeEscalation(_))));

    // The failed attempt must not have burned the refresh token.
    let (rotated, _) = facade
        .refresh_access_token(&refresh.refresh_token, Some("read"))
        .await?;
    assert_eq!(rotated.scope, "read");

    Ok(())
}

#[tokio::test]
async fn refresh_of_expired_token_fails() -> Result<(), Box<dyn std::error::Error>> {
    let (facade, clock, _dir) = setup(PolicyConfig::default()).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    let session = facade.start_user_session("client_1", "user_1", "read").await?;
    let access = facade.issue_access_token(&session.id, "read").await?;
    let refresh = facade.issue_refresh_token(&access.access_token).await?;

    clock.advance(Duration::seconds(2_592_001));

    assert!(matches!(
        facade.refresh_access_token(&refresh.refresh_token, None).await,
        Err(StorageError::Expired(_))
    ));

    Ok(())
}

#[tokio::test]
async fn scope_restriction_gates_issuance_when_enabled() -> Result<(), Box<dyn std::error::Error>> {
    let policy = PolicyConfig {
        limit_clients_to_scopes: true,
        ..PolicyConfig::default()
    };
    let (facade, clock, _dir) = setup(policy).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    facade.create_scope("read", "read access").await?;
    facade.create_scope("write", "write access").await?;
    facade.allow_client_scope("client_1", "read").await?;

    let session = facade.start_user_session("client_1", "user_1", "read").await?;

    assert!(matches!(
        facade.issue_access_token(&session.id, "write").await,
        Err(StorageError::PolicyViolation(_))
    ));

    let token = facade.issue_access_token(&session.id, "read").await?;
    facade.validate_access_token(&token.access_token).await?;

    clock.advance(Duration::seconds(3601));
    assert!(matches!(
        facade.validate_access_token(&token.access_token).await,
        Err(StorageError::Expired(_))
    ));

    // Withdrawing the association closes the gate again.
    facade.forbid_client_scope("client_1", "read").await?;
    assert!(matches!(
        facade.issue_access_token(&session.id, "read").await,
        Err(StorageError::PolicyViolation(_))
    ));

    Ok(())
}

#[tokio::test]
async fn scope_restriction_is_inert_when_disabled() -> Result<(), Box<dyn std::error::Error>> {
    let (facade, _clock, _dir) = setup(PolicyConfig::default()).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    let session = facade.start_user_session("client_1", "user_1", "write").await?;

    // No association exists, but the flag is off: anything goes.
    facade.issue_access_token(&session.id, "write").await?;

    Ok(())
}

#[tokio::test]
async fn grant_restriction_gates_client_authentication() -> Result<(), Box<dyn std::error::Error>> {
    let policy = PolicyConfig {
        limit_clients_to_grants: true,
        ..PolicyConfig::default()
    };
    let (facade, _clock, _dir) = setup(policy).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;

    assert!(matches!(
        facade
            .authenticate_client("client_1", "s3cret", None, Some("client_credentials"))
            .await,
        Err(StorageError::PolicyViolation(_))
    ));

    facade
        .allow_client_grant("client_1", "client_credentials")
        .await?;
    facade
        .authenticate_client("client_1", "s3cret", None, Some("client_credentials"))
        .await?;

    // Credential and redirect mismatches are indistinguishable from an
    // unknown client.
    assert!(matches!(
        facade
            .authenticate_client("client_1", "wrong", None, None)
            .await,
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        facade
            .authenticate_client("client_1", "s3cret", Some("http://evil/cb"), None)
            .await,
        Err(StorageError::NotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn scope_to_grant_restriction_applies_during_resolution(
) -> Result<(), Box<dyn std::error::Error>> {
    let policy = PolicyConfig {
        limit_scopes_to_grants: true,
        ..PolicyConfig::default()
    };
    let (facade, _clock, _dir) = setup(policy).await?;

    facade.create_scope("read", "read access").await?;
    facade.allow_scope_grant("read", "authorization_code").await?;

    let resolved = facade
        .resolve_scopes("read", Some("authorization_code"), None)
        .await?;
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].name, "read");

    assert!(matches!(
        facade
            .resolve_scopes("read", Some("client_credentials"), None)
            .await,
        Err(StorageError::PolicyViolation(_))
    ));

    assert!(matches!(
        facade.resolve_scopes("unknown", None, None).await,
        Err(StorageError::NotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn session_deletion_cascades_into_tokens() -> Result<(), Box<dyn std::error::Error>> {
    let (facade, _clock, _dir) = setup(PolicyConfig::default()).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    let session = facade.start_user_session("client_1", "user_1", "read").await?;
    let token = facade.issue_access_token(&session.id, "read").await?;

    facade.delete_session(&session.id).await?;

    assert!(matches!(
        facade.validate_access_token(&token.access_token).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(facade.session_scopes(&session.id).await?.is_empty());
    assert!(facade.get_client("client_1").await?.is_some());

    Ok(())
}

#[tokio::test]
async fn malformed_identifiers_never_reach_storage() -> Result<(), Box<dyn std::error::Error>> {
    let (facade, _clock, _dir) = setup(PolicyConfig::default()).await?;

    assert!(matches!(
        facade.get_client("has space").await,
        Err(StorageError::InvalidIdentifier(_))
    ));
    assert!(matches!(
        facade.get_session("").await,
        Err(StorageError::InvalidIdentifier(_))
    ));
    assert!(matches!(
        facade
            .create_client(&"x".repeat(200), "s", "http://localhost/cb", "n")
            .await,
        Err(StorageError::InvalidIdentifier(_))
    ));

    Ok(())
}

#[tokio::test]
async fn purge_reclaims_expired_artifacts() -> Result<(), Box<dyn std::error::Error>> {
    let (facade, clock, _dir) = setup(PolicyConfig::default()).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    let session = facade.start_user_session("client_1", "user_1", "read").await?;
    facade
        .issue_authorization_code(&session.id, "http://localhost/cb", "read")
        .await?;
    facade.issue_access_token(&session.id, "read").await?;

    clock.advance(Duration::seconds(3601));

    let purged = facade.purge_expired().await?;
    assert!(purged >= 2, "expected code and token to be purged, got {purged}");

    Ok(())
}

#[tokio::test]
async fn facade_connect_bootstraps_from_config() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("connect.db").display()
    );

    let config = Config {
        database: DatabaseConfig { url },
        policy: PolicyConfig::default(),
        lifetimes: LifetimeConfig::default(),
        op_timeout_secs: Some(10),
    };

    let facade = StorageFacade::connect(&config).await?;
    facade.healthcheck().await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    assert!(facade.get_client("client_1").await?.is_some());

    Ok(())
}
