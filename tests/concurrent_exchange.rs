use std::sync::Arc;

use futures::future::join_all;

use oauth2_token_store::models::StorageError;
use oauth2_token_store::{Config, DatabaseConfig, LifetimeConfig, PolicyConfig, StorageFacade, SystemClock};

async fn facade_on_temp_db(
    dir: &tempfile::TempDir,
) -> Result<Arc<StorageFacade>, Box<dyn std::error::Error>> {
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("store.db").display()
    );

    let config = Config {
        database: DatabaseConfig { url: url.clone() },
        policy: PolicyConfig::default(),
        lifetimes: LifetimeConfig::default(),
        op_timeout_secs: Some(30),
    };

    let storage = oauth2_token_store::storage::create_storage(&url).await?;
    storage.init().await?;

    Ok(Arc::new(StorageFacade::new(
        storage,
        Arc::new(SystemClock),
        &config,
    )))
}

/// A race between N concurrent exchanges of the same code must produce
/// exactly one success; the rest fail, and none sees a second session.
#[tokio::test]
async fn concurrent_code_exchange_has_exactly_one_winner(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let facade = facade_on_temp_db(&dir).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    let session = facade.start_user_session("client_1", "user_1", "read").await?;
    let code = facade
        .issue_authorization_code(&session.id, "http://localhost/cb", "read")
        .await?;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let facade = facade.clone();
            let code = code.code.clone();
            tokio::spawn(async move { facade.exchange_authorization_code(&code).await })
        })
        .collect();

    let outcomes = join_all(tasks).await;

    let mut winners = 0;
    for outcome in outcomes {
        match outcome? {
            Ok(exchanged) => {
                assert_eq!(exchanged.id, session.id);
                winners += 1;
            }
            Err(StorageError::NotFound(_)) => {}
            Err(other) => panic!("unexpected loser error: {other}"),
        }
    }

    assert_eq!(winners, 1, "exactly one exchange may succeed");

    Ok(())
}

/// Concurrent rotations of one refresh token: one winner, and the losers
/// leave no stray token pairs behind.
#[tokio::test]
async fn concurrent_refresh_rotation_has_exactly_one_winner(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let facade = facade_on_temp_db(&dir).await?;

    facade
        .create_client("client_1", "s3cret", "http://localhost/cb", "test client")
        .await?;
    let session = facade.start_user_session("client_1", "user_1", "read").await?;
    let access = facade.issue_access_token(&session.id, "read").await?;
    let refresh = facade.issue_refresh_token(&access.access_token).await?;

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let facade = facade.clone();
            let refresh = refresh.refresh_token.clone();
            tokio::spawn(async move { facade.refresh_access_token(&refresh, None).await })
        })
        .collect();

    let outcomes = join_all(tasks).await;

    let mut winning_pairs = Vec::new();
    for outcome in outcomes {
        match outcome? {
            Ok(pair) => winning_pairs.push(pair),
            Err(StorageError::NotFound(_) | StorageError::Revoked(_)) => {}
            Err(other) => panic!("unexpected loser error: {other}"),
        }
    }

    assert_eq!(winning_pairs.len(), 1, "exactly one rotation may succeed");

    // The winner's pair is live; the consumed token is gone for good.
    let (new_access, _new_refresh) = &winning_pairs[0];
    facade.validate_access_token(&new_access.access_token).await?;
    assert!(facade
        .refresh_access_token(&refresh.refresh_token, None)
        .await
        .is_err());

    Ok(())
}
