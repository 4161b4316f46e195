#[tokio::test]
async fn storage_factory_rejects_mongo_without_feature() {
    // This test intentionally runs only when the `mongo` feature is NOT enabled.
    // It ensures we fail fast with a clear error message.
    #[cfg(not(feature = "mongo"))]
    {
        let result =
            oauth2_token_store::storage::create_storage("mongodb://localhost:27017/token_store")
                .await;

        assert!(
            result.is_err(),
            "should error when mongo backend requested without feature"
        );

        let err = result.err().unwrap();

        assert!(
            err.to_string()
                .contains("built without the `mongo` feature"),
            "unexpected error: {err}"
        );
    }

    // When `mongo` is enabled, this test becomes a no-op to avoid requiring a live Mongo instance.
    #[cfg(feature = "mongo")]
    {
        // nothing
    }
}

#[tokio::test]
async fn storage_factory_builds_observed_sqlite_backend(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("factory_test.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let storage = oauth2_token_store::storage::create_storage(&url).await?;
    storage.init().await?;
    storage.healthcheck().await?;

    Ok(())
}
