use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use storefront_relay::{
    unix_timestamp, EventSigner, KeysSigner, NostrRelayTransport, RelayPool, RelayTransport,
    StorefrontClient, StorefrontConfig, SubscriptionAggregator, UnsignedEvent, KIND_APP,
};

#[tokio::test]
#[ignore]
async fn publish_and_fetch_app_fixture() {
    let relay = std::env::var("STOREFRONT_TEST_RELAY").expect("STOREFRONT_TEST_RELAY missing");
    let signer = match std::env::var("STOREFRONT_TEST_KEY") {
        Ok(secret) => KeysSigner::parse(&secret).expect("invalid secret key"),
        Err(_) => KeysSigner::generate(),
    };

    let d_tag = format!("dev.storefront.test{}", unix_timestamp());
    let unsigned = UnsignedEvent::new(KIND_APP, r#"{"name":"Fixture App"}"#)
        .tag(["d", d_tag.as_str()])
        .tag(["f", "android-arm64-v8a"])
        .tag(["name", "Fixture App"]);
    let event = signer.sign(unsigned).await.unwrap();

    let transport: Arc<dyn RelayTransport> =
        Arc::new(NostrRelayTransport::new(relay.clone()).await.unwrap());
    let pool = Arc::new(RelayPool::new(vec![transport]));
    pool.open().await;
    let publisher = SubscriptionAggregator::new(Arc::clone(&pool));
    let summary = publisher
        .publish(&[relay.clone()], &event)
        .await
        .unwrap();
    assert_eq!(summary.acknowledged, 1);
    pool.close().await;

    let db_path = temp_db_path();
    let config = StorefrontConfig::default()
        .with_primary_relay(relay.clone())
        .with_profile_relay(relay.clone())
        .with_social_relays([relay.clone()])
        .with_wallet_relays(Vec::<String>::new())
        .with_query_timeout(Duration::from_secs(10))
        .with_cache_path(&db_path);
    let client = StorefrontClient::connect(config).await.unwrap();

    let app = client
        .fetch_app(&signer.public_key(), &d_tag)
        .await
        .expect("published app not found");
    assert_eq!(app.id, event.id);
    assert_eq!(app.name, "Fixture App");
    client.close().await;

    let conn = Connection::open(&db_path).unwrap();
    let cached: Option<String> = conn
        .query_row(
            "SELECT lookup_key FROM event_cache WHERE kind = ?1 AND lookup_key = ?2",
            params![KIND_APP, format!("{}:{}", signer.public_key(), d_tag)],
            |row| row.get(0),
        )
        .optional()
        .unwrap();

    assert!(cached.is_some());
}

fn temp_db_path() -> PathBuf {
    let name = format!("storefront_cache_test_{}.db", unix_timestamp());
    std::env::temp_dir().join(name)
}
