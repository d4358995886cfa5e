//! 需要本地 Redis：`REDIS_URL=redis://... cargo test -- --ignored`

use std::time::Duration;

use application::KeyValueStore;
use infrastructure::RedisKeyValueStore;
use uuid::Uuid;

async fn store() -> RedisKeyValueStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisKeyValueStore::connect(&url).await.expect("connect redis")
}

#[tokio::test]
#[ignore = "requires local redis"]
async fn set_get_delete() {
    let store = store().await;
    store.ping().await.expect("ping");
    let key = format!("test:{}", Uuid::new_v4());

    store
        .set_ex(&key, "online", Duration::from_secs(30))
        .await
        .expect("set");
    assert_eq!(store.get(&key).await.expect("get").as_deref(), Some("online"));

    store.delete(&key).await.expect("delete");
    assert_eq!(store.get(&key).await.expect("get"), None);
}

#[tokio::test]
#[ignore = "requires local redis"]
async fn scan_prefix_lists_matching_keys() {
    let store = store().await;
    let prefix = format!("scan:{}:", Uuid::new_v4());
    for name in ["a", "b", "c"] {
        store
            .set_ex(&format!("{prefix}{name}"), name, Duration::from_secs(30))
            .await
            .expect("set");
    }

    let entries = store.scan_prefix(&prefix).await.expect("scan");
    let values: Vec<&str> = entries.iter().map(|(_, v)| v.as_str()).collect();
    assert_eq!(values, ["a", "b", "c"]);

    for (key, _) in entries {
        store.delete(&key).await.expect("delete");
    }
}
