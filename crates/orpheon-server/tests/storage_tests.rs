//! S3 storage integration tests
//!
//! **Requirements**:
//! - MinIO or S3 reachable, with the bucket from `S3_BUCKET` already created
//! - `S3_ENDPOINT` set (e.g. "http://localhost:9000"); the tests are skipped
//!   otherwise
//!
//! ```bash
//! S3_ENDPOINT=http://localhost:9000 S3_PATH_STYLE=true cargo test --test storage_tests
//! ```

use futures::StreamExt;
use uuid::Uuid;

use orpheon_server::storage::{
    artifact_key, bytes_body, ObjectStore, PutOptions, S3Storage, StorageConfig, StorageError,
};

const MIB: usize = 1024 * 1024;

fn setup_storage() -> Option<S3Storage> {
    if std::env::var("S3_ENDPOINT").is_err() {
        return None;
    }
    let config = StorageConfig::from_env().ok()?;
    Some(S3Storage::new(config))
}

fn test_key(test_name: &str) -> String {
    artifact_key(&format!("test/{test_name}"), Uuid::new_v4())
}

#[tokio::test]
async fn test_put_get_delete() {
    let Some(storage) = setup_storage() else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let key = test_key("put_get_delete");
    let data = b"opus frames".to_vec();

    let receipt = storage
        .put(&key, bytes_body(data.clone()), PutOptions::default().content_type("audio/ogg"))
        .await
        .expect("put should succeed");
    assert_eq!(receipt.key, key);
    assert_eq!(receipt.size, data.len() as u64);
    assert_eq!(receipt.checksum.len(), 64);

    let fetched = storage.get_bytes(&key).await.expect("get should succeed");
    assert_eq!(fetched, data);

    storage.delete(&key).await.expect("delete should succeed");
    assert!(matches!(storage.get(&key).await, Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_multipart_put_round_trips() {
    let Some(storage) = setup_storage() else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let key = test_key("multipart");
    // 20 MiB in 1 MiB chunks spans three parts.
    let body = futures::stream::iter((0..20u8).map(|i| Ok(vec![i; MIB]))).boxed();

    let receipt = storage
        .put(&key, body, PutOptions::default().content_type("audio/webm"))
        .await
        .expect("multipart put should succeed");
    assert_eq!(receipt.size, 20 * MIB as u64);

    let fetched = storage.get_bytes(&key).await.unwrap();
    assert_eq!(fetched.len(), 20 * MIB);
    assert!(fetched[19 * MIB..].iter().all(|b| *b == 19));

    storage.delete(&key).await.unwrap();
}

#[tokio::test]
async fn test_oversized_multipart_put_leaves_nothing() {
    let Some(storage) = setup_storage() else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let key = test_key("oversized");
    let body = futures::stream::iter((0..12).map(|_| Ok(vec![0u8; MIB]))).boxed();

    let result = storage
        .put(&key, body, PutOptions::default().max_bytes(10 * MIB as u64))
        .await;
    assert_eq!(result, Err(StorageError::TooLarge(10 * MIB as u64)));
    assert!(matches!(storage.get(&key).await, Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_failed_body_leaves_nothing() {
    let Some(storage) = setup_storage() else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let key = test_key("failed_body");
    let chunks = (0..10)
        .map(|_| Ok(vec![0u8; MIB]))
        .chain([Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))]);
    let body = futures::stream::iter(chunks).boxed();

    let result = storage.put(&key, body, PutOptions::default()).await;
    assert!(matches!(result, Err(StorageError::Source(_))));
    assert!(matches!(storage.get(&key).await, Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_get_missing_key() {
    let Some(storage) = setup_storage() else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let result = storage.get(&test_key("missing")).await;
    assert!(matches!(result, Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_missing_key() {
    let Some(storage) = setup_storage() else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let result = storage.delete(&test_key("delete_missing")).await;
    assert!(matches!(result, Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn test_put_overwrites_whole_object() {
    let Some(storage) = setup_storage() else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let key = test_key("overwrite");
    storage.put(&key, bytes_body(vec![1; 4096]), PutOptions::default()).await.unwrap();
    storage.put(&key, bytes_body(vec![2; 16]), PutOptions::default()).await.unwrap();

    assert_eq!(storage.get_bytes(&key).await.unwrap(), vec![2; 16]);
    storage.delete(&key).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_endpoint_is_unavailable() {
    let mut config = StorageConfig::for_minio("http://127.0.0.1:1", "nowhere");
    config.key_prefix = "test".to_string();
    let storage = S3Storage::new(config);

    let result = storage
        .put("test/unreachable", bytes_body(vec![0; 8]), PutOptions::default())
        .await;
    assert!(matches!(result, Err(StorageError::Unavailable(_))));
}
