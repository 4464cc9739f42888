use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{BodyReader, ObjectStore, ObjectStream, PutOptions, PutReceipt, StorageError};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    content_type: Option<String>,
}

/// Object store held in process memory
///
/// Objects are inserted only once their whole body has been read, so `get`
/// never observes a partial write.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .and_then(|object| object.content_type.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn put(
        &self,
        key: &str,
        body: ObjectStream,
        options: PutOptions,
    ) -> Result<PutReceipt, StorageError> {
        let mut reader = BodyReader::new(body, options.max_bytes);
        let data = reader.read_part(usize::MAX).await?;
        let receipt = reader.into_receipt(key);

        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data: Arc::new(data),
                content_type: options.content_type,
            },
        );
        Ok(receipt)
    }

    async fn get(&self, key: &str) -> Result<ObjectStream, StorageError> {
        let data = self
            .objects
            .read()
            .await
            .get(key)
            .map(|object| Arc::clone(&object.data))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let chunks: Vec<_> = data.chunks(READ_CHUNK).map(|c| Ok(c.to_vec())).collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::bytes_body;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStorage::new();

        let receipt = store
            .put(
                "media/a/artifact",
                bytes_body(b"Hello, World!".to_vec()),
                PutOptions::default().content_type("audio/webm"),
            )
            .await
            .unwrap();
        assert_eq!(receipt.size, 13);
        assert_eq!(
            receipt.checksum,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );

        assert_eq!(store.get_bytes("media/a/artifact").await.unwrap(), b"Hello, World!");
        assert_eq!(
            store.content_type("media/a/artifact").await.as_deref(),
            Some("audio/webm")
        );

        store.delete("media/a/artifact").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_streams_in_chunks() {
        let store = MemoryStorage::new();
        store
            .put("k", bytes_body(vec![9u8; READ_CHUNK * 2 + 1]), PutOptions::default())
            .await
            .unwrap();

        let sizes: Vec<usize> = store
            .get("k")
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap().len())
            .collect()
            .await;
        assert_eq!(sizes, vec![READ_CHUNK, READ_CHUNK, 1]);
    }

    #[tokio::test]
    async fn test_missing_keys_are_not_found() {
        let store = MemoryStorage::new();

        assert!(matches!(store.get("nope").await, Err(StorageError::NotFound(_))));
        assert_eq!(
            store.delete("nope").await,
            Err(StorageError::NotFound("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStorage::new();
        store.put("k", bytes_body(vec![1, 2, 3]), PutOptions::default()).await.unwrap();
        store.put("k", bytes_body(vec![4]), PutOptions::default()).await.unwrap();

        assert_eq!(store.get_bytes("k").await.unwrap(), vec![4]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_oversized_body_leaves_key_empty() {
        let store = MemoryStorage::new();
        let body = stream::iter((0..4).map(|_| Ok(vec![0u8; 1024]))).boxed();

        let err = store
            .put("k", body, PutOptions::default().max_bytes(2048))
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::TooLarge(2048));
        assert!(!store.contains("k").await);
    }

    #[tokio::test]
    async fn test_failed_body_keeps_previous_object() {
        let store = MemoryStorage::new();
        store.put("k", bytes_body(vec![1]), PutOptions::default()).await.unwrap();

        let body = stream::iter(vec![
            Ok(vec![2u8; 16]),
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated")),
        ])
        .boxed();
        let err = store.put("k", body, PutOptions::default()).await.unwrap_err();

        assert!(matches!(err, StorageError::Source(_)));
        assert_eq!(store.get_bytes("k").await.unwrap(), vec![1]);
    }
}
