use serde::{Deserialize, Serialize};
use std::env;

/// Default object key prefix for ingested artifacts.
pub const DEFAULT_KEY_PREFIX: &str = "media";

/// Which object store implementation backs the storage gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    /// Process-local store, for development without MinIO.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
    pub key_prefix: String,
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "s3".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" => StorageBackend::S3,
            "memory" => StorageBackend::Memory,
            other => anyhow::bail!("Unknown STORAGE_BACKEND: {}", other),
        };

        Ok(Self {
            backend,
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "orpheon-media".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            key_prefix: env::var("S3_KEY_PREFIX")
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string()),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::S3,
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            endpoint: None,
            region: "local".to_string(),
            bucket: "memory".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            path_style: false,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_for_minio() {
        let config = StorageConfig::for_minio("http://localhost:9000", "test-bucket");
        assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
        assert_eq!(config.bucket, "test-bucket");
        assert!(config.path_style);
        assert_eq!(config.backend, StorageBackend::S3);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_backend_and_prefix() {
        env::set_var("STORAGE_BACKEND", "memory");
        env::set_var("S3_KEY_PREFIX", "/uploads/");

        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.backend, StorageBackend::Memory);
        assert_eq!(config.key_prefix, "uploads");

        env::set_var("STORAGE_BACKEND", "ftp");
        assert!(StorageConfig::from_env().is_err());

        env::remove_var("STORAGE_BACKEND");
        env::remove_var("S3_KEY_PREFIX");
    }
}
