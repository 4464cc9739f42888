//! Wire schema of the external processing service, protocol version 1
//!
//! ```text
//! POST {endpoint}/v1/process
//! x-orpheon-protocol: 1
//!
//! request  { "storage_key": string, "metadata": { string: string } }
//! response { "status": "ok" | "error", "result_ref": string, "message": string }
//! ```
//!
//! Metadata keys live in two namespaces: `media.*` describes the artifact and
//! `job.*` identifies the ingestion job it belongs to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_HEADER: &str = "x-orpheon-protocol";
pub const PROCESS_PATH: &str = "/v1/process";

pub const KEY_JOB_ID: &str = "job.id";
pub const KEY_SOURCE_REF: &str = "media.source_ref";
pub const KEY_MIME_TYPE: &str = "media.mime_type";
pub const KEY_SIZE_BYTES: &str = "media.size_bytes";
pub const KEY_SHA256: &str = "media.sha256";
pub const KEY_DURATION_SECS: &str = "media.duration_secs";
pub const KEY_CODEC: &str = "media.codec";
pub const KEY_TITLE: &str = "media.title";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub storage_key: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub status: ProcessStatus,
    #[serde(default)]
    pub result_ref: String,
    #[serde(default)]
    pub message: String,
}

/// What the processing service is told about a stored artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactMetadata {
    pub job_id: Uuid,
    pub source_ref: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub duration_secs: Option<f64>,
    pub codec: Option<String>,
    pub title: Option<String>,
}

impl ArtifactMetadata {
    /// Flatten into the namespaced string map carried on the wire.
    /// Absent optional fields are omitted rather than sent empty.
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(KEY_JOB_ID.to_string(), self.job_id.to_string());
        map.insert(KEY_SOURCE_REF.to_string(), self.source_ref.clone());
        map.insert(KEY_MIME_TYPE.to_string(), self.mime_type.clone());
        map.insert(KEY_SIZE_BYTES.to_string(), self.size_bytes.to_string());
        map.insert(KEY_SHA256.to_string(), self.sha256.clone());
        if let Some(duration) = self.duration_secs {
            map.insert(KEY_DURATION_SECS.to_string(), format!("{duration:.3}"));
        }
        if let Some(codec) = &self.codec {
            map.insert(KEY_CODEC.to_string(), codec.clone());
        }
        if let Some(title) = &self.title {
            map.insert(KEY_TITLE.to_string(), title.clone());
        }
        map
    }
}
