//! Cheyenne Core Interface: collaborator contracts for the vault pipeline
//!
//! The vaulting pipeline talks to exactly two external services:
//!
//! 1. **Object store**: tag reads, server-side copy with tag replacement, tag writes
//! 2. **Ordered queue**: batch send (optionally grouped) and batch delete by delivery handle
//!
//! Both are expressed as async traits so the Router and Duplication Worker can run
//! against the AWS services in production and against [`memory`] implementations in
//! tests and dry runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use cheyenne_core_interface::{ObjectRef, ObjectStore, Result};
//!
//! async fn is_vaulted<S: ObjectStore>(store: &S, object: &ObjectRef) -> Result<bool> {
//!     let tags = store.get_tags(object).await?;
//!     Ok(tags.get("uncomn:cheyenne:VaultProcessing").map(String::as_str) == Some("COMPLETED"))
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod memory;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Service error ({code}): {message}")]
    Service { code: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid queue ARN: {0}")]
    InvalidArn(String),
}

pub type Result<T> = std::result::Result<T, InterfaceError>;

/// Object tags, ordered by key so tag headers and logs are deterministic
pub type TagMap = BTreeMap<String, String>;

/// Address of one object (optionally one specific version of it)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
        }
    }

    pub fn with_version(mut self, version_id: Option<String>) -> Self {
        self.version_id = version_id;
        self
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_id {
            Some(version) => write!(f, "{}/{}?versionId={}", self.bucket, self.key, version),
            None => write!(f, "{}/{}", self.bucket, self.key),
        }
    }
}

/// Storage class applied to an object written into the vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StorageClass {
    /// Hot storage, used by objects that were written without an explicit class
    Standard,

    /// Infrequent-access archival storage (`STANDARD_IA`)
    #[default]
    ArchivalInfrequentAccess,

    /// Cold archival storage (`GLACIER`)
    ArchivalCold,
}

impl StorageClass {
    /// Wire name understood by the object store
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::ArchivalInfrequentAccess => "STANDARD_IA",
            StorageClass::ArchivalCold => "GLACIER",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side copy with tag-replace semantics
///
/// The destination receives exactly `tags`; whatever tags the source carries are
/// not copied across.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub source: ObjectRef,
    pub destination_bucket: String,
    pub destination_key: String,
    pub storage_class: StorageClass,
    pub tags: TagMap,
}

/// What the store reports back about a finished copy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReceipt {
    pub version_id: Option<String>,
    pub kms_key_id: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the tag set of an object
    async fn get_tags(&self, object: &ObjectRef) -> Result<TagMap>;

    /// Copy an object server-side, replacing the destination's tag set
    async fn copy_object(&self, request: CopyRequest) -> Result<CopyReceipt>;

    /// Replace the tag set of an object
    ///
    /// Callers that want merge semantics read the existing tags first.
    async fn put_tags(&self, object: &ObjectRef, tags: TagMap) -> Result<()>;
}

/// One entry of a batch send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Entry identifier, unique within the batch
    pub id: String,
    pub body: String,
    /// Ordering group; `None` for unordered queues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
}

/// One entry of a batch delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEntry {
    pub id: String,
    pub receipt_handle: String,
}

/// A batch entry the service refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntryFailure {
    pub id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendBatchOutcome {
    pub sent: Vec<String>,
    pub failed: Vec<BatchEntryFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteBatchOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<BatchEntryFailure>,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Send a batch of messages to `queue` (an ARN or endpoint URL)
    async fn send_batch(
        &self,
        queue: &str,
        entries: Vec<OutboundMessage>,
    ) -> Result<SendBatchOutcome>;

    /// Delete delivered messages by handle
    ///
    /// Unknown or already-deleted handles are reported as deleted.
    async fn delete_batch(&self, queue: &str, entries: Vec<DeleteEntry>)
        -> Result<DeleteBatchOutcome>;
}

/// One message as the invoking platform hands it to a consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    #[serde(rename = "messageId", default)]
    pub message_id: String,
    #[serde(rename = "receiptHandle", default)]
    pub receipt_handle: String,
    pub body: String,
    #[serde(rename = "eventSourceARN", default)]
    pub event_source_arn: String,
}

/// Parsed `arn:<partition>:sqs:<region>:<account>:<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueArn {
    pub partition: String,
    pub region: String,
    pub account_id: String,
    pub name: String,
}

impl QueueArn {
    pub fn parse(arn: &str) -> Result<Self> {
        let parts: Vec<&str> = arn.split(':').collect();
        if parts.len() != 6 || parts[0] != "arn" || parts[2] != "sqs" {
            return Err(InterfaceError::InvalidArn(arn.to_string()));
        }
        if parts[3].is_empty() || parts[4].is_empty() || parts[5].is_empty() {
            return Err(InterfaceError::InvalidArn(arn.to_string()));
        }

        Ok(Self {
            partition: parts[1].to_string(),
            region: parts[3].to_string(),
            account_id: parts[4].to_string(),
            name: parts[5].to_string(),
        })
    }

    pub fn url(&self) -> String {
        format!(
            "https://sqs.{}.amazonaws.com/{}/{}",
            self.region, self.account_id, self.name
        )
    }
}

/// Resolve a configured queue identity to an endpoint URL
///
/// ARNs are converted; anything else is assumed to already be a URL.
pub fn resolve_queue_url(queue: &str) -> Result<String> {
    if queue.starts_with("arn:") {
        Ok(QueueArn::parse(queue)?.url())
    } else if queue.is_empty() {
        Err(InterfaceError::InvalidRequest("empty queue identity".to_string()))
    } else {
        Ok(queue.to_string())
    }
}

/// Short queue name for logs
pub fn queue_name(queue: &str) -> &str {
    if queue.starts_with("arn:") {
        queue.rsplit(':').next().unwrap_or(queue)
    } else {
        queue.trim_end_matches('/').rsplit('/').next().unwrap_or(queue)
    }
}
