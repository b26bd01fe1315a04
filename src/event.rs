//! Storage change notifications and the records that carry them through the pipeline
//!
//! A [`ChangeNotification`] is the record the object store emits when an object is
//! created or updated. The Router wraps it, together with a freshly generated
//! [`CorrelationId`], into a [`VaultEventRecord`]; that record is the body of every
//! queue envelope downstream. Fields this crate does not interpret are kept as-is
//! so the envelope carries the complete notification.

use crate::error::{Result, VaultError};
use cheyenne_core_interface::{ObjectRef, QueueRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Placeholder written over the originating network address
pub const REDACTED_ADDRESS: &str = "removed";

/// Field name of the correlation identifier in every envelope body
pub const CORRELATION_FIELD: &str = "vault_event_uuid";

/// Identifier threading one event through both stages and every log line
///
/// Only the Router mints these, always as v4 UUIDs, so the Duplication Worker
/// accepts nothing else: a `vault_event_uuid` that is not a UUID fails the record
/// as malformed. Parsed ids are written back in lowercase hyphenated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Mint a new identifier. Only the Router calls this, once per notification.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParameters {
    #[serde(
        rename = "sourceIPAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_ip_address: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketEntity {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntity {
    pub key: String,
    pub size: u64,
    #[serde(rename = "versionId", default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One object create/update event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    #[serde(rename = "eventName", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(rename = "requestParameters", default)]
    pub request_parameters: RequestParameters,
    pub s3: StorageEntity,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChangeNotification {
    pub fn bucket(&self) -> &str {
        &self.s3.bucket.name
    }

    pub fn key(&self) -> &str {
        &self.s3.object.key
    }

    pub fn size(&self) -> u64 {
        self.s3.object.size
    }

    /// `{bucket}/{key}`, also the object's key inside the vault
    pub fn composite_key(&self) -> String {
        format!("{}/{}", self.bucket(), self.key())
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.bucket(), self.key()).with_version(self.s3.object.version_id.clone())
    }

    /// Drop the originating network address before the record travels any further
    pub fn redact_source_address(&mut self) {
        self.request_parameters.source_ip_address = Some(REDACTED_ADDRESS.to_string());
    }
}

/// Unit of work after routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultEventRecord {
    #[serde(rename = "vault_event_uuid")]
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub notification: ChangeNotification,
}

impl VaultEventRecord {
    /// Wrap a notification under `correlation_id`, dropping any id it already carried
    ///
    /// Bodies re-driven from the dead-letter queue still hold the id of their first
    /// pass; a record carries exactly one id.
    pub fn new(correlation_id: CorrelationId, mut notification: ChangeNotification) -> Self {
        notification.extra.remove(CORRELATION_FIELD);
        Self {
            correlation_id,
            notification,
        }
    }

    pub fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_body(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// A batch as handed over by the invoking platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

impl PlatformBatch {
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input)
            .map_err(|e| VaultError::MalformedRecord(format!("invalid platform batch: {}", e)))
    }
}

/// Body for the dead-letter tier when the record could not be turned into a
/// [`VaultEventRecord`]: the original JSON object with the address redacted and the
/// correlation field added, or the raw body untouched if it is not a JSON object.
pub fn dead_letter_body(raw: &str, correlation_id: CorrelationId) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut object)) => {
            if let Some(Value::Object(params)) = object.get_mut("requestParameters") {
                if params.contains_key("sourceIPAddress") {
                    params.insert(
                        "sourceIPAddress".to_string(),
                        Value::String(REDACTED_ADDRESS.to_string()),
                    );
                }
            }
            object.insert(
                CORRELATION_FIELD.to_string(),
                Value::String(correlation_id.to_string()),
            );
            Value::Object(object).to_string()
        }
        _ => raw.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn notification_json(bucket: &str, key: &str, size: u64) -> String {
        serde_json::json!({
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "eventName": "ObjectCreated:Put",
            "requestParameters": { "sourceIPAddress": "203.0.113.7" },
            "s3": {
                "s3SchemaVersion": "1.0",
                "bucket": { "name": bucket, "arn": format!("arn:aws:s3:::{}", bucket) },
                "object": { "key": key, "size": size, "versionId": "3HL4kqtJlcpXroDTDmJ", "eTag": "d41d8cd9" }
            }
        })
        .to_string()
    }
}
