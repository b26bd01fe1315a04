//! In-memory collaborators
//!
//! `MemoryObjectStore` and `MemoryQueue` implement the collaborator traits without
//! any network access. They back the unit and integration tests and the CLI's
//! `--dry-run` mode, and both support failure injection so partial-batch paths
//! can be exercised deterministically.

use crate::{
    BatchEntryFailure, CopyReceipt, CopyRequest, DeleteBatchOutcome, DeleteEntry, InterfaceError,
    MessageQueue, ObjectRef, ObjectStore, OutboundMessage, QueueRecord, Result, SendBatchOutcome,
    StorageClass, TagMap,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Object store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetTags,
    Copy,
    PutTags,
}

/// A stored object snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub tags: TagMap,
    pub storage_class: StorageClass,
    pub version_id: String,
}

/// In-memory object store
///
/// Only the latest version of each object is kept; addressing an older version
/// id reports the object as missing.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<(String, String), StoredObject>>>,
    failures: Arc<Mutex<HashSet<(StoreOperation, String)>>>,
    next_version: Arc<AtomicU64>,
    copies: Arc<AtomicU64>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object without tags, returning its version id
    pub fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> String {
        self.put_object_with_tags(bucket, key, data, TagMap::new())
    }

    pub fn put_object_with_tags(&self, bucket: &str, key: &str, data: &[u8], tags: TagMap) -> String {
        let version_id = self.allocate_version();
        let object = StoredObject {
            data: data.to_vec(),
            tags,
            storage_class: StorageClass::Standard,
            version_id: version_id.clone(),
        };
        lock(&self.objects).insert((bucket.to_string(), key.to_string()), object);
        version_id
    }

    /// Store an object under a caller-chosen version id, or a fresh one if `None`
    pub fn seed_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        data: &[u8],
    ) -> String {
        let version_id = version_id
            .map(str::to_string)
            .unwrap_or_else(|| self.allocate_version());
        let object = StoredObject {
            data: data.to_vec(),
            tags: TagMap::new(),
            storage_class: StorageClass::Standard,
            version_id: version_id.clone(),
        };
        lock(&self.objects).insert((bucket.to_string(), key.to_string()), object);
        version_id
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn tags(&self, bucket: &str, key: &str) -> Option<TagMap> {
        self.object(bucket, key).map(|o| o.tags)
    }

    /// Make `operation` fail for every object whose key is `key`
    ///
    /// For copies the source key is matched.
    pub fn fail_on(&self, operation: StoreOperation, key: &str) {
        lock(&self.failures).insert((operation, key.to_string()));
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Number of successful server-side copies
    pub fn copy_count(&self) -> u64 {
        self.copies.load(Ordering::SeqCst)
    }

    fn allocate_version(&self) -> String {
        format!("v{}", self.next_version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_failure(&self, operation: StoreOperation, key: &str) -> Result<()> {
        if lock(&self.failures).contains(&(operation, key.to_string())) {
            return Err(InterfaceError::Service {
                code: "InternalError".to_string(),
                message: format!("injected {:?} failure for {}", operation, key),
            });
        }
        Ok(())
    }

    fn lookup(&self, object: &ObjectRef) -> Result<StoredObject> {
        let found = self.object(&object.bucket, &object.key).filter(|stored| {
            object
                .version_id
                .as_ref()
                .map_or(true, |wanted| *wanted == stored.version_id)
        });
        found.ok_or_else(|| InterfaceError::NotFound {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_tags(&self, object: &ObjectRef) -> Result<TagMap> {
        self.check_failure(StoreOperation::GetTags, &object.key)?;
        Ok(self.lookup(object)?.tags)
    }

    async fn copy_object(&self, request: CopyRequest) -> Result<CopyReceipt> {
        self.check_failure(StoreOperation::Copy, &request.source.key)?;
        let source = self.lookup(&request.source)?;

        let version_id = self.allocate_version();
        let copy = StoredObject {
            data: source.data,
            tags: request.tags,
            storage_class: request.storage_class,
            version_id: version_id.clone(),
        };
        lock(&self.objects).insert((request.destination_bucket, request.destination_key), copy);
        self.copies.fetch_add(1, Ordering::SeqCst);

        Ok(CopyReceipt {
            version_id: Some(version_id),
            kms_key_id: None,
        })
    }

    async fn put_tags(&self, object: &ObjectRef, tags: TagMap) -> Result<()> {
        self.check_failure(StoreOperation::PutTags, &object.key)?;
        self.lookup(object)?;

        let mut objects = lock(&self.objects);
        if let Some(stored) = objects.get_mut(&(object.bucket.clone(), object.key.clone())) {
            stored.tags = tags;
        }
        Ok(())
    }
}

/// A message sitting in a [`MemoryQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message_id: String,
    /// The batch entry id the sender used
    pub entry_id: String,
    pub body: String,
    pub group_key: Option<String>,
    pub receipt_handle: String,
}

/// In-memory queue service holding any number of named queues
///
/// Messages stay queued until deleted by delivery handle; [`MemoryQueue::receive`]
/// does not hide them, so a test can observe exactly what a redelivery would see.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    queues: Arc<Mutex<HashMap<String, Vec<QueuedMessage>>>>,
    send_calls: Arc<Mutex<HashMap<String, usize>>>,
    failing_sends: Arc<Mutex<HashSet<String>>>,
    failing_deletes: Arc<Mutex<HashSet<String>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver everything currently queued on `queue`, in send order
    pub fn receive(&self, queue: &str) -> Vec<QueueRecord> {
        self.pending(queue)
            .into_iter()
            .map(|message| QueueRecord {
                message_id: message.message_id,
                receipt_handle: message.receipt_handle,
                body: message.body,
                event_source_arn: queue.to_string(),
            })
            .collect()
    }

    pub fn pending(&self, queue: &str) -> Vec<QueuedMessage> {
        lock(&self.queues).get(queue).cloned().unwrap_or_default()
    }

    /// Number of `send_batch` calls made against `queue`
    pub fn send_calls(&self, queue: &str) -> usize {
        lock(&self.send_calls).get(queue).copied().unwrap_or(0)
    }

    pub fn fail_sends(&self, queue: &str) {
        lock(&self.failing_sends).insert(queue.to_string());
    }

    pub fn fail_deletes(&self, queue: &str) {
        lock(&self.failing_deletes).insert(queue.to_string());
    }

    fn is_fifo(queue: &str) -> bool {
        queue.ends_with(".fifo")
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send_batch(
        &self,
        queue: &str,
        entries: Vec<OutboundMessage>,
    ) -> Result<SendBatchOutcome> {
        *lock(&self.send_calls).entry(queue.to_string()).or_insert(0) += 1;

        if lock(&self.failing_sends).contains(queue) {
            return Err(InterfaceError::Network(format!("injected send failure for {}", queue)));
        }
        if entries.is_empty() {
            return Err(InterfaceError::InvalidRequest("EmptyBatchRequest".to_string()));
        }
        let distinct: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        if distinct.len() != entries.len() {
            return Err(InterfaceError::InvalidRequest(
                "BatchEntryIdsNotDistinct".to_string(),
            ));
        }

        let mut outcome = SendBatchOutcome::default();
        let mut queues = lock(&self.queues);
        let messages = queues.entry(queue.to_string()).or_default();

        for entry in entries {
            if Self::is_fifo(queue) && entry.group_key.is_none() {
                outcome.failed.push(BatchEntryFailure {
                    id: entry.id,
                    code: "MissingParameter".to_string(),
                    message: "ordered queues require a group key".to_string(),
                });
                continue;
            }

            messages.push(QueuedMessage {
                message_id: uuid::Uuid::new_v4().to_string(),
                entry_id: entry.id.clone(),
                body: entry.body,
                group_key: entry.group_key,
                receipt_handle: uuid::Uuid::new_v4().simple().to_string(),
            });
            outcome.sent.push(entry.id);
        }

        Ok(outcome)
    }

    async fn delete_batch(
        &self,
        queue: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<DeleteBatchOutcome> {
        if lock(&self.failing_deletes).contains(queue) {
            return Err(InterfaceError::Network(format!(
                "injected delete failure for {}",
                queue
            )));
        }

        let handles: HashSet<&str> = entries.iter().map(|e| e.receipt_handle.as_str()).collect();
        if let Some(messages) = lock(&self.queues).get_mut(queue) {
            messages.retain(|m| !handles.contains(m.receipt_handle.as_str()));
        }

        Ok(DeleteBatchOutcome {
            deleted: entries.into_iter().map(|e| e.id).collect(),
            failed: Vec::new(),
        })
    }
}
