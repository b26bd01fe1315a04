//! Duplication Worker: copy queued objects into the vault and reconcile the batch
//!
//! The consuming platform only understands "the whole batch succeeded" or "the
//! whole batch failed". A failed batch is redelivered in full, which would copy
//! and tag already-vaulted objects a second time. So when any record fails the
//! worker runs three phases:
//!
//! 1. process every record, collecting a [`DuplicationOutcome`] per record
//! 2. delete the accepted records from their source queues
//! 3. return [`VaultError::BatchPartialFailure`] so only the failures come back
//!
//! When every record succeeds nothing is deleted explicitly; the platform does it.

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::event::{CorrelationId, VaultEventRecord};
use crate::tags::{merge_tags, storage_class_for, VaultTagSet};
use chrono::Utc;
use cheyenne_core_interface::{
    queue_name, CopyReceipt, CopyRequest, DeleteEntry, MessageQueue, ObjectStore, QueueRecord,
};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// A record whose object is durably in the vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedRecord {
    pub message_id: String,
    pub receipt_handle: String,
    pub event_source_arn: String,
    pub correlation_id: CorrelationId,
    pub destination_key: String,
    pub receipt: CopyReceipt,
}

#[derive(Debug)]
pub struct FailedRecord {
    pub message_id: String,
    /// Absent when the body could not be parsed
    pub correlation_id: Option<CorrelationId>,
    pub error: VaultError,
}

impl FailedRecord {
    /// Whether a redelivery can succeed; malformed bodies never will
    pub fn is_retryable(&self) -> bool {
        !self.error.is_permanent()
    }
}

#[derive(Debug)]
pub enum DuplicationOutcome {
    Accepted(AcceptedRecord),
    Failed(FailedRecord),
}

/// Summary of a fully successful batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicationReport {
    pub accepted: Vec<AcceptedRecord>,
}

pub struct DuplicationWorker<S, Q> {
    store: S,
    queue: Q,
    vault_bucket: String,
}

impl<S: ObjectStore, Q: MessageQueue> DuplicationWorker<S, Q> {
    pub fn new(store: S, queue: Q, vault_bucket: impl Into<String>) -> Self {
        Self {
            store,
            queue,
            vault_bucket: vault_bucket.into(),
        }
    }

    pub fn from_config(store: S, queue: Q, config: &VaultConfig) -> Result<Self> {
        config.validate_for_duplicator()?;
        let bucket = config
            .vault_bucket
            .clone()
            .ok_or_else(|| VaultError::Config("vault bucket is not set".to_string()))?;
        Ok(Self::new(store, queue, bucket))
    }

    pub fn vault_bucket(&self) -> &str {
        &self.vault_bucket
    }

    /// Process one invocation's batch
    pub async fn process_batch(&self, records: &[QueueRecord]) -> Result<DuplicationReport> {
        let mut accepted = Vec::new();
        let mut failed = Vec::new();

        for record in records {
            match self.process_record(record).await {
                DuplicationOutcome::Accepted(record) => accepted.push(record),
                DuplicationOutcome::Failed(record) => failed.push(record),
            }
        }

        if failed.is_empty() {
            return Ok(DuplicationReport { accepted });
        }

        let deleted = self.acknowledge(&accepted).await;

        let message_ids: Vec<&str> = failed.iter().map(|r| r.message_id.as_str()).collect();
        let permanent = failed.iter().filter(|r| !r.is_retryable()).count();
        error!(
            message_ids = ?message_ids,
            permanent,
            deleted,
            "Failed to process one or more records"
        );
        Err(VaultError::BatchPartialFailure {
            failed: failed.len(),
            accepted: accepted.len(),
        })
    }

    /// Duplicate a single record, never failing the caller
    pub async fn process_record(&self, record: &QueueRecord) -> DuplicationOutcome {
        let event = match VaultEventRecord::from_body(&record.body) {
            Ok(event) => event,
            Err(error) => {
                error!(
                    message_id = %record.message_id,
                    error = %error,
                    category = %error.category(),
                    retryable = !error.is_permanent(),
                    "Failed to process record"
                );
                return DuplicationOutcome::Failed(FailedRecord {
                    message_id: record.message_id.clone(),
                    correlation_id: None,
                    error,
                });
            }
        };

        debug!(
            vault_event_uuid = %event.correlation_id,
            queue = queue_name(&record.event_source_arn),
            "event received"
        );

        match self.duplicate(&event).await {
            Ok((destination_key, receipt)) => DuplicationOutcome::Accepted(AcceptedRecord {
                message_id: record.message_id.clone(),
                receipt_handle: record.receipt_handle.clone(),
                event_source_arn: record.event_source_arn.clone(),
                correlation_id: event.correlation_id,
                destination_key,
                receipt,
            }),
            Err(error) => {
                error!(
                    message_id = %record.message_id,
                    vault_event_uuid = %event.correlation_id,
                    error = %error,
                    category = %error.category(),
                    retryable = !error.is_permanent(),
                    "Failed to process record"
                );
                DuplicationOutcome::Failed(FailedRecord {
                    message_id: record.message_id.clone(),
                    correlation_id: Some(event.correlation_id),
                    error,
                })
            }
        }
    }

    async fn duplicate(&self, event: &VaultEventRecord) -> Result<(String, CopyReceipt)> {
        let correlation_id = event.correlation_id;
        let origin = event.notification.object_ref();

        let origin_tags = self.store.get_tags(&origin).await?;
        debug!(
            vault_event_uuid = %correlation_id,
            object = %origin,
            tags = ?origin_tags,
            "fetched object tags"
        );

        let storage_class = storage_class_for(&origin_tags);
        let destination_key = event.notification.composite_key();
        let vault_tags = VaultTagSet::completed(correlation_id, Utc::now()).to_tag_map();

        debug!(
            vault_event_uuid = %correlation_id,
            from = %origin,
            to_bucket = %self.vault_bucket,
            to_key = %destination_key,
            storage_class = %storage_class,
            "about to copy object"
        );

        let receipt = self
            .store
            .copy_object(CopyRequest {
                source: origin.clone(),
                destination_bucket: self.vault_bucket.clone(),
                destination_key: destination_key.clone(),
                storage_class,
                tags: vault_tags.clone(),
            })
            .await?;

        info!(
            vault_event_uuid = %correlation_id,
            from = %origin,
            to_bucket = %self.vault_bucket,
            to_key = %destination_key,
            version_id = ?receipt.version_id,
            kms_key_id = ?receipt.kms_key_id,
            storage_class = %storage_class,
            "successfully copied object"
        );

        // The origin keeps its own tags; provenance is layered on top.
        self.store
            .put_tags(&origin, merge_tags(origin_tags, &vault_tags))
            .await?;
        debug!(
            vault_event_uuid = %correlation_id,
            object = %origin,
            "tagged source object"
        );

        Ok((destination_key, receipt))
    }

    /// Delete accepted records from their source queues, grouped by queue
    ///
    /// Delete problems are logged only: an undeleted record is redelivered and
    /// re-copied onto the same key, which is safe.
    async fn acknowledge(&self, accepted: &[AcceptedRecord]) -> usize {
        let correlation_ids: Vec<String> =
            accepted.iter().map(|r| r.correlation_id.to_string()).collect();
        info!(
            vault_event_uuids = ?correlation_ids,
            "Directly deleting {} messages from upstream queue",
            accepted.len()
        );

        let mut by_queue: BTreeMap<&str, Vec<DeleteEntry>> = BTreeMap::new();
        for record in accepted {
            by_queue
                .entry(record.event_source_arn.as_str())
                .or_default()
                .push(DeleteEntry {
                    id: record.message_id.clone(),
                    receipt_handle: record.receipt_handle.clone(),
                });
        }

        let mut deleted = 0;
        for (queue, entries) in by_queue {
            let message_ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
            info!(
                queue_arn = queue,
                message_ids = ?message_ids,
                "Accepted one or more records"
            );

            match self.queue.delete_batch(queue, entries).await {
                Ok(outcome) => {
                    deleted += outcome.deleted.len();
                    for failure in outcome.failed {
                        warn!(
                            queue_arn = queue,
                            message_id = %failure.id,
                            code = %failure.code,
                            "Queue refused to delete accepted record; it will be redelivered"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        queue_arn = queue,
                        error = %e,
                        "Failed to delete accepted records; they will be redelivered"
                    );
                }
            }
        }

        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::fixtures::notification_json;
    use crate::event::ChangeNotification;
    use crate::logging::init_test_logging;
    use crate::tags::{TAG_EVENT_UUID, TAG_PROCESSED_TIME, TAG_PROCESSING, TAG_VAULT_STORAGE};
    use cheyenne_core_interface::memory::{MemoryObjectStore, MemoryQueue, StoreOperation};
    use cheyenne_core_interface::{ObjectRef, OutboundMessage, StorageClass, TagMap};

    const VAULT: &str = "cheyenne-vault";
    const QUEUE: &str = "arn:aws:sqs:us-east-1:123456789012:duplicator.fifo";

    struct Harness {
        store: MemoryObjectStore,
        queue: MemoryQueue,
        worker: DuplicationWorker<MemoryObjectStore, MemoryQueue>,
    }

    fn harness() -> Harness {
        init_test_logging();
        let store = MemoryObjectStore::new();
        let queue = MemoryQueue::new();
        let worker = DuplicationWorker::new(store.clone(), queue.clone(), VAULT);
        Harness {
            store,
            queue,
            worker,
        }
    }

    impl Harness {
        /// Put an object in the origin bucket and enqueue its routed record
        async fn enqueue(&self, queue: &str, key: &str, tags: TagMap) -> CorrelationId {
            let version = self.store.put_object_with_tags("origin", key, key.as_bytes(), tags);
            let mut notification: ChangeNotification =
                serde_json::from_str(&notification_json("origin", key, 10)).unwrap();
            notification.s3.object.version_id = Some(version);

            let id = CorrelationId::generate();
            let body = VaultEventRecord::new(id, notification).to_body().unwrap();
            self.queue
                .send_batch(
                    queue,
                    vec![OutboundMessage {
                        id: id.to_string(),
                        body,
                        group_key: Some("vault0".to_string()),
                    }],
                )
                .await
                .unwrap();
            id
        }
    }

    #[tokio::test]
    async fn test_full_success_leaves_queue_alone() {
        let h = harness();
        h.enqueue(QUEUE, "a.txt", TagMap::new()).await;
        h.enqueue(QUEUE, "b.txt", TagMap::new()).await;

        let report = h.worker.process_batch(&h.queue.receive(QUEUE)).await.unwrap();
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.accepted[0].destination_key, "origin/a.txt");
        assert_eq!(h.queue.pending(QUEUE).len(), 2);
        assert_eq!(h.store.object(VAULT, "origin/b.txt").unwrap().data, b"b.txt");
    }

    #[tokio::test]
    async fn test_destination_tags_replace_origin_tags() {
        let h = harness();
        let mut tags = TagMap::new();
        tags.insert("env".to_string(), "prod".to_string());
        let id = h.enqueue(QUEUE, "a.txt", tags).await;

        h.worker.process_batch(&h.queue.receive(QUEUE)).await.unwrap();

        let copy = h.store.object(VAULT, "origin/a.txt").unwrap();
        assert_eq!(copy.tags.len(), 3);
        assert!(!copy.tags.contains_key("env"));
        assert_eq!(copy.tags[TAG_EVENT_UUID], id.to_string());
        assert_eq!(copy.tags[TAG_PROCESSING], "COMPLETED");
        assert_eq!(copy.storage_class, StorageClass::ArchivalInfrequentAccess);

        let origin_tags = h.store.tags("origin", "a.txt").unwrap();
        assert_eq!(origin_tags["env"], "prod");
        assert_eq!(origin_tags[TAG_EVENT_UUID], id.to_string());
        assert_eq!(origin_tags.len(), 4);
    }

    #[tokio::test]
    async fn test_cold_storage_tag() {
        let h = harness();
        let mut tags = TagMap::new();
        tags.insert(TAG_VAULT_STORAGE.to_string(), "GLACIER".to_string());
        h.enqueue(QUEUE, "cold.bin", tags).await;

        h.worker.process_batch(&h.queue.receive(QUEUE)).await.unwrap();
        assert_eq!(
            h.store.object(VAULT, "origin/cold.bin").unwrap().storage_class,
            StorageClass::ArchivalCold
        );
    }

    #[tokio::test]
    async fn test_late_redelivery_overwrites_newer_origin_provenance() {
        let h = harness();
        let id = h.enqueue(QUEUE, "a.txt", TagMap::new()).await;
        let records = h.queue.receive(QUEUE);
        h.worker.process_batch(&records).await.unwrap();

        // A later event has since stamped the origin.
        let newer_time = "2099-01-01T00:00:00.000+00:00";
        let newer_id = CorrelationId::generate();
        let mut newer = h.store.tags("origin", "a.txt").unwrap();
        newer.insert(TAG_EVENT_UUID.to_string(), newer_id.to_string());
        newer.insert(TAG_PROCESSED_TIME.to_string(), newer_time.to_string());
        h.store
            .put_tags(&ObjectRef::new("origin", "a.txt"), newer)
            .await
            .unwrap();

        h.worker.process_batch(&records).await.unwrap();

        let origin_tags = h.store.tags("origin", "a.txt").unwrap();
        let copy = h.store.object(VAULT, "origin/a.txt").unwrap();
        assert_eq!(origin_tags[TAG_EVENT_UUID], id.to_string());
        assert_ne!(origin_tags[TAG_PROCESSED_TIME], newer_time);
        assert_eq!(origin_tags[TAG_PROCESSED_TIME], copy.tags[TAG_PROCESSED_TIME]);
        assert_eq!(copy.tags[TAG_EVENT_UUID], id.to_string());
    }

    #[tokio::test]
    async fn test_partial_failure_deletes_only_accepted() {
        let h = harness();
        h.enqueue(QUEUE, "one", TagMap::new()).await;
        h.enqueue(QUEUE, "two", TagMap::new()).await;
        h.enqueue(QUEUE, "three", TagMap::new()).await;
        h.store.fail_on(StoreOperation::Copy, "two");

        let err = h.worker.process_batch(&h.queue.receive(QUEUE)).await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::BatchPartialFailure {
                failed: 1,
                accepted: 2
            }
        ));

        let remaining = h.queue.pending(QUEUE);
        assert_eq!(remaining.len(), 1);
        let body = VaultEventRecord::from_body(&remaining[0].body).unwrap();
        assert_eq!(body.notification.key(), "two");
        assert!(h.store.object(VAULT, "origin/one").is_some());
        assert!(h.store.object(VAULT, "origin/two").is_none());
        assert!(h.store.object(VAULT, "origin/three").is_some());
    }

    #[tokio::test]
    async fn test_failed_origin_tagging_fails_record() {
        let h = harness();
        h.enqueue(QUEUE, "a", TagMap::new()).await;
        h.store.fail_on(StoreOperation::PutTags, "a");

        let records = h.queue.receive(QUEUE);
        match h.worker.process_record(&records[0]).await {
            DuplicationOutcome::Failed(failed) => {
                assert!(failed.correlation_id.is_some());
                assert!(matches!(failed.error, VaultError::Dependency(_)));
                assert!(failed.is_retryable());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparseable_body_fails_without_correlation() {
        let h = harness();
        let record = QueueRecord {
            message_id: "m-1".to_string(),
            receipt_handle: "h-1".to_string(),
            body: "{}".to_string(),
            event_source_arn: QUEUE.to_string(),
        };
        match h.worker.process_record(&record).await {
            DuplicationOutcome::Failed(failed) => {
                assert_eq!(failed.message_id, "m-1");
                assert!(failed.correlation_id.is_none());
                assert!(matches!(failed.error, VaultError::MalformedRecord(_)));
                assert!(!failed.is_retryable());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deletes_grouped_by_source_queue() {
        let h = harness();
        let other = "arn:aws:sqs:us-east-1:123456789012:duplicator-large.fifo";
        h.enqueue(QUEUE, "s1", TagMap::new()).await;
        h.enqueue(other, "l1", TagMap::new()).await;
        h.enqueue(other, "bad", TagMap::new()).await;
        h.store.fail_on(StoreOperation::GetTags, "bad");

        let mut records = h.queue.receive(QUEUE);
        records.extend(h.queue.receive(other));

        assert!(h.worker.process_batch(&records).await.is_err());
        assert!(h.queue.pending(QUEUE).is_empty());
        assert_eq!(h.queue.pending(other).len(), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_still_raises_batch_failure() {
        let h = harness();
        h.enqueue(QUEUE, "ok", TagMap::new()).await;
        h.enqueue(QUEUE, "bad", TagMap::new()).await;
        h.store.fail_on(StoreOperation::Copy, "bad");
        h.queue.fail_deletes(QUEUE);

        let err = h.worker.process_batch(&h.queue.receive(QUEUE)).await.unwrap_err();
        assert!(matches!(err, VaultError::BatchPartialFailure { .. }));
        assert_eq!(h.queue.pending(QUEUE).len(), 2);
    }

    #[test]
    fn test_from_config_requires_bucket() {
        let store = MemoryObjectStore::new();
        let queue = MemoryQueue::new();
        let mut config = VaultConfig::default();
        assert!(DuplicationWorker::from_config(store.clone(), queue.clone(), &config).is_err());

        config.vault_bucket = Some(VAULT.to_string());
        let worker = DuplicationWorker::from_config(store, queue, &config).unwrap();
        assert_eq!(worker.vault_bucket(), VAULT);
    }
}
