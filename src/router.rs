//! Router: classify inbound change notifications and dispatch them per tier
//!
//! Each invocation:
//!
//! 1. Turns every inbound record into a [`RouteOutcome`] in isolation. A broken
//!    record never stops its siblings; anything that cannot be routed by size ends
//!    up in the dead-letter (`failure`) tier.
//! 2. Sends one batch per non-empty tier. Ordered tiers share the invocation's
//!    group key (`vault<slot>`).
//! 3. Advances the [`ShardSlot`], whatever happened above.

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::event::{dead_letter_body, ChangeNotification, CorrelationId, VaultEventRecord};
use crate::shard::ShardSlot;
use crate::tier::{composite_key_len, DispatchTier, SizeTier, MAX_COMPOSITE_KEY_LEN};
use cheyenne_core_interface::{MessageQueue, OutboundMessage, QueueRecord};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Queue identities the Router dispatches to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterTargets {
    pub standard: String,
    pub large: String,
    pub failure: String,
    /// Batch-compute dispatch target for giant objects; presence alone changes
    /// the rejection reason, nothing is ever sent there
    pub giant: Option<String>,
}

impl RouterTargets {
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        config.validate_for_router()?;
        let missing = |name: &str| VaultError::Config(format!("{} queue is not set", name));

        Ok(Self {
            standard: config.queues.standard.clone().ok_or_else(|| missing("standard"))?,
            large: config.queues.large.clone().ok_or_else(|| missing("large"))?,
            failure: config.queues.failure.clone().ok_or_else(|| missing("failure"))?,
            giant: config.queues.giant.clone(),
        })
    }

    pub fn queue_for(&self, tier: DispatchTier) -> &str {
        match tier {
            DispatchTier::Standard => &self.standard,
            DispatchTier::Large => &self.large,
            DispatchTier::Failure => &self.failure,
        }
    }
}

/// Result of routing a single inbound record
#[derive(Debug)]
pub enum RouteOutcome {
    /// Headed for a size-tier queue
    Accepted {
        tier: SizeTier,
        envelope: OutboundMessage,
    },
    /// Understood, but permanently unprocessable
    Rejected {
        reason: VaultError,
        envelope: OutboundMessage,
    },
    /// Could not be understood at all
    Failed {
        error: VaultError,
        envelope: OutboundMessage,
    },
}

impl RouteOutcome {
    pub fn dispatch_tier(&self) -> DispatchTier {
        match self {
            RouteOutcome::Accepted { tier, .. } => {
                tier.dispatch_tier().unwrap_or(DispatchTier::Failure)
            }
            RouteOutcome::Rejected { .. } | RouteOutcome::Failed { .. } => DispatchTier::Failure,
        }
    }

    pub fn envelope(&self) -> &OutboundMessage {
        match self {
            RouteOutcome::Accepted { envelope, .. }
            | RouteOutcome::Rejected { envelope, .. }
            | RouteOutcome::Failed { envelope, .. } => envelope,
        }
    }

    pub fn into_envelope(self) -> OutboundMessage {
        match self {
            RouteOutcome::Accepted { envelope, .. }
            | RouteOutcome::Rejected { envelope, .. }
            | RouteOutcome::Failed { envelope, .. } => envelope,
        }
    }
}

/// What one invocation dispatched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Group key stamped on this invocation's ordered envelopes
    pub group_key: String,
    /// Envelope ids (= correlation ids) per tier, in dispatch order
    pub dispatched: BTreeMap<DispatchTier, Vec<String>>,
}

impl RouteReport {
    pub fn count(&self, tier: DispatchTier) -> usize {
        self.dispatched.get(&tier).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.dispatched.values().map(Vec::len).sum()
    }
}

pub struct Router<Q> {
    queue: Q,
    targets: RouterTargets,
    slot: ShardSlot,
}

impl<Q: MessageQueue> Router<Q> {
    pub fn new(queue: Q, targets: RouterTargets, slot: ShardSlot) -> Self {
        Self {
            queue,
            targets,
            slot,
        }
    }

    /// Build a Router with a randomly seeded shard slot
    pub fn from_config(queue: Q, config: &VaultConfig) -> Result<Self> {
        let targets = RouterTargets::from_config(config)?;
        let slot = ShardSlot::random(config.max_duplicator_concurrency);
        debug!(
            message_group_slot = slot.current(),
            max_duplicator_concurrency = slot.width(),
            "generated random message group slot"
        );
        Ok(Self::new(queue, targets, slot))
    }

    pub fn slot(&self) -> &ShardSlot {
        &self.slot
    }

    pub fn targets(&self) -> &RouterTargets {
        &self.targets
    }

    /// Route one invocation's batch
    ///
    /// Data problems in individual records never fail the invocation. An error is
    /// returned only when a queue refused a send, after every tier has been tried
    /// and the shard slot has advanced.
    pub async fn route_batch(&self, records: &[QueueRecord]) -> Result<RouteReport> {
        let group_key = self.slot.group_key();
        let mut pending: BTreeMap<DispatchTier, Vec<OutboundMessage>> = BTreeMap::new();

        for record in records {
            let outcome = self.route_record(record, &group_key);
            pending
                .entry(outcome.dispatch_tier())
                .or_default()
                .push(outcome.into_envelope());
        }

        let mut report = RouteReport {
            group_key,
            dispatched: BTreeMap::new(),
        };
        let mut first_error = None;

        for tier in DispatchTier::ALL {
            let entries = match pending.remove(&tier) {
                Some(entries) if !entries.is_empty() => entries,
                _ => continue,
            };

            match self.dispatch(tier, entries).await {
                Ok(sent) => {
                    report.dispatched.insert(tier, sent);
                }
                Err(e) => {
                    error!(
                        queue_type = %tier,
                        error = %e,
                        category = %e.category(),
                        "Failed to dispatch records to queue"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        let next = self.slot.advance();
        debug!(
            message_group_slot = next,
            max_duplicator_concurrency = self.slot.width(),
            "rotated message group slot"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Route a single record; never fails, failures become dead-letter outcomes
    pub fn route_record(&self, record: &QueueRecord, group_key: &str) -> RouteOutcome {
        let correlation_id = CorrelationId::generate();

        match self.classify(&record.body, correlation_id, group_key) {
            Ok(outcome) => {
                match &outcome {
                    RouteOutcome::Accepted { tier, .. } => debug!(
                        vault_event_uuid = %correlation_id,
                        message_id = %record.message_id,
                        tier = %tier,
                        group_key,
                        "routed record"
                    ),
                    RouteOutcome::Rejected { reason, .. } => warn!(
                        vault_event_uuid = %correlation_id,
                        message_id = %record.message_id,
                        reason = %reason,
                        category = %reason.category(),
                        "Rejected record, sending to failure queue"
                    ),
                    RouteOutcome::Failed { .. } => {}
                }
                outcome
            }
            Err(error) => {
                error!(
                    vault_event_uuid = %correlation_id,
                    message_id = %record.message_id,
                    error = %error,
                    category = %error.category(),
                    "Failed to process record"
                );
                RouteOutcome::Failed {
                    envelope: OutboundMessage {
                        id: correlation_id.to_string(),
                        body: dead_letter_body(&record.body, correlation_id),
                        group_key: None,
                    },
                    error,
                }
            }
        }
    }

    fn classify(
        &self,
        body: &str,
        correlation_id: CorrelationId,
        group_key: &str,
    ) -> Result<RouteOutcome> {
        let mut notification: ChangeNotification = serde_json::from_str(body)?;
        notification.redact_source_address();

        let length = composite_key_len(notification.bucket(), notification.key());
        let size = notification.size();
        let record = VaultEventRecord::new(correlation_id, notification);
        let body = record.to_body()?;

        let dead_letter = |body: String| OutboundMessage {
            id: correlation_id.to_string(),
            body,
            group_key: None,
        };

        if length > MAX_COMPOSITE_KEY_LEN {
            return Ok(RouteOutcome::Rejected {
                reason: VaultError::KeyTooLong {
                    length,
                    limit: MAX_COMPOSITE_KEY_LEN,
                },
                envelope: dead_letter(body),
            });
        }

        let tier = SizeTier::classify(size);
        if tier.dispatch_tier().is_none() {
            return Ok(RouteOutcome::Rejected {
                reason: self.giant_rejection(correlation_id, size),
                envelope: dead_letter(body),
            });
        }

        if tier == SizeTier::Large {
            info!(
                vault_event_uuid = %correlation_id,
                size,
                "Object surpasses large threshold, sending to large queue"
            );
        }

        Ok(RouteOutcome::Accepted {
            tier,
            envelope: OutboundMessage {
                id: correlation_id.to_string(),
                body,
                group_key: Some(group_key.to_string()),
            },
        })
    }

    /// Giant objects have no copy path. Without a batch target they are simply too
    /// large; with one configured the dispatch itself is the missing piece.
    fn giant_rejection(&self, correlation_id: CorrelationId, size: u64) -> VaultError {
        match &self.targets.giant {
            None => {
                warn!(
                    vault_event_uuid = %correlation_id,
                    size,
                    "Object too large to currently copy, ignoring"
                );
                VaultError::ObjectTooLarge { size }
            }
            Some(target) => VaultError::NotImplemented(format!(
                "batch dispatch of giant objects to {}",
                target
            )),
        }
    }

    async fn dispatch(&self, tier: DispatchTier, entries: Vec<OutboundMessage>) -> Result<Vec<String>> {
        let queue = self.targets.queue_for(tier);
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        info!(
            queue_type = %tier,
            total_records = entries.len(),
            vault_event_uuids = ?ids,
            "Dispatching records to queue"
        );

        let outcome = self.queue.send_batch(queue, entries).await?;
        if !outcome.failed.is_empty() {
            return Err(VaultError::Dispatch {
                tier: tier.to_string(),
                failed: outcome.failed,
            });
        }
        Ok(outcome.sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::fixtures::notification_json;
    use crate::event::CORRELATION_FIELD;
    use crate::logging::init_test_logging;
    use crate::tier::{GIANT_THRESHOLD, LARGE_THRESHOLD};
    use cheyenne_core_interface::memory::MemoryQueue;
    use serde_json::Value;

    const STANDARD: &str = "arn:aws:sqs:us-east-1:123456789012:duplicator.fifo";
    const LARGE: &str = "arn:aws:sqs:us-east-1:123456789012:duplicator-large.fifo";
    const FAILURE: &str = "arn:aws:sqs:us-east-1:123456789012:bad-receive";

    fn targets(giant: Option<&str>) -> RouterTargets {
        RouterTargets {
            standard: STANDARD.to_string(),
            large: LARGE.to_string(),
            failure: FAILURE.to_string(),
            giant: giant.map(str::to_string),
        }
    }

    fn router(queue: &MemoryQueue, giant: Option<&str>) -> Router<MemoryQueue> {
        init_test_logging();
        Router::new(queue.clone(), targets(giant), ShardSlot::starting_at(2, 5))
    }

    fn record(body: String) -> QueueRecord {
        QueueRecord {
            message_id: uuid::Uuid::new_v4().to_string(),
            receipt_handle: "handle".to_string(),
            body,
            event_source_arn: "arn:aws:sqs:us-east-1:123456789012:ingest".to_string(),
        }
    }

    fn body_of(queue: &MemoryQueue, name: &str, index: usize) -> Value {
        serde_json::from_str(&queue.pending(name)[index].body).unwrap()
    }

    #[tokio::test]
    async fn test_routes_by_size() {
        let queue = MemoryQueue::new();
        let router = router(&queue, None);

        let report = router
            .route_batch(&[
                record(notification_json("b", "small", 10)),
                record(notification_json("b", "edge", LARGE_THRESHOLD)),
                record(notification_json("b", "medium", LARGE_THRESHOLD + 1)),
                record(notification_json("b", "huge", GIANT_THRESHOLD)),
            ])
            .await
            .unwrap();

        assert_eq!(report.count(DispatchTier::Standard), 1);
        assert_eq!(report.count(DispatchTier::Large), 2);
        assert_eq!(report.count(DispatchTier::Failure), 1);
        assert_eq!(report.total(), 4);
        assert_eq!(queue.send_calls(STANDARD), 1);
        assert_eq!(queue.send_calls(LARGE), 1);
        assert_eq!(queue.send_calls(FAILURE), 1);
    }

    #[tokio::test]
    async fn test_shared_group_key_and_rotation() {
        let queue = MemoryQueue::new();
        let router = router(&queue, None);

        let report = router
            .route_batch(&[
                record(notification_json("b", "one", 1)),
                record(notification_json("b", "two", 2)),
                record(notification_json("b", "three", LARGE_THRESHOLD)),
            ])
            .await
            .unwrap();

        assert_eq!(report.group_key, "vault2");
        for message in queue.pending(STANDARD).iter().chain(queue.pending(LARGE).iter()) {
            assert_eq!(message.group_key.as_deref(), Some("vault2"));
        }
        assert_eq!(router.slot().current(), 3);

        router
            .route_batch(&[record(notification_json("b", "four", 1))])
            .await
            .unwrap();
        assert_eq!(queue.pending(STANDARD)[2].group_key.as_deref(), Some("vault3"));
        assert_eq!(router.slot().current(), 4);
    }

    #[tokio::test]
    async fn test_envelope_carries_correlation_id_and_redacts() {
        let queue = MemoryQueue::new();
        let router = router(&queue, None);
        router
            .route_batch(&[record(notification_json("b", "k", 1))])
            .await
            .unwrap();

        let message = &queue.pending(STANDARD)[0];
        let body = body_of(&queue, STANDARD, 0);
        assert_eq!(body[CORRELATION_FIELD], message.entry_id.as_str());
        assert_eq!(body["requestParameters"]["sourceIPAddress"], "removed");

        let parsed = VaultEventRecord::from_body(&message.body).unwrap();
        assert_eq!(parsed.correlation_id.to_string(), message.entry_id);
    }

    #[tokio::test]
    async fn test_redriven_record_gets_single_new_correlation_id() {
        let queue = MemoryQueue::new();
        let router = router(&queue, None);
        let stale = "11111111-1111-4111-8111-111111111111";
        let mut redriven: Value = serde_json::from_str(&notification_json("b", "k", 1)).unwrap();
        redriven[CORRELATION_FIELD] = Value::String(stale.to_string());

        router
            .route_batch(&[record(redriven.to_string())])
            .await
            .unwrap();

        let message = &queue.pending(STANDARD)[0];
        assert_eq!(message.body.matches(CORRELATION_FIELD).count(), 1);
        assert!(!message.body.contains(stale));
        let parsed = VaultEventRecord::from_body(&message.body).unwrap();
        assert_eq!(parsed.correlation_id.to_string(), message.entry_id);
    }

    #[tokio::test]
    async fn test_key_too_long_goes_to_failure_regardless_of_size() {
        let queue = MemoryQueue::new();
        let router = router(&queue, None);
        let key = "k".repeat(MAX_COMPOSITE_KEY_LEN - 1);
        let fits = "k".repeat(MAX_COMPOSITE_KEY_LEN - 2);

        let report = router
            .route_batch(&[
                record(notification_json("b", &key, 1)),
                record(notification_json("b", &key, LARGE_THRESHOLD)),
                record(notification_json("b", &fits, 1)),
            ])
            .await
            .unwrap();

        assert_eq!(report.count(DispatchTier::Failure), 2);
        assert_eq!(report.count(DispatchTier::Standard), 1);
        assert!(queue.pending(FAILURE).iter().all(|m| m.group_key.is_none()));
        assert_eq!(body_of(&queue, FAILURE, 0)["requestParameters"]["sourceIPAddress"], "removed");
    }

    #[tokio::test]
    async fn test_giant_without_target_is_too_large() {
        let queue = MemoryQueue::new();
        let router = router(&queue, None);
        let outcome = router.route_record(&record(notification_json("b", "k", GIANT_THRESHOLD)), "vault0");
        assert!(matches!(
            outcome,
            RouteOutcome::Rejected {
                reason: VaultError::ObjectTooLarge { .. },
                ..
            }
        ));
        assert_eq!(outcome.dispatch_tier(), DispatchTier::Failure);
        assert!(outcome.envelope().group_key.is_none());
    }

    #[tokio::test]
    async fn test_giant_with_target_is_not_implemented() {
        let queue = MemoryQueue::new();
        let router = router(&queue, Some("arn:aws:batch:us-east-1:1:job-queue/giant"));
        let outcome =
            router.route_record(&record(notification_json("b", "k", GIANT_THRESHOLD * 2)), "vault0");
        assert!(matches!(
            outcome,
            RouteOutcome::Rejected {
                reason: VaultError::NotImplemented(_),
                ..
            }
        ));

        router
            .route_batch(&[record(notification_json("b", "k", GIANT_THRESHOLD))])
            .await
            .unwrap();
        assert_eq!(queue.pending(FAILURE).len(), 1);
        assert_eq!(queue.send_calls(STANDARD), 0);
        assert_eq!(queue.send_calls(LARGE), 0);
    }

    #[tokio::test]
    async fn test_malformed_record_is_dead_lettered_without_aborting_batch() {
        let queue = MemoryQueue::new();
        let router = router(&queue, None);

        let report = router
            .route_batch(&[
                record("this is not json".to_string()),
                record(r#"{"s3":{"bucket":{"name":"b"}}}"#.to_string()),
                record(notification_json("b", "ok", 1)),
            ])
            .await
            .unwrap();

        assert_eq!(report.count(DispatchTier::Failure), 2);
        assert_eq!(report.count(DispatchTier::Standard), 1);
        assert_eq!(queue.pending(FAILURE)[0].body, "this is not json");
        let second = body_of(&queue, FAILURE, 1);
        assert_eq!(second[CORRELATION_FIELD], queue.pending(FAILURE)[1].entry_id.as_str());
    }

    #[tokio::test]
    async fn test_empty_batch_still_rotates() {
        let queue = MemoryQueue::new();
        let router = router(&queue, None);
        let report = router.route_batch(&[]).await.unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(router.slot().current(), 3);
        assert_eq!(queue.send_calls(STANDARD), 0);
    }

    #[tokio::test]
    async fn test_send_failure_surfaces_after_all_tiers_and_rotation() {
        let queue = MemoryQueue::new();
        queue.fail_sends(STANDARD);
        let router = router(&queue, None);

        let err = router
            .route_batch(&[
                record(notification_json("b", "small", 1)),
                record(notification_json("b", "big", LARGE_THRESHOLD)),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::Dependency(_)));
        assert_eq!(queue.pending(LARGE).len(), 1);
        assert_eq!(router.slot().current(), 3);
    }

    #[tokio::test]
    async fn test_rejected_entries_surface_as_dispatch_error() {
        let queue = MemoryQueue::new();
        let mut targets = targets(None);
        // an ordered queue name for the dead-letter tier makes every entry lack a group key
        targets.failure = "arn:aws:sqs:us-east-1:123456789012:bad-receive.fifo".to_string();
        let router = Router::new(queue.clone(), targets, ShardSlot::starting_at(0, 1));

        let err = router
            .route_batch(&[record("garbage".to_string())])
            .await
            .unwrap_err();
        match err {
            VaultError::Dispatch { tier, failed } => {
                assert_eq!(tier, "failure");
                assert_eq!(failed.len(), 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_targets_from_config() {
        let mut config = VaultConfig::default();
        assert!(RouterTargets::from_config(&config).is_err());

        config.queues.standard = Some(STANDARD.to_string());
        config.queues.large = Some(LARGE.to_string());
        config.queues.failure = Some(FAILURE.to_string());
        let targets = RouterTargets::from_config(&config).unwrap();
        assert_eq!(targets.queue_for(DispatchTier::Large), LARGE);
        assert!(targets.giant.is_none());

        let router = Router::from_config(MemoryQueue::new(), &config).unwrap();
        assert!(router.slot().current() < 5);
    }
}
