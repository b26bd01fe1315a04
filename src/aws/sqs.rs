//! Message queue backed by Amazon SQS

use super::interface_error;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sqs::types::{
    BatchResultErrorEntry, DeleteMessageBatchRequestEntry, SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client;
use cheyenne_core_interface::{
    queue_name, resolve_queue_url, BatchEntryFailure, DeleteBatchOutcome, DeleteEntry,
    InterfaceError, MessageQueue, OutboundMessage, Result, SendBatchOutcome,
};
use tracing::debug;

/// Service limit on entries per batch call
pub const MAX_BATCH_ENTRIES: usize = 10;

#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
}

impl SqsQueue {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }
}

fn entry_failure(entry: &BatchResultErrorEntry) -> BatchEntryFailure {
    BatchEntryFailure {
        id: entry.id().to_string(),
        code: entry.code().to_string(),
        message: entry.message().unwrap_or_default().to_string(),
    }
}

fn invalid(e: impl std::fmt::Display) -> InterfaceError {
    InterfaceError::InvalidRequest(e.to_string())
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn send_batch(
        &self,
        queue: &str,
        entries: Vec<OutboundMessage>,
    ) -> Result<SendBatchOutcome> {
        let url = resolve_queue_url(queue)?;
        let mut outcome = SendBatchOutcome::default();

        for chunk in entries.chunks(MAX_BATCH_ENTRIES) {
            let batch = chunk
                .iter()
                .map(|message| {
                    SendMessageBatchRequestEntry::builder()
                        .id(&message.id)
                        .message_body(&message.body)
                        .set_message_group_id(message.group_key.clone())
                        .build()
                        .map_err(invalid)
                })
                .collect::<Result<Vec<_>>>()?;

            debug!(queue = queue_name(queue), entries = batch.len(), "sending batch");
            let output = self
                .client
                .send_message_batch()
                .queue_url(&url)
                .set_entries(Some(batch))
                .send()
                .await
                .map_err(interface_error)?;

            outcome
                .sent
                .extend(output.successful().iter().map(|e| e.id().to_string()));
            outcome.failed.extend(output.failed().iter().map(entry_failure));
        }

        Ok(outcome)
    }

    async fn delete_batch(
        &self,
        queue: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<DeleteBatchOutcome> {
        let url = resolve_queue_url(queue)?;
        let mut outcome = DeleteBatchOutcome::default();

        for chunk in entries.chunks(MAX_BATCH_ENTRIES) {
            let batch = chunk
                .iter()
                .map(|entry| {
                    DeleteMessageBatchRequestEntry::builder()
                        .id(&entry.id)
                        .receipt_handle(&entry.receipt_handle)
                        .build()
                        .map_err(invalid)
                })
                .collect::<Result<Vec<_>>>()?;

            debug!(queue = queue_name(queue), entries = batch.len(), "deleting batch");
            let output = self
                .client
                .delete_message_batch()
                .queue_url(&url)
                .set_entries(Some(batch))
                .send()
                .await
                .map_err(interface_error)?;

            outcome
                .deleted
                .extend(output.successful().iter().map(|e| e.id().to_string()));
            outcome.failed.extend(output.failed().iter().map(entry_failure));
        }

        Ok(outcome)
    }
}
