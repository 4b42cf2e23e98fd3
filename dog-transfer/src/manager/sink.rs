use async_trait::async_trait;
use tracing::debug;

use super::table::Change;
use super::ManagerInner;
use crate::{
    coordinator::{CoordinatorSink, PlannedBlock, RetryDecision, RunTicket},
    ByteRange, ServiceError, TransferError, TransferRecord, TransferResult, TransferState,
};

#[async_trait]
impl CoordinatorSink for ManagerInner {
    async fn range_resolved(
        &self,
        ticket: &RunTicket,
        range: ByteRange,
        content_hash: Option<String>,
    ) -> TransferResult<()> {
        self.mutate(|table, changes| {
            let record = table.current_mut(&ticket.id, ticket.generation)?;
            record.byte_range = Some(range);
            record.content_hash = content_hash;
            record.updated_at = chrono::Utc::now();
            changes.push(Change::Saved(record.clone()));
            Ok(())
        })
        .await
    }

    async fn blocks_planned(
        &self,
        ticket: &RunTicket,
        blocks: Vec<ByteRange>,
    ) -> TransferResult<Vec<PlannedBlock>> {
        self.mutate(|table, changes| {
            let parent = table.current_mut(&ticket.id, ticket.generation)?.clone();

            // blocks from an earlier run define the plan, even if the block size changed since
            let mut existing: Vec<TransferRecord> =
                table.children(&parent.id).into_iter().cloned().collect();

            if existing.is_empty() && blocks.len() > 1 {
                for (index, range) in blocks.iter().enumerate() {
                    let child = TransferRecord::new_block(&parent, index as u32, *range);
                    changes.push(Change::Saved(child.clone()));
                    table.records.insert(child.id.clone(), child.clone());
                    existing.push(child);
                }
                debug!("Transfer {} split into {} blocks", parent.id, existing.len());
            }

            if existing.is_empty() {
                let total = parent.total_bytes().unwrap_or(0);
                return Ok(blocks
                    .into_iter()
                    .enumerate()
                    .map(|(index, range)| PlannedBlock {
                        index: index as u32,
                        range,
                        done: total > 0 && parent.progress_bytes >= total,
                    })
                    .collect());
            }

            let mut planned = Vec::with_capacity(existing.len());
            let mut completed_bytes = 0;
            for child in &mut existing {
                let range = child.byte_range.unwrap_or_default();
                let done = child.state == TransferState::Complete;
                if done {
                    completed_bytes += range.len();
                } else if child.state == TransferState::Failed {
                    child.transition(TransferState::Pending)?;
                    changes.push(Change::Saved(child.clone()));
                    table.records.insert(child.id.clone(), child.clone());
                }
                planned.push(PlannedBlock {
                    index: child.block_index.unwrap_or(0),
                    range,
                    done,
                });
            }

            let record = table.current_mut(&ticket.id, ticket.generation)?;
            if record.progress_bytes != completed_bytes {
                debug!(
                    "Transfer {} progress recomputed from blocks: {} -> {}",
                    record.id, record.progress_bytes, completed_bytes
                );
                record.progress_bytes = completed_bytes;
                changes.push(Change::Saved(record.clone()));
            }
            Ok(planned)
        })
        .await
    }

    async fn block_completed(
        &self,
        ticket: &RunTicket,
        index: u32,
        bytes: u64,
    ) -> TransferResult<()> {
        self.mutate(|table, changes| {
            table.current_mut(&ticket.id, ticket.generation)?;

            let child_id = table
                .children(&ticket.id)
                .into_iter()
                .find(|c| c.block_index == Some(index))
                .map(|c| c.id.clone());
            if let Some(child_id) = child_id {
                if let Some(child) = table.records.get_mut(&child_id) {
                    if child.state == TransferState::Complete {
                        return Ok(());
                    }
                    child.add_progress(bytes)?;
                    child.transition(TransferState::Complete)?;
                    changes.push(Change::Saved(child.clone()));
                }
            }

            let record = table.current_mut(&ticket.id, ticket.generation)?;
            record.add_progress(bytes)?;
            changes.push(Change::Progress(record.clone()));
            Ok(())
        })
        .await
    }

    async fn block_failed(
        &self,
        ticket: &RunTicket,
        index: u32,
        error: &TransferError,
    ) -> TransferResult<()> {
        self.mutate(|table, changes| {
            table.current_mut(&ticket.id, ticket.generation)?;
            let child_id = table
                .children(&ticket.id)
                .into_iter()
                .find(|c| c.block_index == Some(index))
                .map(|c| c.id.clone());
            let Some(child_id) = child_id else {
                return Ok(());
            };
            if let Some(child) = table.records.get_mut(&child_id) {
                if child.state == TransferState::Pending {
                    child.fail(error)?;
                    changes.push(Change::Saved(child.clone()));
                }
            }
            Ok(())
        })
        .await
    }

    async fn retry_attempted(
        &self,
        ticket: &RunTicket,
        error: &ServiceError,
    ) -> TransferResult<RetryDecision> {
        let max_retries = self.config.read().max_retries;
        self.mutate(|table, changes| {
            let record = table.current_mut(&ticket.id, ticket.generation)?;
            if record.retry_count >= max_retries {
                return Ok(RetryDecision::Exhausted(record.retry_count));
            }
            record.retry_count += 1;
            record.last_error = Some(error.to_string());
            record.updated_at = chrono::Utc::now();
            changes.push(Change::Saved(record.clone()));
            Ok(RetryDecision::Retry(record.retry_count))
        })
        .await
    }
}
