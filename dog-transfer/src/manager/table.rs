use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::{
    PauseReason, TransferError, TransferId, TransferRecord, TransferResult, TransferState,
};

/// A coordinator task owning an admitted record
pub(crate) struct ActiveRun {
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// Side effects of a table mutation, applied in order after the lock is released
#[derive(Debug)]
pub(crate) enum Change {
    State {
        record: TransferRecord,
        from: TransferState,
    },
    Failed {
        record: TransferRecord,
        from: TransferState,
        error: TransferError,
    },
    Progress(TransferRecord),
    /// Persist without notifying
    Saved(TransferRecord),
    /// Delete a block record
    Deleted(TransferId),
    Removed(TransferId),
}

/// In-memory arena of every known record plus the runs currently draining or active
#[derive(Default)]
pub(crate) struct TransferTable {
    pub records: HashMap<TransferId, TransferRecord>,
    pub runs: HashMap<TransferId, ActiveRun>,
}

impl TransferTable {
    pub fn top_level(&self, id: &TransferId) -> TransferResult<&TransferRecord> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| TransferError::NotFound(id.clone()))?;
        if record.is_block() {
            return Err(TransferError::BlockRecord(id.clone()));
        }
        Ok(record)
    }

    fn top_level_mut(&mut self, id: &TransferId) -> TransferResult<&mut TransferRecord> {
        self.top_level(id)?;
        self.records
            .get_mut(id)
            .ok_or_else(|| TransferError::NotFound(id.clone()))
    }

    /// Block records of `parent`, ordered by index
    pub fn children(&self, parent: &TransferId) -> Vec<&TransferRecord> {
        let mut children: Vec<&TransferRecord> = self
            .records
            .values()
            .filter(|r| r.parent_id.as_ref() == Some(parent))
            .collect();
        children.sort_by_key(|r| r.block_index);
        children
    }

    fn child_ids(&self, parent: &TransferId) -> Vec<TransferId> {
        self.children(parent).into_iter().map(|r| r.id.clone()).collect()
    }

    /// Top-level records of `owner_id`, oldest first
    pub fn owner_ids(&self, owner_id: &str) -> Vec<TransferId> {
        let mut records: Vec<&TransferRecord> = self
            .records
            .values()
            .filter(|r| !r.is_block() && r.owner_id == owner_id)
            .collect();
        records.sort_by_key(|r| r.sequence);
        records.into_iter().map(|r| r.id.clone()).collect()
    }

    /// Signal the record's run to stop; its slot is held until it drains
    fn interrupt(&self, id: &TransferId) {
        if let Some(run) = self.runs.get(id) {
            run.cancel.cancel();
        }
    }

    /// Pause a queued or running record. Returns false if it was already paused.
    pub fn pause(
        &mut self,
        id: &TransferId,
        reason: PauseReason,
        changes: &mut Vec<Change>,
    ) -> TransferResult<bool> {
        let record = self.top_level_mut(id)?;
        if record.state == TransferState::Paused {
            if reason == PauseReason::User && record.pause_reason != Some(PauseReason::User) {
                record.pause_reason = Some(PauseReason::User);
                changes.push(Change::Saved(record.clone()));
            }
            return Ok(false);
        }

        let from = record.pause(reason)?;
        changes.push(Change::State {
            record: record.clone(),
            from,
        });
        if from == TransferState::InProgress {
            self.interrupt(id);
        }
        Ok(true)
    }

    /// Put a paused or failed record back in the queue with a fresh retry budget
    pub fn resume(&mut self, id: &TransferId, changes: &mut Vec<Change>) -> TransferResult<bool> {
        let record = self.top_level_mut(id)?;
        match record.state {
            TransferState::Pending | TransferState::InProgress => return Ok(false),
            TransferState::Paused | TransferState::Failed => {}
            TransferState::Complete | TransferState::Cancelled => {
                return Err(TransferError::InvalidTransition {
                    id: id.clone(),
                    from: record.state,
                    to: TransferState::Pending,
                })
            }
        }

        let from = record.transition(TransferState::Pending)?;
        record.retry_count = 0;
        record.last_error = None;
        changes.push(Change::State {
            record: record.clone(),
            from,
        });

        if from == TransferState::Failed {
            for child_id in self.child_ids(id) {
                if let Some(child) = self.records.get_mut(&child_id) {
                    if child.state == TransferState::Failed {
                        child.transition(TransferState::Pending)?;
                        child.retry_count = 0;
                        child.last_error = None;
                        changes.push(Change::Saved(child.clone()));
                    }
                }
            }
        }
        Ok(true)
    }

    /// Cancel a record and its unfinished blocks. Cancelling twice is a no-op.
    pub fn cancel(&mut self, id: &TransferId, changes: &mut Vec<Change>) -> TransferResult<bool> {
        let record = self.top_level_mut(id)?;
        if record.state == TransferState::Cancelled {
            return Ok(false);
        }

        let from = record.transition(TransferState::Cancelled)?;
        changes.push(Change::State {
            record: record.clone(),
            from,
        });
        self.interrupt(id);

        for child_id in self.child_ids(id) {
            if let Some(child) = self.records.get_mut(&child_id) {
                if !child.state.is_terminal() && child.state.can_transition_to(TransferState::Cancelled) {
                    child.transition(TransferState::Cancelled)?;
                    changes.push(Change::Saved(child.clone()));
                }
            }
        }
        Ok(true)
    }

    /// Cancel if still owed work, then drop the record and its blocks
    pub fn remove(&mut self, id: &TransferId, changes: &mut Vec<Change>) -> TransferResult<()> {
        let state = self.top_level(id)?.state;
        if state != TransferState::Complete {
            self.cancel(id, changes)?;
        }

        for child_id in self.child_ids(id) {
            self.records.remove(&child_id);
            changes.push(Change::Deleted(child_id));
        }
        self.records.remove(id);
        changes.push(Change::Removed(id.clone()));
        Ok(())
    }

    /// Pause every running record, returning how many were paused
    pub fn pause_running(&mut self, reason: PauseReason, changes: &mut Vec<Change>) -> usize {
        let running: Vec<TransferId> = self
            .records
            .values()
            .filter(|r| !r.is_block() && r.state == TransferState::InProgress)
            .map(|r| r.id.clone())
            .collect();

        running
            .iter()
            .filter(|id| matches!(self.pause(id, reason, changes), Ok(true)))
            .count()
    }

    /// Move records paused for one of `reasons` back to Pending
    pub fn requeue<R, F>(
        &mut self,
        reason_matches: R,
        eligible: F,
        changes: &mut Vec<Change>,
    ) -> usize
    where
        R: Fn(PauseReason) -> bool,
        F: Fn(&TransferRecord) -> bool,
    {
        let mut requeued = 0;
        for record in self.records.values_mut() {
            let paused_for = match (record.state, record.pause_reason) {
                (TransferState::Paused, Some(reason)) => reason,
                _ => continue,
            };
            if record.is_block() || !reason_matches(paused_for) || !eligible(&*record) {
                continue;
            }
            if let Ok(from) = record.transition(TransferState::Pending) {
                changes.push(Change::State {
                    record: record.clone(),
                    from,
                });
                requeued += 1;
            }
        }
        requeued
    }

    /// Oldest Pending top-level record that may be admitted now
    pub fn next_admissible<F>(&self, owner_available: F) -> Option<TransferId>
    where
        F: Fn(&str) -> bool,
    {
        self.records
            .values()
            .filter(|r| r.state == TransferState::Pending && !r.is_block())
            .filter(|r| !self.runs.contains_key(&r.id))
            .filter(|r| owner_available(&r.owner_id))
            .min_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)))
            .map(|r| r.id.clone())
    }

    /// The record a run may still report on, if that run is current
    pub fn current_mut(
        &mut self,
        id: &TransferId,
        generation: u64,
    ) -> TransferResult<&mut TransferRecord> {
        let current = self
            .runs
            .get(id)
            .map(|run| run.generation == generation)
            .unwrap_or(false);
        match self.records.get_mut(id) {
            Some(record) if current && record.state == TransferState::InProgress => Ok(record),
            _ => Err(TransferError::Interrupted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ByteRange, TransferRequest};

    fn insert(table: &mut TransferTable, owner: &str, sequence: u64) -> TransferId {
        let request = TransferRequest::download(owner, "bucket/key", "/tmp/key")
            .with_range(ByteRange::whole(8));
        let record = TransferRecord::from_request(request, sequence);
        let id = record.id.clone();
        table.records.insert(id.clone(), record);
        id
    }

    fn with_blocks(table: &mut TransferTable, parent: &TransferId) -> Vec<TransferId> {
        let record = table.records[parent].clone();
        (0..2u32)
            .map(|i| {
                let child = TransferRecord::new_block(&record, i, ByteRange::new(i as u64 * 4, i as u64 * 4 + 4));
                let id = child.id.clone();
                table.records.insert(id.clone(), child);
                id
            })
            .collect()
    }

    #[test]
    fn admission_is_fifo_and_skips_unavailable_owners() {
        let mut table = TransferTable::default();
        let _first = insert(&mut table, "offline-owner", 1);
        let second = insert(&mut table, "acct", 2);
        let _third = insert(&mut table, "acct", 3);

        let next = table.next_admissible(|owner| owner == "acct");
        assert_eq!(next, Some(second));
    }

    #[test]
    fn draining_records_are_not_readmitted() {
        let mut table = TransferTable::default();
        let id = insert(&mut table, "acct", 1);
        table.runs.insert(
            id.clone(),
            ActiveRun {
                generation: 1,
                cancel: CancellationToken::new(),
            },
        );
        assert_eq!(table.next_admissible(|_| true), None);
    }

    #[test]
    fn pausing_a_running_record_cancels_its_run() {
        let mut table = TransferTable::default();
        let id = insert(&mut table, "acct", 1);
        let cancel = CancellationToken::new();
        table.runs.insert(
            id.clone(),
            ActiveRun {
                generation: 1,
                cancel: cancel.clone(),
            },
        );
        table
            .records
            .get_mut(&id)
            .unwrap()
            .transition(TransferState::InProgress)
            .unwrap();

        let mut changes = Vec::new();
        assert!(table.pause(&id, PauseReason::User, &mut changes).unwrap());
        assert!(cancel.is_cancelled());
        assert!(table.current_mut(&id, 1).is_err());
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn cancel_cascades_to_blocks() {
        let mut table = TransferTable::default();
        let id = insert(&mut table, "acct", 1);
        let blocks = with_blocks(&mut table, &id);
        table
            .records
            .get_mut(&blocks[0])
            .unwrap()
            .transition(TransferState::Complete)
            .unwrap();

        let mut changes = Vec::new();
        assert!(table.cancel(&id, &mut changes).unwrap());
        assert!(!table.cancel(&id, &mut changes).unwrap());
        assert_eq!(table.records[&blocks[0]].state, TransferState::Complete);
        assert_eq!(table.records[&blocks[1]].state, TransferState::Cancelled);
    }

    #[test]
    fn resume_from_failed_resets_failed_blocks() {
        let mut table = TransferTable::default();
        let id = insert(&mut table, "acct", 1);
        let blocks = with_blocks(&mut table, &id);
        let error = TransferError::integrity("bad block");
        {
            let parent = table.records.get_mut(&id).unwrap();
            parent.transition(TransferState::InProgress).unwrap();
            parent.retry_count = 3;
            parent.fail(&error).unwrap();
        }
        table.records.get_mut(&blocks[1]).unwrap().fail(&error).unwrap();

        let mut changes = Vec::new();
        assert!(table.resume(&id, &mut changes).unwrap());
        assert_eq!(table.records[&id].state, TransferState::Pending);
        assert_eq!(table.records[&id].retry_count, 0);
        assert_eq!(table.records[&blocks[1]].state, TransferState::Pending);
    }

    #[test]
    fn remove_drops_blocks_too() {
        let mut table = TransferTable::default();
        let id = insert(&mut table, "acct", 1);
        with_blocks(&mut table, &id);

        let mut changes = Vec::new();
        table.remove(&id, &mut changes).unwrap();
        assert!(table.records.is_empty());
        assert!(matches!(changes.last(), Some(Change::Removed(removed)) if removed == &id));
    }

    #[test]
    fn block_records_reject_direct_control() {
        let mut table = TransferTable::default();
        let id = insert(&mut table, "acct", 1);
        let blocks = with_blocks(&mut table, &id);

        let mut changes = Vec::new();
        let err = table.pause(&blocks[0], PauseReason::User, &mut changes).unwrap_err();
        assert!(matches!(err, TransferError::BlockRecord(_)));
    }

    #[test]
    fn requeue_only_touches_matching_reasons() {
        let mut table = TransferTable::default();
        let offline = insert(&mut table, "acct", 1);
        let user = insert(&mut table, "acct", 2);
        let mut changes = Vec::new();
        table.pause(&offline, PauseReason::Connectivity, &mut changes).unwrap();
        table.pause(&user, PauseReason::User, &mut changes).unwrap();

        let requeued = table.requeue(PauseReason::is_automatic, |_| true, &mut changes);
        assert_eq!(requeued, 1);
        assert_eq!(table.records[&offline].state, TransferState::Pending);
        assert_eq!(table.records[&user].state, TransferState::Paused);
    }
}
