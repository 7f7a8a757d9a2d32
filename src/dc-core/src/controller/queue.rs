// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Command set storage and cursor.
//!
//! Three places hold sets: the single current slot, rank-ordered standby
//! buckets and the delay list. A set lives in exactly one of them. Every
//! operation here is plain bookkeeping; timers and I/O belong to the
//! manager.

use std::collections::VecDeque;
use std::time::Duration;

use uuid::Uuid;

use crate::command::{Command, CommandSet, Rank, EMERGENCY_RANK};
use crate::error::ManagerError;
use crate::status::OperationStatus;

use super::filter::{CommandFilter, RankBucketSnapshot, StorageSnapshot};

/// FIFO of waiting sets sharing one rank.
#[derive(Debug, Clone)]
pub struct RankBucket {
    pub rank: Rank,
    pub list: VecDeque<CommandSet>,
}

/// How the cursor moved in [`CommandQueue::change_next_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Same set, next command.
    Cursor,
    /// The previous set was exhausted and another one became current.
    Pulled,
    /// The previous set was suspended in favour of emergency work.
    Preempted,
}

/// Result of a deletion.
#[derive(Debug, Default)]
pub struct Deletion {
    /// Sets taken out of standby or delay (or everything, for a wipe).
    pub removed: Vec<CommandSet>,
    /// The current set matched and is now pending delete.
    pub current_marked: bool,
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    current: Option<CommandSet>,
    standby: Vec<RankBucket>,
    delayed: Vec<CommandSet>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the bucket for `set.rank`, creating it in rank order.
    pub fn add_command_set(&mut self, set: CommandSet) {
        let idx = self.bucket_index_or_insert(set.rank);
        self.standby[idx].list.push_back(set);
    }

    fn push_front(&mut self, set: CommandSet) {
        let idx = self.bucket_index_or_insert(set.rank);
        self.standby[idx].list.push_front(set);
    }

    fn bucket_index_or_insert(&mut self, rank: Rank) -> usize {
        match self.standby.binary_search_by_key(&rank, |bucket| bucket.rank) {
            Ok(idx) => idx,
            Err(idx) => {
                self.standby.insert(
                    idx,
                    RankBucket {
                        rank,
                        list: VecDeque::new(),
                    },
                );
                idx
            }
        }
    }

    pub fn current_command_set(&self) -> Option<&CommandSet> {
        self.current.as_ref()
    }

    pub fn current_command_set_mut(&mut self) -> Option<&mut CommandSet> {
        self.current.as_mut()
    }

    pub fn current_command(&self) -> Option<&Command> {
        self.current.as_ref().and_then(CommandSet::current_command)
    }

    pub fn next_command(&self) -> Option<&Command> {
        self.current.as_ref().and_then(CommandSet::next_command)
    }

    /// First non-empty bucket in rank order.
    pub fn next_command_set(&self) -> Option<&RankBucket> {
        self.standby.iter().find(|bucket| !bucket.list.is_empty())
    }

    pub fn has_emergency_work(&self) -> bool {
        self.standby
            .iter()
            .any(|bucket| bucket.rank == EMERGENCY_RANK && !bucket.list.is_empty())
    }

    /// Move the cursor forward, pulling or preempting as needed.
    ///
    /// Returns `None` when nothing is left to run; the current slot is empty
    /// afterwards.
    pub fn change_next_command(&mut self) -> Option<Advance> {
        let exhausted = self
            .current
            .as_ref()
            .map_or(true, |set| set.next_command().is_none());
        if exhausted {
            return self.change_next_command_set(None).map(|_| Advance::Pulled);
        }

        let emergency = match self.current.as_mut() {
            Some(set) => {
                set.curr_cmd_index += 1;
                set.is_emergency()
            }
            None => return None,
        };

        if !emergency && self.has_emergency_work() {
            if let Some(mut suspended) = self.current.take() {
                suspended.operation_status = OperationStatus::Wait;
                self.push_front(suspended);
            }
            return self
                .change_next_command_set(None)
                .map(|_| Advance::Preempted);
        }
        Some(Advance::Cursor)
    }

    /// Shift the head of `rank`'s bucket (or of the first non-empty one)
    /// into the current slot.
    pub fn change_next_command_set(&mut self, rank: Option<Rank>) -> Option<&CommandSet> {
        let idx = self.standby.iter().position(|bucket| {
            !bucket.list.is_empty() && rank.map_or(true, |r| bucket.rank == r)
        });
        let next = idx.and_then(|idx| self.standby[idx].list.pop_front());
        self.current = next;
        self.current.as_ref()
    }

    /// Delete by command id, or everything when `command_id` is `None`.
    ///
    /// A matching current set is only marked pending delete.
    pub fn delete_command_set(&mut self, command_id: Option<&str>) -> Deletion {
        match command_id {
            None => {
                let mut removed: Vec<CommandSet> = self.current.take().into_iter().collect();
                for bucket in &mut self.standby {
                    removed.extend(bucket.list.drain(..));
                }
                removed.append(&mut self.delayed);
                Deletion {
                    removed,
                    current_marked: false,
                }
            }
            Some(id) => self.delete_where(|set| set.command_id.as_deref() == Some(id)),
        }
    }

    /// Delete an anonymous set by reference.
    pub fn delete_command_set_by_uuid(&mut self, uuid: Uuid) -> Deletion {
        self.delete_where(|set| set.uuid == uuid)
    }

    /// Delete every set the filter matches, with the same deferral for the
    /// current set as the other deletions.
    pub fn delete_matching(&mut self, filter: &CommandFilter) -> Deletion {
        self.delete_where(|set| filter.matches(set))
    }

    fn delete_where(&mut self, pred: impl Fn(&CommandSet) -> bool) -> Deletion {
        let mut removed = Vec::new();
        for bucket in &mut self.standby {
            let mut kept = VecDeque::with_capacity(bucket.list.len());
            for set in bucket.list.drain(..) {
                if pred(&set) {
                    removed.push(set);
                } else {
                    kept.push_back(set);
                }
            }
            bucket.list = kept;
        }

        let mut kept = Vec::with_capacity(self.delayed.len());
        for set in self.delayed.drain(..) {
            if pred(&set) {
                removed.push(set);
            } else {
                kept.push(set);
            }
        }
        self.delayed = kept;

        let current_marked = match self.current.as_ref() {
            Some(set) if pred(set) => self.delete_current_command_set(),
            _ => false,
        };
        Deletion {
            removed,
            current_marked,
        }
    }

    /// Flag the current set for teardown on the next scheduling tick.
    pub fn delete_current_command_set(&mut self) -> bool {
        match self.current.as_mut() {
            Some(set) => {
                set.operation_status = OperationStatus::ProcessingDeleteCommand;
                true
            }
            None => false,
        }
    }

    /// Park the current set in the delay list.
    ///
    /// Returns the set's uuid and how long it must wait; the caller arms
    /// the return timer.
    pub fn move_to_reserved_cmd_list(&mut self) -> Result<(Uuid, Duration), ManagerError> {
        let delay_ms = self
            .current_command()
            .and_then(|cmd| cmd.delay_execution_timeout_ms)
            .ok_or(ManagerError::NoDelayOnCurrentCommand)?;
        let mut set = self
            .current
            .take()
            .ok_or(ManagerError::NoCommandInProgress)?;
        set.operation_status = OperationStatus::ProcessingDelayCommand;
        let uuid = set.uuid;
        self.delayed.push(set);
        Ok((uuid, Duration::from_millis(delay_ms)))
    }

    /// Move a delayed set back to the front of its bucket, with the delay
    /// stripped from its current command.
    ///
    /// Returns `false` if the set is no longer parked (deleted meanwhile).
    pub fn return_from_delay(&mut self, uuid: Uuid) -> bool {
        let Some(pos) = self.delayed.iter().position(|set| set.uuid == uuid) else {
            return false;
        };
        let mut set = self.delayed.remove(pos);
        let cursor = set.curr_cmd_index;
        if let Some(cmd) = set.cmd_list.get_mut(cursor) {
            cmd.delay_execution_timeout_ms = None;
        }
        set.operation_status = OperationStatus::Wait;
        self.push_front(set);
        true
    }

    pub fn find_standby_command_set_list(&self, query: &CommandFilter) -> Vec<&CommandSet> {
        self.standby
            .iter()
            .flat_map(|bucket| bucket.list.iter())
            .filter(|set| query.matches(set))
            .collect()
    }

    /// All waiting sets in scheduling order.
    pub fn convert_standby_storage_to_array(&self) -> Vec<&CommandSet> {
        self.standby
            .iter()
            .flat_map(|bucket| bucket.list.iter())
            .collect()
    }

    pub fn filter_command_storage(&self, filter: &CommandFilter) -> StorageSnapshot {
        StorageSnapshot {
            current_command_set: self
                .current
                .as_ref()
                .filter(|set| filter.matches(set))
                .cloned(),
            standby_command_set_list: self
                .standby
                .iter()
                .filter_map(|bucket| {
                    let list: Vec<CommandSet> = bucket
                        .list
                        .iter()
                        .filter(|set| filter.matches(set))
                        .cloned()
                        .collect();
                    (!list.is_empty()).then_some(RankBucketSnapshot {
                        rank: bucket.rank,
                        list,
                    })
                })
                .collect(),
            delay_command_set_list: self
                .delayed
                .iter()
                .filter(|set| filter.matches(set))
                .cloned()
                .collect(),
        }
    }

    pub fn find_command_storage(&self, filter: &CommandFilter) -> Vec<CommandSet> {
        self.filter_command_storage(filter).into_sets()
    }

    /// Set-exhaustion predicate: nothing to run now, or nothing after it.
    pub fn is_done(&self) -> bool {
        self.current_command().is_none() || self.next_command().is_none()
    }

    pub fn clear_current_command_set(&mut self) -> Option<CommandSet> {
        self.current.take()
    }

    pub fn standby_len(&self) -> usize {
        self.standby.iter().map(|bucket| bucket.list.len()).sum()
    }

    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.standby_len() == 0 && self.delayed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(rank: Rank, id: &str, commands: usize) -> CommandSet {
        let cmd_list = (0..commands)
            .map(|i| Command::new(format!("{}-{}", id, i).into_bytes()))
            .collect();
        CommandSet::new(rank, cmd_list).with_command_id(id)
    }

    fn current_id(queue: &CommandQueue) -> Option<&str> {
        queue
            .current_command_set()
            .and_then(|set| set.command_id.as_deref())
    }

    #[test]
    fn test_buckets_are_sorted_and_fifo() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(3, "c", 1));
        queue.add_command_set(set(2, "a", 1));
        queue.add_command_set(set(2, "b", 1));

        let order: Vec<_> = queue
            .convert_standby_storage_to_array()
            .iter()
            .map(|s| s.command_id.clone().unwrap())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(queue.next_command_set().unwrap().rank, 2);
        assert!(queue.current_command_set().is_none());
    }

    #[test]
    fn test_change_next_command_walks_sets_in_order() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(2, "a", 2));
        queue.add_command_set(set(3, "b", 1));

        assert_eq!(queue.change_next_command(), Some(Advance::Pulled));
        assert_eq!(queue.current_command().unwrap().data, b"a-0");
        assert!(!queue.is_done());

        assert_eq!(queue.change_next_command(), Some(Advance::Cursor));
        assert_eq!(queue.current_command().unwrap().data, b"a-1");
        assert!(queue.is_done());

        assert_eq!(queue.change_next_command(), Some(Advance::Pulled));
        assert_eq!(queue.current_command().unwrap().data, b"b-0");

        assert_eq!(queue.change_next_command(), None);
        assert!(queue.current_command_set().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_emergency_preempts_and_cursor_is_preserved() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(2, "normal", 3));
        queue.change_next_command();
        assert_eq!(current_id(&queue), Some("normal"));

        queue.add_command_set(set(EMERGENCY_RANK, "alarm", 1));
        assert!(queue.has_emergency_work());

        assert_eq!(queue.change_next_command(), Some(Advance::Preempted));
        assert_eq!(current_id(&queue), Some("alarm"));

        let suspended = queue.find_standby_command_set_list(&CommandFilter::new().command_id("normal"));
        assert_eq!(suspended.len(), 1);
        assert_eq!(suspended[0].curr_cmd_index, 1);

        // Emergency set exhausted: the suspended set resumes where it stopped.
        assert_eq!(queue.change_next_command(), Some(Advance::Pulled));
        assert_eq!(current_id(&queue), Some("normal"));
        assert_eq!(queue.current_command().unwrap().data, b"normal-1");
    }

    #[test]
    fn test_emergency_set_is_not_preempted() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(EMERGENCY_RANK, "first", 2));
        queue.change_next_command();
        queue.add_command_set(set(EMERGENCY_RANK, "second", 1));
        assert_eq!(queue.change_next_command(), Some(Advance::Cursor));
        assert_eq!(current_id(&queue), Some("first"));
    }

    #[test]
    fn test_change_next_command_set_without_work_clears_current() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(1, "only", 1));
        assert!(queue.change_next_command_set(None).is_some());
        assert!(queue.change_next_command_set(None).is_none());
        assert!(queue.current_command_set().is_none());
    }

    #[test]
    fn test_change_next_command_set_by_rank() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(1, "one", 1));
        queue.add_command_set(set(5, "five", 1));
        let pulled = queue.change_next_command_set(Some(5)).unwrap();
        assert_eq!(pulled.command_id.as_deref(), Some("five"));
    }

    #[test]
    fn test_delete_unknown_id_is_noop() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(1, "keep", 1));
        let deletion = queue.delete_command_set(Some("missing"));
        assert!(deletion.removed.is_empty());
        assert!(!deletion.current_marked);
        assert_eq!(queue.standby_len(), 1);
    }

    #[test]
    fn test_delete_marks_current_and_removes_waiting() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(1, "x", 1));
        queue.change_next_command();
        queue.add_command_set(set(1, "x", 1));
        queue.add_command_set(set(2, "y", 1));

        let deletion = queue.delete_command_set(Some("x"));
        assert_eq!(deletion.removed.len(), 1);
        assert!(deletion.current_marked);
        assert_eq!(
            queue.current_command_set().unwrap().operation_status,
            OperationStatus::ProcessingDeleteCommand
        );
        assert_eq!(queue.standby_len(), 1);
    }

    #[test]
    fn test_delete_matching_uses_filter() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(1, "run", 1));
        queue.change_next_command();
        queue.add_command_set(set(1, "wait", 1));
        queue.add_command_set(set(2, "keep", 1));

        let deletion = queue.delete_matching(&CommandFilter::new().rank(1));
        assert_eq!(deletion.removed.len(), 1);
        assert!(deletion.current_marked);
        assert_eq!(current_id(&queue), Some("run"));
        assert_eq!(queue.standby_len(), 1);
        assert_eq!(queue.next_command_set().unwrap().rank, 2);
    }

    #[test]
    fn test_delete_all_wipes_every_area() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(CommandSet::new(3, vec![Command::new(vec![1]).with_delay(50)]));
        queue.change_next_command();
        queue.move_to_reserved_cmd_list().unwrap();
        queue.add_command_set(set(1, "a", 1));
        queue.change_next_command();
        queue.add_command_set(set(2, "b", 1));

        let deletion = queue.delete_command_set(None);
        assert_eq!(deletion.removed.len(), 3);
        assert!(!deletion.current_marked);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_delay_round_trip_returns_to_front() {
        let mut queue = CommandQueue::new();
        let delayed = CommandSet::new(2, vec![Command::new(vec![7]).with_delay(3000)])
            .with_command_id("later");
        queue.add_command_set(delayed);
        queue.change_next_command();

        let (uuid, delay) = queue.move_to_reserved_cmd_list().unwrap();
        assert_eq!(delay, Duration::from_millis(3000));
        assert!(queue.current_command_set().is_none());
        assert_eq!(queue.delayed_len(), 1);

        queue.add_command_set(set(2, "queued", 1));
        assert!(queue.return_from_delay(uuid));
        assert_eq!(queue.delayed_len(), 0);

        let order = queue.convert_standby_storage_to_array();
        assert_eq!(order[0].command_id.as_deref(), Some("later"));
        assert_eq!(order[0].cmd_list[0].delay_execution_timeout_ms, None);
        assert_eq!(order[1].command_id.as_deref(), Some("queued"));

        // A second fire for the same set is a no-op.
        assert!(!queue.return_from_delay(uuid));
    }

    #[test]
    fn test_move_to_reserved_requires_delay() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(1, "plain", 1));
        queue.change_next_command();
        assert_eq!(
            queue.move_to_reserved_cmd_list(),
            Err(ManagerError::NoDelayOnCurrentCommand)
        );
        assert!(queue.current_command_set().is_some());
    }

    #[test]
    fn test_filter_command_storage_snapshot() {
        let mut queue = CommandQueue::new();
        queue.add_command_set(set(1, "a", 1));
        queue.change_next_command();
        queue.add_command_set(set(1, "b", 1));
        queue.add_command_set(set(4, "a", 1));

        let snapshot = queue.filter_command_storage(&CommandFilter::new().command_id("a"));
        assert!(snapshot.current_command_set.is_some());
        assert_eq!(snapshot.standby_command_set_list.len(), 1);
        assert_eq!(snapshot.standby_command_set_list[0].rank, 4);
        assert_eq!(snapshot.len(), 2);

        let flat = queue.find_command_storage(&CommandFilter::new().rank(1));
        assert_eq!(flat.len(), 2);
    }
}
