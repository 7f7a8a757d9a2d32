// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Typed queries over the command storage.

use serde::{Deserialize, Serialize};

use crate::command::{CommandSet, Rank};

/// AND-combined match on the fields commanders look sets up by.
///
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandFilter {
    /// Commander id.
    pub commander: Option<String>,
    pub command_id: Option<String>,
    pub rank: Option<Rank>,
}

impl CommandFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commander(mut self, commander_id: impl Into<String>) -> Self {
        self.commander = Some(commander_id.into());
        self
    }

    pub fn command_id(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }

    pub fn rank(mut self, rank: Rank) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn matches(&self, set: &CommandSet) -> bool {
        if let Some(commander) = &self.commander {
            if set.commander_id() != Some(commander.as_str()) {
                return false;
            }
        }
        if let Some(command_id) = &self.command_id {
            if set.command_id.as_deref() != Some(command_id.as_str()) {
                return false;
            }
        }
        if let Some(rank) = self.rank {
            if set.rank != rank {
                return false;
            }
        }
        true
    }
}

/// One rank bucket as seen from outside the queue.
#[derive(Debug, Clone, Serialize)]
pub struct RankBucketSnapshot {
    pub rank: Rank,
    pub list: Vec<CommandSet>,
}

/// Copy of the queue aggregate, shaped like the storage itself.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageSnapshot {
    pub current_command_set: Option<CommandSet>,
    pub standby_command_set_list: Vec<RankBucketSnapshot>,
    pub delay_command_set_list: Vec<CommandSet>,
}

impl StorageSnapshot {
    /// Flatten to current, then standby in rank order, then delayed.
    pub fn into_sets(self) -> Vec<CommandSet> {
        self.current_command_set
            .into_iter()
            .chain(
                self.standby_command_set_list
                    .into_iter()
                    .flat_map(|bucket| bucket.list),
            )
            .chain(self.delay_command_set_list)
            .collect()
    }

    pub fn len(&self) -> usize {
        usize::from(self.current_command_set.is_some())
            + self
                .standby_command_set_list
                .iter()
                .map(|bucket| bucket.list.len())
                .sum::<usize>()
            + self.delay_command_set_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[test]
    fn test_empty_filter_matches_everything() {
        let set = CommandSet::new(4, vec![Command::new(vec![1])]);
        assert!(CommandFilter::new().matches(&set));
    }

    #[test]
    fn test_filter_fields_are_anded() {
        let set = CommandSet::new(2, vec![]).with_command_id("read-temp");
        assert!(CommandFilter::new().command_id("read-temp").matches(&set));
        assert!(CommandFilter::new().command_id("read-temp").rank(2).matches(&set));
        assert!(!CommandFilter::new().command_id("read-temp").rank(3).matches(&set));
        assert!(!CommandFilter::new().commander("nobody").matches(&set));
    }
}
