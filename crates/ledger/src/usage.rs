//! Latest recorded value per subject, derived from the chain.

use serde::Serialize;
use std::collections::BTreeMap;
use tally_core::{Block, UsageUpdate};
use thiserror::Error;

/// Why a proposed usage value was refused before building a block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("cannot decrease usage of {subject} (current {current}, proposed {proposed})")]
    Decrease {
        subject: String,
        current: u64,
        proposed: u64,
    },

    #[error("no change in usage of {subject} (already {current})")]
    NoChange { subject: String, current: u64 },
}

/// Subject id to latest `new_value`, ordered by subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UsageTable {
    values: BTreeMap<String, u64>,
}

impl UsageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `blocks` in order; later blocks overwrite earlier ones.
    pub fn from_chain(blocks: &[Block]) -> Self {
        let mut table = Self::new();
        for block in blocks {
            table.apply(block);
        }
        table
    }

    pub fn apply(&mut self, block: &Block) {
        self.values.insert(block.subject_id.clone(), block.new_value);
    }

    /// Latest value for `subject`, if it was ever recorded.
    pub fn get(&self, subject: &str) -> Option<u64> {
        self.values.get(subject).copied()
    }

    /// Latest value for `subject`, 0 if it was never recorded.
    pub fn current(&self, subject: &str) -> u64 {
        self.get(subject).unwrap_or(0)
    }

    /// Turn a requested new value into an update from the current one.
    pub fn propose(
        &self,
        subject: &str,
        new_value: u64,
        author: &str,
    ) -> Result<UsageUpdate, UsageError> {
        let current = self.current(subject);
        if new_value < current {
            return Err(UsageError::Decrease {
                subject: subject.to_string(),
                current,
                proposed: new_value,
            });
        }
        if new_value == current {
            return Err(UsageError::NoChange {
                subject: subject.to_string(),
                current,
            });
        }
        Ok(UsageUpdate::new(subject, current, new_value, author))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
