//! Most-recent-first record of selected images

use imageid_core::{Error, ImageReference, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// History configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of entries to keep; unset keeps everything
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One recorded selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Selected image
    pub reference: ImageReference,

    /// Monotonic selection number, starting at 1
    pub sequence: u64,
}

/// Ordered ledger of image selections, newest at index 0
///
/// Entries are never deduplicated: selecting the same image twice records it
/// twice.
#[derive(Debug, Clone, Default)]
pub struct HistoryLedger {
    entries: VecDeque<HistoryEntry>,
    limit: Option<usize>,
    next_sequence: u64,
}

impl HistoryLedger {
    /// Create an empty ledger
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: config.limit,
            next_sequence: 0,
        }
    }

    /// Prepend a selection, evicting the oldest entries beyond the limit
    pub fn record(&mut self, reference: ImageReference) -> HistoryEntry {
        self.push(reference).0
    }

    /// Like [`HistoryLedger::record`], also returning the evicted entries
    pub fn push(&mut self, reference: ImageReference) -> (HistoryEntry, Vec<HistoryEntry>) {
        self.next_sequence += 1;
        let entry = HistoryEntry {
            reference,
            sequence: self.next_sequence,
        };
        self.entries.push_front(entry.clone());

        let evicted: Vec<HistoryEntry> = match self.limit {
            Some(limit) if self.entries.len() > limit => self.entries.split_off(limit).into(),
            _ => Vec::new(),
        };

        (entry, evicted)
    }

    /// All entries, most recent first
    pub fn list(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Iterate entries, most recent first
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    /// Reference at `index`, for replaying a past selection
    pub fn select(&self, index: usize) -> Result<ImageReference> {
        self.entries
            .get(index)
            .map(|entry| entry.reference.clone())
            .ok_or(Error::HistoryIndex {
                index,
                len: self.entries.len(),
            })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before the first selection
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured retention limit
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}
