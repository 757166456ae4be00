//! History ledger — at most one snapshot per business date.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Date-ordered snapshots, trimmed to the newest `retention` dates.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryLedger {
    rows: BTreeMap<NaiveDate, Snapshot>,
    retention: usize,
}

impl HistoryLedger {
    /// `retention == 0` keeps everything.
    pub fn new(retention: usize) -> Self {
        Self {
            rows: BTreeMap::new(),
            retention,
        }
    }

    /// Build from previously persisted rows. A later row for the same date
    /// replaces an earlier one.
    pub fn from_rows(rows: impl IntoIterator<Item = Snapshot>, retention: usize) -> Self {
        let mut ledger = Self::new(retention);
        for row in rows {
            ledger.rows.insert(row.date(), row);
        }
        ledger.trim();
        ledger
    }

    /// Insert or wholesale-replace the row for the snapshot's date.
    pub fn upsert(&mut self, snapshot: Snapshot) -> UpsertOutcome {
        let outcome = match self.rows.insert(snapshot.date(), snapshot) {
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        };
        self.trim();
        outcome
    }

    pub fn get(&self, date: NaiveDate) -> Option<&Snapshot> {
        self.rows.get(&date)
    }

    /// Rows in ascending date order.
    pub fn rows(&self) -> impl Iterator<Item = &Snapshot> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    fn trim(&mut self) {
        if self.retention == 0 {
            return;
        }
        while self.rows.len() > self.retention {
            self.rows.pop_first();
        }
    }
}
