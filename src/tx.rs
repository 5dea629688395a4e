//! Transaction id registry: issues writer ids and tracks open readers.

use std::collections::BTreeMap;

use crate::types::Txid;

/// Hands out monotonically increasing transaction ids and refcounts the
/// read-only transactions still holding a snapshot. The open-reader set
/// feeds the free-page manager's `release`.
#[derive(Debug, Default)]
pub struct TxRegistry {
    current: Txid,
    readers: BTreeMap<Txid, usize>,
}

impl TxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes from the last committed transaction id of a reopened file.
    pub fn with_current(current: Txid) -> Self {
        Self {
            current,
            readers: BTreeMap::new(),
        }
    }

    pub fn current(&self) -> Txid {
        self.current
    }

    /// Starts a writer transaction under a fresh id.
    pub fn begin_write(&mut self) -> Txid {
        self.current.0 += 1;
        self.current
    }

    /// Starts a read-only transaction pinned at the current id.
    pub fn begin_read(&mut self) -> Txid {
        *self.readers.entry(self.current).or_insert(0) += 1;
        self.current
    }

    pub fn end_read(&mut self, txid: Txid) {
        match self.readers.get_mut(&txid) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.readers.remove(&txid);
            }
            None => debug_assert!(false, "end_read of unknown reader {txid}"),
        }
    }

    /// Distinct ids of open readers, ascending.
    pub fn open_readers(&self) -> Vec<Txid> {
        self.readers.keys().copied().collect()
    }
}
