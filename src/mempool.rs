//! Zero-confirmation pool
//!
//! Holds transactions seen outside any block, in arrival order, until a block
//! either confirms them or spends one of their inputs elsewhere.

use crate::codec::parse;
use crate::error::{ChainError, Result};
use crate::types::*;
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Unconfirmed transaction plus arrival metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeroConfEntry {
    pub tx: Transaction,
    pub txid: Hash,
    pub arrival_time: u32,
    /// Arrival order, used as the ledger position of pending entries
    pub seq: u32,
}

/// Result of offering a transaction to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted(Hash),
    Duplicate(Hash),
    AlreadyConfirmed(Hash),
    /// Spends an outpoint the main chain already spent; not kept
    Conflicted(Hash),
}

/// Entries removed by a purge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// now confirmed on the main chain
    pub superseded: BTreeSet<Hash>,
    /// spend an outpoint the main chain spends differently, or descend from
    /// such a transaction
    pub conflicted: BTreeSet<Hash>,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.superseded.is_empty() && self.conflicted.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZeroConfPool {
    order: VecDeque<Hash>,
    entries: HashMap<Hash, ZeroConfEntry>,
    next_seq: u32,
}

impl ZeroConfPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// AdmitZeroConf: bytes × time → outcome
    ///
    /// 1. Parse the transaction; trailing bytes are malformed
    /// 2. Reject it if already pooled or already confirmed
    /// 3. Append it in arrival order
    pub fn admit<F>(&mut self, raw: &[u8], arrival_time: u32, is_confirmed: F) -> Result<AdmitOutcome>
    where
        F: Fn(&Hash) -> bool,
    {
        // 1. Parse
        let (tx, consumed) = parse::<Transaction>(raw, 0)?;
        if consumed != raw.len() {
            return Err(ChainError::MalformedData(format!(
                "{} trailing bytes after transaction",
                raw.len() - consumed
            )));
        }
        let txid = tx.txid();

        // 2. Duplicates
        if self.entries.contains_key(&txid) {
            return Ok(AdmitOutcome::Duplicate(txid));
        }
        if is_confirmed(&txid) {
            return Ok(AdmitOutcome::AlreadyConfirmed(txid));
        }

        // 3. Append
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.order.push_back(txid);
        self.entries.insert(
            txid,
            ZeroConfEntry {
                tx,
                txid,
                arrival_time,
                seq,
            },
        );
        debug!("admitted zero-conf tx {}", hash_hex(&txid));
        Ok(AdmitOutcome::Admitted(txid))
    }

    /// PurgeZeroConf: remove confirmed and conflicting entries
    ///
    /// `is_confirmed` tells whether a transaction is on the main chain;
    /// `confirmed_spender` names the main-chain transaction spending an
    /// outpoint, if any.
    pub fn purge<F, G>(&mut self, is_confirmed: F, confirmed_spender: G) -> PurgeReport
    where
        F: Fn(&Hash) -> bool,
        G: Fn(&OutPoint) -> Option<Hash>,
    {
        let mut report = PurgeReport::default();

        // 1. Superseded by a block
        for txid in &self.order {
            if is_confirmed(txid) {
                report.superseded.insert(*txid);
            }
        }

        // 2. Direct conflicts with a confirmed spend
        let mut frontier: Vec<Hash> = Vec::new();
        for txid in &self.order {
            if report.superseded.contains(txid) {
                continue;
            }
            let Some(entry) = self.entries.get(txid) else {
                continue;
            };
            let conflicts = entry.tx.inputs.iter().any(|input| {
                confirmed_spender(&input.prevout).map_or(false, |spender| spender != *txid)
            });
            if conflicts && report.conflicted.insert(*txid) {
                frontier.push(*txid);
            }
        }

        // 3. Descendants of conflicts can never confirm either
        while let Some(parent) = frontier.pop() {
            for txid in &self.order {
                if report.conflicted.contains(txid) || report.superseded.contains(txid) {
                    continue;
                }
                let spends_parent = self
                    .entries
                    .get(txid)
                    .map_or(false, |e| e.tx.inputs.iter().any(|i| i.prevout.hash == parent));
                if spends_parent {
                    report.conflicted.insert(*txid);
                    frontier.push(*txid);
                }
            }
        }

        for txid in &report.conflicted {
            warn!("zero-conf tx {} conflicts with the main chain", hash_hex(txid));
        }

        self.order
            .retain(|h| !report.superseded.contains(h) && !report.conflicted.contains(h));
        self.entries
            .retain(|h, _| !report.superseded.contains(h) && !report.conflicted.contains(h));
        report
    }

    pub fn get(&self, txid: &Hash) -> Option<&ZeroConfEntry> {
        self.entries.get(txid)
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.entries.contains_key(txid)
    }

    /// Output of a pooled transaction
    pub fn resolve_outpoint(&self, outpoint: &OutPoint) -> Option<&TransactionOutput> {
        self.entries
            .get(&outpoint.hash)
            .and_then(|e| e.tx.outputs.get(outpoint.index as usize))
    }

    /// Entries in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &ZeroConfEntry> {
        self.order.iter().filter_map(|h| self.entries.get(h))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
