//! Header chain: storage of every known header, main-chain selection by
//! cumulative difficulty, and reorganization reports.
//!
//! Headers live in an arena indexed by insertion order; a hash map resolves
//! hashes to arena slots. Cumulative difficulty and height are memoized the
//! first time a header is traced back to genesis, and are never recomputed
//! because a header's parent cannot change.

use crate::config::TieBreak;
use crate::constants::EMPTY_HASH;
use crate::difficulty::difficulty_from_bits;
use crate::types::{hash_hex, BlockHeader, Hash};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Lifecycle of a header within the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainStatus {
    /// no path to genesis yet
    Unlinked,
    /// traced to genesis, not yet classified
    Linked,
    MainChain,
    Orphan,
    /// was on the main chain until a heavier branch displaced it
    InvalidatedByReorg,
}

#[derive(Debug, Clone)]
pub struct HeaderEntry {
    pub header: BlockHeader,
    pub hash: Hash,
    pub difficulty: f64,
    pub cumulative_difficulty: Option<f64>,
    pub height: Option<u32>,
    pub status: ChainStatus,
    pub byte_offset: Option<u64>,
    /// Hashes of the block's transactions, in block order
    pub tx_hashes: Vec<Hash>,
}

impl HeaderEntry {
    pub fn is_main_chain(&self) -> bool {
        self.status == ChainStatus::MainChain
    }
}

/// Outcome of inserting a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderInsert {
    /// parent already known, or the header is genesis
    Linked,
    /// parent not seen yet; retained until it arrives
    Unlinked,
    /// hash already stored; nothing was overwritten
    Duplicate,
}

/// Structured notification that the main chain switched branches
#[derive(Debug, Clone, PartialEq)]
pub struct ReorgReport {
    /// Deepest header common to the old and new main chains
    pub branch_point: Hash,
    pub branch_height: u32,
    pub old_tip: Hash,
    pub new_tip: Hash,
    /// Blocks that left the main chain, lowest first
    pub disconnected: Vec<Hash>,
    /// Blocks that joined the main chain, lowest first
    pub connected: Vec<Hash>,
    /// Transactions only on the abandoned branch
    pub invalidated: BTreeSet<Hash>,
    /// Transactions on the new branch that were not on the abandoned one
    pub affected: BTreeSet<Hash>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizeOutcome {
    pub tip: Option<Hash>,
    pub tip_changed: bool,
    pub reorg: Option<ReorgReport>,
    /// Headers still without a path to genesis
    pub unlinked: Vec<Hash>,
}

#[derive(Debug, Clone, Default)]
pub struct HeaderChain {
    entries: Vec<HeaderEntry>,
    by_hash: HashMap<Hash, usize>,
    /// Main chain indexed by height
    main_chain: Vec<usize>,
    /// Arena slots whose cumulative difficulty is not known yet
    pending: Vec<usize>,
    top: Option<usize>,
    genesis: Option<usize>,
    genesis_hash: Option<Hash>,
    tie_break: TieBreak,
}

impl HeaderChain {
    pub fn new(genesis_hash: Option<Hash>, tie_break: TieBreak) -> Self {
        Self {
            genesis_hash,
            tie_break,
            ..Default::default()
        }
    }

    /// Insert a header, hashing its serialized form
    pub fn insert_header(&mut self, header: BlockHeader) -> HeaderInsert {
        let hash = header.hash();
        self.insert_header_with_hash(header, hash)
    }

    /// Insert a header under a hash the caller vouches for
    pub fn insert_header_with_hash(&mut self, header: BlockHeader, hash: Hash) -> HeaderInsert {
        if self.by_hash.contains_key(&hash) {
            debug!("header {} already known", hash_hex(&hash));
            return HeaderInsert::Duplicate;
        }

        let idx = self.entries.len();
        let is_genesis = match self.genesis_hash {
            Some(genesis) => genesis == hash,
            None => self.genesis.is_none() && header.prev_block_hash == EMPTY_HASH,
        };
        let parent_known = self.by_hash.contains_key(&header.prev_block_hash);

        self.entries.push(HeaderEntry {
            difficulty: difficulty_from_bits(header.bits),
            header,
            hash,
            cumulative_difficulty: None,
            height: None,
            status: ChainStatus::Unlinked,
            byte_offset: None,
            tx_hashes: Vec::new(),
        });
        self.by_hash.insert(hash, idx);
        self.pending.push(idx);

        if is_genesis {
            self.genesis = Some(idx);
        }
        debug!("inserted header {} at slot {}", hash_hex(&hash), idx);

        if is_genesis || parent_known {
            HeaderInsert::Linked
        } else {
            HeaderInsert::Unlinked
        }
    }

    /// Record the transactions and source offset of a stored header's block
    pub fn attach_block_data(&mut self, hash: &Hash, tx_hashes: Vec<Hash>, byte_offset: u64) -> bool {
        match self.by_hash.get(hash) {
            Some(&idx) => {
                let entry = &mut self.entries[idx];
                entry.tx_hashes = tx_hashes;
                entry.byte_offset = Some(byte_offset);
                true
            }
            None => false,
        }
    }

    /// Recompute the main chain
    ///
    /// 1. Trace every pending header back to genesis, memoizing cumulative
    ///    difficulty and height
    /// 2. Pick the tip with the greatest cumulative difficulty, ties resolved
    ///    by the configured policy
    /// 3. Rewrite the main-chain view from the branch point upward
    /// 4. Report a reorg if the previous tip left the main chain
    pub fn organize(&mut self) -> OrganizeOutcome {
        let old_top = self.top;

        // 1. Trace pending headers
        let mut newly_linked = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        for idx in pending {
            if self.entries[idx].cumulative_difficulty.is_some() {
                continue;
            }
            self.trace_down(idx, &mut newly_linked);
        }
        let pending: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].cumulative_difficulty.is_none())
            .collect();
        let unlinked: Vec<Hash> = pending.iter().map(|&i| self.entries[i].hash).collect();
        self.pending = pending;
        if !unlinked.is_empty() {
            warn!("{} header(s) have no path to genesis", unlinked.len());
        }

        // 2. Choose the best tip among the old tip and newly linked headers
        let mut best = old_top;
        for &idx in &newly_linked {
            best = Some(match best {
                None => idx,
                Some(current) => self.better_tip(current, idx, old_top),
            });
        }

        let Some(new_top) = best else {
            return OrganizeOutcome {
                unlinked,
                ..Default::default()
            };
        };

        // 3. Walk down from the new tip until reaching the existing main chain
        let mut connected = Vec::new();
        let mut cursor = Some(new_top);
        let mut branch: Option<usize> = None;
        while let Some(idx) = cursor {
            let height = self.entries[idx].height.unwrap_or(0) as usize;
            if self.main_chain.get(height) == Some(&idx) {
                branch = Some(idx);
                break;
            }
            connected.push(idx);
            cursor = self.parent_of(idx);
        }
        connected.reverse();

        let keep = match branch {
            Some(idx) => self.entries[idx].height.unwrap_or(0) as usize + 1,
            None => 0,
        };
        let disconnected: Vec<usize> = self.main_chain.split_off(keep);
        self.main_chain.extend(connected.iter().copied());

        for &idx in &disconnected {
            self.entries[idx].status = ChainStatus::InvalidatedByReorg;
        }
        for &idx in &newly_linked {
            self.entries[idx].status = ChainStatus::Orphan;
        }
        for &idx in &connected {
            self.entries[idx].status = ChainStatus::MainChain;
        }
        self.top = Some(new_top);

        let tip_changed = old_top != Some(new_top);
        if tip_changed {
            info!(
                "new tip {} at height {}",
                hash_hex(&self.entries[new_top].hash),
                self.main_chain.len() - 1
            );
        }

        // 4. Build the reorg report
        let reorg = match (old_top, branch) {
            (Some(old), Some(branch_idx)) if !disconnected.is_empty() => {
                let report = self.reorg_report(old, new_top, branch_idx, &disconnected, &connected);
                info!(
                    "reorg at {}: {} block(s) disconnected, {} connected",
                    hash_hex(&report.branch_point),
                    report.disconnected.len(),
                    report.connected.len()
                );
                Some(report)
            }
            _ => None,
        };

        OrganizeOutcome {
            tip: Some(self.entries[new_top].hash),
            tip_changed,
            reorg,
            unlinked,
        }
    }

    /// Iteratively walk parents until a header with known cumulative
    /// difficulty (or genesis), then fill in the walked path
    fn trace_down(&mut self, start: usize, newly_linked: &mut Vec<usize>) {
        let mut stack = Vec::new();
        let mut cursor = start;
        let anchor = loop {
            if self.entries[cursor].cumulative_difficulty.is_some() {
                break Some(cursor);
            }
            if Some(cursor) == self.genesis {
                let entry = &mut self.entries[cursor];
                entry.cumulative_difficulty = Some(entry.difficulty);
                entry.height = Some(0);
                entry.status = ChainStatus::Linked;
                newly_linked.push(cursor);
                break Some(cursor);
            }
            stack.push(cursor);
            if stack.len() > self.entries.len() {
                break None;
            }
            match self.by_hash.get(&self.entries[cursor].header.prev_block_hash) {
                Some(&parent) => cursor = parent,
                None => break None,
            }
        };

        let Some(mut parent) = anchor else {
            return;
        };
        while let Some(idx) = stack.pop() {
            let parent_cumulative = self.entries[parent].cumulative_difficulty.unwrap_or(0.0);
            let parent_height = self.entries[parent].height.unwrap_or(0);
            let entry = &mut self.entries[idx];
            entry.cumulative_difficulty = Some(parent_cumulative + entry.difficulty);
            entry.height = Some(parent_height + 1);
            entry.status = ChainStatus::Linked;
            newly_linked.push(idx);
            parent = idx;
        }
    }

    fn better_tip(&self, current: usize, candidate: usize, old_top: Option<usize>) -> usize {
        let current_work = self.entries[current].cumulative_difficulty.unwrap_or(0.0);
        let candidate_work = self.entries[candidate].cumulative_difficulty.unwrap_or(0.0);
        if candidate_work > current_work {
            return candidate;
        }
        if candidate_work < current_work {
            return current;
        }
        match self.tie_break {
            TieBreak::PreferCurrent if Some(current) == old_top => current,
            TieBreak::PreferCurrent if Some(candidate) == old_top => candidate,
            // arena order is insertion order
            _ => current.min(candidate),
        }
    }

    fn parent_of(&self, idx: usize) -> Option<usize> {
        if Some(idx) == self.genesis {
            return None;
        }
        self.by_hash
            .get(&self.entries[idx].header.prev_block_hash)
            .copied()
    }

    fn reorg_report(
        &self,
        old_top: usize,
        new_top: usize,
        branch: usize,
        disconnected: &[usize],
        connected: &[usize],
    ) -> ReorgReport {
        let old_txs: HashSet<Hash> = disconnected
            .iter()
            .flat_map(|&i| self.entries[i].tx_hashes.iter().copied())
            .collect();
        let new_txs: HashSet<Hash> = connected
            .iter()
            .flat_map(|&i| self.entries[i].tx_hashes.iter().copied())
            .collect();

        ReorgReport {
            branch_point: self.entries[branch].hash,
            branch_height: self.entries[branch].height.unwrap_or(0),
            old_tip: self.entries[old_top].hash,
            new_tip: self.entries[new_top].hash,
            disconnected: disconnected.iter().map(|&i| self.entries[i].hash).collect(),
            connected: connected.iter().map(|&i| self.entries[i].hash).collect(),
            invalidated: old_txs.difference(&new_txs).copied().collect(),
            affected: new_txs.difference(&old_txs).copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn header_by_hash(&self, hash: &Hash) -> Option<&HeaderEntry> {
        self.by_hash.get(hash).map(|&idx| &self.entries[idx])
    }

    pub fn header_by_height(&self, height: u32) -> Option<&HeaderEntry> {
        self.main_chain
            .get(height as usize)
            .map(|&idx| &self.entries[idx])
    }

    pub fn top(&self) -> Option<&HeaderEntry> {
        self.top.map(|idx| &self.entries[idx])
    }

    pub fn top_height(&self) -> Option<u32> {
        self.main_chain.len().checked_sub(1).map(|h| h as u32)
    }

    pub fn genesis(&self) -> Option<&HeaderEntry> {
        self.genesis.map(|idx| &self.entries[idx])
    }

    /// Main-chain height of a block, if it is on the main chain
    pub fn main_chain_height(&self, hash: &Hash) -> Option<u32> {
        self.header_by_hash(hash)
            .filter(|entry| entry.is_main_chain())
            .and_then(|entry| entry.height)
    }

    /// Main-chain headers with height strictly above `height`, lowest first
    pub fn main_chain_above(&self, height: Option<u32>) -> impl Iterator<Item = &HeaderEntry> {
        let start = height.map(|h| h as usize + 1).unwrap_or(0);
        self.main_chain
            .iter()
            .skip(start)
            .map(move |&idx| &self.entries[idx])
    }

    pub fn headers_not_on_main_chain(&self) -> Vec<&HeaderEntry> {
        self.entries.iter().filter(|e| !e.is_main_chain()).collect()
    }

    pub fn unlinked_headers(&self) -> Vec<&HeaderEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == ChainStatus::Unlinked)
            .collect()
    }

    /// Header hashes whose display hex starts with `prefix`
    pub fn search_prefix(&self, prefix: &str) -> Vec<Hash> {
        let prefix = prefix.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|e| hash_hex(&e.hash).starts_with(&prefix))
            .map(|e| e.hash)
            .collect()
    }
}
