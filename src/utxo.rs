//! Transaction I/O pairing: each output we own, paired with the input that
//! spends it.
//!
//! Both sides of a pair carry a tagged link so confirmed, zero-conf and
//! reorg-invalidated references are never confused. Spent pairs are kept so
//! history survives until an explicit compaction.

use crate::constants::UNCONFIRMED_HEIGHT;
use crate::types::{Addr20, ByteString, Hash, OutPoint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reference to one side of a transaction: its hash, the input or output
/// index, and the height of the block carrying it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef {
    pub tx_hash: Hash,
    pub index: u32,
    pub height: u32,
}

impl TxRef {
    pub fn confirmed(tx_hash: Hash, index: u32, height: u32) -> Self {
        Self { tx_hash, index, height }
    }

    pub fn zero_conf(tx_hash: Hash, index: u32) -> Self {
        Self {
            tx_hash,
            index,
            height: UNCONFIRMED_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxIoLink {
    Confirmed(TxRef),
    ZeroConf(TxRef),
    /// Was confirmed or pending, then dropped by a reorg or a conflict
    Invalidated(TxRef),
}

impl TxIoLink {
    pub fn tx_ref(&self) -> &TxRef {
        match self {
            TxIoLink::Confirmed(r) | TxIoLink::ZeroConf(r) | TxIoLink::Invalidated(r) => r,
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, TxIoLink::Invalidated(_))
    }
}

/// Confirmation thresholds for spendability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendPolicy {
    pub min_confirmations: u32,
    pub coinbase_maturity: u32,
}

/// Balance triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// every unspent output
    pub full: u64,
    pub spendable: u64,
    /// unspent, from others, below the confirmation threshold
    pub unconfirmed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIOPair {
    pub outpoint: OutPoint,
    pub address: Addr20,
    pub value: u64,
    pub script: ByteString,
    pub output: Option<TxIoLink>,
    pub input: Option<TxIoLink>,
    pub from_coinbase: bool,
    /// The creating transaction spent coins of the same wallet
    pub sent_to_self: bool,
}

impl TxIOPair {
    pub fn new(outpoint: OutPoint, address: Addr20, value: u64, script: ByteString) -> Self {
        Self {
            outpoint,
            address,
            value,
            script,
            output: None,
            input: None,
            from_coinbase: false,
            sent_to_self: false,
        }
    }

    /// Attach the creating side; returns whether this is news to the pair
    pub fn set_output(&mut self, link: TxIoLink) -> bool {
        Self::merge_link(&mut self.output, link)
    }

    /// Attach the spending side; returns whether this is news to the pair
    pub fn set_input(&mut self, link: TxIoLink) -> bool {
        Self::merge_link(&mut self.input, link)
    }

    fn merge_link(slot: &mut Option<TxIoLink>, link: TxIoLink) -> bool {
        let replace = match (*slot, link) {
            (None, _) | (Some(TxIoLink::Invalidated(_)), _) => true,
            (Some(TxIoLink::ZeroConf(_)), TxIoLink::Confirmed(_)) => true,
            (Some(TxIoLink::Confirmed(current)), TxIoLink::Confirmed(new)) => {
                if current.tx_hash == new.tx_hash {
                    // same transaction, possibly re-dated
                    *slot = Some(link);
                    return false;
                }
                true
            }
            (Some(TxIoLink::ZeroConf(current)), TxIoLink::ZeroConf(new)) => {
                current.tx_hash != new.tx_hash
            }
            // a confirmed side is never downgraded
            (Some(TxIoLink::Confirmed(_)), _) => false,
            (Some(TxIoLink::ZeroConf(_)), TxIoLink::Invalidated(_)) => true,
        };
        if replace {
            *slot = Some(link);
        }
        replace
    }

    pub fn has_live_output(&self) -> bool {
        self.output.map_or(false, |l| l.is_live())
    }

    pub fn is_spent(&self) -> bool {
        self.input.map_or(false, |l| l.is_live())
    }

    pub fn is_spent_confirmed(&self) -> bool {
        matches!(self.input, Some(TxIoLink::Confirmed(_)))
    }

    pub fn is_unspent(&self) -> bool {
        self.has_live_output() && !self.is_spent()
    }

    pub fn is_zero_conf_output(&self) -> bool {
        matches!(self.output, Some(TxIoLink::ZeroConf(_)))
    }

    /// Confirmations of the creating transaction, 0 while pending
    pub fn confirmations(&self, top_height: Option<u32>) -> u32 {
        match (self.output, top_height) {
            (Some(TxIoLink::Confirmed(r)), Some(top)) if top >= r.height => top - r.height + 1,
            _ => 0,
        }
    }

    pub fn height(&self) -> u32 {
        match self.output {
            Some(TxIoLink::Confirmed(r)) => r.height,
            _ => UNCONFIRMED_HEIGHT,
        }
    }

    fn meets_threshold(&self, top_height: Option<u32>, policy: &SpendPolicy) -> bool {
        let required = if self.from_coinbase {
            policy.coinbase_maturity
        } else {
            policy.min_confirmations
        };
        matches!(self.output, Some(TxIoLink::Confirmed(_)))
            && self.confirmations(top_height) >= required
    }

    pub fn is_spendable(&self, top_height: Option<u32>, policy: &SpendPolicy) -> bool {
        self.is_unspent() && (self.sent_to_self || self.meets_threshold(top_height, policy))
    }

    pub fn is_unconfirmed(&self, top_height: Option<u32>, policy: &SpendPolicy) -> bool {
        self.is_unspent() && !self.sent_to_self && !self.meets_threshold(top_height, policy)
    }
}

/// Outcome of offering an input to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputMatch {
    pub address: Addr20,
    pub value: u64,
    pub is_new: bool,
}

/// OutPoint → TxIOPair for one wallet
#[derive(Debug, Clone, Default)]
pub struct UtxoLedger {
    pairs: BTreeMap<OutPoint, TxIOPair>,
}

impl UtxoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxIOPair> {
        self.pairs.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.pairs.contains_key(outpoint)
    }

    pub fn pairs(&self) -> impl Iterator<Item = &TxIOPair> {
        self.pairs.values()
    }

    /// Record one of our outputs; returns whether it is new information
    pub fn scan_output(
        &mut self,
        outpoint: OutPoint,
        address: Addr20,
        value: u64,
        script: &[u8],
        link: TxIoLink,
        from_coinbase: bool,
        sent_to_self: bool,
    ) -> bool {
        let pair = self
            .pairs
            .entry(outpoint)
            .or_insert_with(|| TxIOPair::new(outpoint, address, value, script.to_vec()));
        let is_new = pair.set_output(link);
        if is_new {
            pair.from_coinbase = from_coinbase;
            pair.sent_to_self = sent_to_self;
        }
        is_new
    }

    /// Offer an input; `None` when it does not spend one of our live outputs
    pub fn scan_input(&mut self, outpoint: &OutPoint, link: TxIoLink) -> Option<InputMatch> {
        let pair = self.pairs.get_mut(outpoint).filter(|p| p.has_live_output())?;
        let is_new = pair.set_input(link);
        Some(InputMatch {
            address: pair.address,
            value: pair.value,
            is_new,
        })
    }

    pub fn balance(&self, top_height: Option<u32>, policy: &SpendPolicy) -> Balance {
        Self::balance_of(self.pairs.values(), top_height, policy)
    }

    pub fn address_balance(&self, address: &Addr20, top_height: Option<u32>, policy: &SpendPolicy) -> Balance {
        Self::balance_of(
            self.pairs.values().filter(|p| &p.address == address),
            top_height,
            policy,
        )
    }

    fn balance_of<'a>(
        pairs: impl Iterator<Item = &'a TxIOPair>,
        top_height: Option<u32>,
        policy: &SpendPolicy,
    ) -> Balance {
        let mut balance = Balance::default();
        for pair in pairs.filter(|p| p.is_unspent()) {
            balance.full += pair.value;
            if pair.is_spendable(top_height, policy) {
                balance.spendable += pair.value;
            } else if pair.is_unconfirmed(top_height, policy) {
                balance.unconfirmed += pair.value;
            }
        }
        balance
    }

    /// Mark every link to an abandoned transaction invalid and re-date the
    /// surviving confirmed links with `height_of`
    pub fn repair_after_reorg<F>(&mut self, invalidated: &BTreeSet<Hash>, height_of: F)
    where
        F: Fn(&Hash) -> Option<u32>,
    {
        for pair in self.pairs.values_mut() {
            for slot in [&mut pair.output, &mut pair.input] {
                if let Some(TxIoLink::Confirmed(r)) = *slot {
                    if invalidated.contains(&r.tx_hash) {
                        *slot = Some(TxIoLink::Invalidated(r));
                    } else if let Some(height) = height_of(&r.tx_hash) {
                        *slot = Some(TxIoLink::Confirmed(TxRef { height, ..r }));
                    }
                }
            }
        }
    }

    /// Forget every pending link: pairs created by a pending output are
    /// removed and pending spends of confirmed outputs are cleared
    pub fn clear_zero_conf(&mut self) {
        self.pairs.retain(|_, pair| !pair.is_zero_conf_output());
        for pair in self.pairs.values_mut() {
            if matches!(pair.input, Some(TxIoLink::ZeroConf(_))) {
                pair.input = None;
            }
        }
    }

    /// Drop pending links coming from the given transactions
    pub fn invalidate_zero_conf(&mut self, tx_hashes: &BTreeSet<Hash>) {
        for pair in self.pairs.values_mut() {
            for slot in [&mut pair.output, &mut pair.input] {
                if let Some(TxIoLink::ZeroConf(r)) = *slot {
                    if tx_hashes.contains(&r.tx_hash) {
                        *slot = Some(TxIoLink::Invalidated(r));
                    }
                }
            }
        }
    }

    /// Remove pairs whose output was invalidated and clear invalidated inputs
    pub fn compact(&mut self) -> usize {
        let before = self.pairs.len();
        self.pairs
            .retain(|_, pair| pair.output.map_or(false, |l| l.is_live()));
        for pair in self.pairs.values_mut() {
            if matches!(pair.input, Some(TxIoLink::Invalidated(_))) {
                pair.input = None;
            }
        }
        before - self.pairs.len()
    }
}
