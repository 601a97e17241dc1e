//! Wallet view: per-address and per-wallet ledgers built by scanning
//! transactions for outputs paying, and inputs spending from, tracked
//! addresses.

use crate::constants::UNCONFIRMED_HEIGHT;
use crate::script::output_recipient;
use crate::transaction::is_coinbase;
use crate::tx_index::TxLocation;
use crate::types::{hash_hex, Addr20, ByteString, Hash, OutPoint, Transaction};
use crate::utxo::{Balance, SpendPolicy, TxIoLink, TxRef, UtxoLedger};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Index of a wallet registered with the engine
pub type WalletId = usize;

/// One balance-affecting event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// `None` on wallet-level entries
    pub address: Option<Addr20>,
    /// Signed satoshi delta
    pub value: i64,
    pub block_height: u32,
    pub tx_hash: Hash,
    /// Position of the transaction in its block, or arrival order while pending
    pub index: u32,
    pub tx_time: u32,
    pub valid: bool,
    pub sent_to_self: bool,
    pub change_back: bool,
}

impl LedgerEntry {
    pub fn is_zero_conf(&self) -> bool {
        self.block_height == UNCONFIRMED_HEIGHT
    }
}

/// Order a ledger by (block height, position in block)
pub fn sort_ledger(ledger: &mut [LedgerEntry]) {
    ledger.sort_by_key(|e| (e.block_height, e.index));
}

/// Where a transaction being scanned comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxContext {
    pub tx_hash: Hash,
    pub index: u32,
    pub height: u32,
    pub time: u32,
    pub zero_conf: bool,
}

impl TxContext {
    pub fn confirmed(tx_hash: Hash, index: u32, height: u32, time: u32) -> Self {
        Self {
            tx_hash,
            index,
            height,
            time,
            zero_conf: false,
        }
    }

    pub fn zero_conf(tx_hash: Hash, arrival_seq: u32, arrival_time: u32) -> Self {
        Self {
            tx_hash,
            index: arrival_seq,
            height: UNCONFIRMED_HEIGHT,
            time: arrival_time,
            zero_conf: true,
        }
    }

    fn link(&self, io_index: u32) -> TxIoLink {
        if self.zero_conf {
            TxIoLink::ZeroConf(TxRef::zero_conf(self.tx_hash, io_index))
        } else {
            TxIoLink::Confirmed(TxRef::confirmed(self.tx_hash, io_index, self.height))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// The transaction changed the wallet's state
    pub relevant: bool,
    /// Inputs whose previous output is neither ours nor indexed
    pub unresolved: usize,
}

/// Read-only view of one unspent output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnspentTxOut {
    pub tx_hash: Hash,
    pub index: u32,
    pub height: u32,
    pub value: u64,
    pub script: ByteString,
    pub confirmations: u32,
}

impl UnspentTxOut {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_hash, self.index)
    }
}

/// Scoring applied before sorting unspent outputs for coin selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionStrategy {
    #[default]
    Naive,
    CubeRoot,
    LogPow5,
    LogPow4,
}

impl SelectionStrategy {
    /// f(value) × confirmations
    pub fn score(&self, value: u64, confirmations: u32) -> f64 {
        if value == 0 {
            return 0.0;
        }
        let value = value as f64;
        let weight = match self {
            SelectionStrategy::Naive => value,
            SelectionStrategy::CubeRoot => value.cbrt(),
            SelectionStrategy::LogPow5 => (value.log10() + 5.0).powi(5),
            SelectionStrategy::LogPow4 => (value.log10() + 5.0).powi(4),
        };
        weight * confirmations as f64
    }
}

/// Sort ascending by strategy score
pub fn sort_unspent(outputs: &mut [UnspentTxOut], strategy: SelectionStrategy) {
    outputs.sort_by(|a, b| {
        strategy
            .score(a.value, a.confirmations)
            .total_cmp(&strategy.score(b.value, b.confirmations))
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcAddress {
    pub addr: Addr20,
    pub first_block: Option<u32>,
    pub last_block: Option<u32>,
    pub first_timestamp: Option<u32>,
    pub last_timestamp: Option<u32>,
    /// Outpoints of the pairs this address owns
    pub txio_keys: Vec<OutPoint>,
    ledger: Vec<LedgerEntry>,
    zero_conf_ledger: Vec<LedgerEntry>,
}

impl BtcAddress {
    pub fn new(addr: Addr20) -> Self {
        Self {
            addr,
            first_block: None,
            last_block: None,
            first_timestamp: None,
            last_timestamp: None,
            txio_keys: Vec::new(),
            ledger: Vec::new(),
            zero_conf_ledger: Vec::new(),
        }
    }

    pub fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    pub fn zero_conf_ledger(&self) -> &[LedgerEntry] {
        &self.zero_conf_ledger
    }

    fn touch(&mut self, height: u32, time: u32) {
        self.first_block = Some(self.first_block.map_or(height, |h| h.min(height)));
        self.last_block = Some(self.last_block.map_or(height, |h| h.max(height)));
        self.first_timestamp = Some(self.first_timestamp.map_or(time, |t| t.min(time)));
        self.last_timestamp = Some(self.last_timestamp.map_or(time, |t| t.max(time)));
    }

    fn add_entry(&mut self, entry: LedgerEntry) {
        if entry.is_zero_conf() {
            self.zero_conf_ledger.push(entry);
        } else {
            self.ledger.push(entry);
        }
    }

    pub fn remove_invalid_entries(&mut self) -> usize {
        let before = self.ledger.len() + self.zero_conf_ledger.len();
        self.ledger.retain(|e| e.valid);
        self.zero_conf_ledger.retain(|e| e.valid);
        before - self.ledger.len() - self.zero_conf_ledger.len()
    }

    fn reset(&mut self) {
        *self = BtcAddress::new(self.addr);
    }
}

#[derive(Debug, Clone, Default)]
pub struct BtcWallet {
    addresses: BTreeMap<Addr20, BtcAddress>,
    ledger: Vec<LedgerEntry>,
    zero_conf_ledger: Vec<LedgerEntry>,
    utxos: UtxoLedger,
    /// Pending transactions already folded into this wallet
    scanned_zero_conf: HashSet<Hash>,
}

impl BtcWallet {
    pub fn new<I: IntoIterator<Item = Addr20>>(addresses: I) -> Self {
        let mut wallet = Self::default();
        for addr in addresses {
            wallet.add_address(addr);
        }
        wallet
    }

    /// Track another address; returns false if it was already tracked
    pub fn add_address(&mut self, addr: Addr20) -> bool {
        if self.addresses.contains_key(&addr) {
            return false;
        }
        self.addresses.insert(addr, BtcAddress::new(addr));
        true
    }

    pub fn has_address(&self, addr: &Addr20) -> bool {
        self.addresses.contains_key(addr)
    }

    pub fn address(&self, addr: &Addr20) -> Option<&BtcAddress> {
        self.addresses.get(addr)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &BtcAddress> {
        self.addresses.values()
    }

    pub fn utxos(&self) -> &UtxoLedger {
        &self.utxos
    }

    pub fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    pub fn zero_conf_ledger(&self) -> &[LedgerEntry] {
        &self.zero_conf_ledger
    }

    pub fn has_scanned_zero_conf(&self, tx_hash: &Hash) -> bool {
        self.scanned_zero_conf.contains(tx_hash)
    }

    pub fn is_outpoint_mine(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains(outpoint)
    }

    /// Forget everything learned from scanning; addresses are kept
    pub fn reset_scan_state(&mut self) {
        for address in self.addresses.values_mut() {
            address.reset();
        }
        self.ledger.clear();
        self.zero_conf_ledger.clear();
        self.utxos = UtxoLedger::new();
        self.scanned_zero_conf.clear();
    }

    /// Fold one transaction into the wallet
    ///
    /// 1. Inputs spending one of our pairs become debits
    /// 2. Outputs paying a tracked address become credits
    /// 3. A wallet-level entry is added when either step found something new,
    ///    flagged as sent-to-self when every output came back to us, or as
    ///    change-back when only some did
    ///
    /// `is_known` tells whether an outpoint that is not ours lies inside the
    /// indexed range; inputs failing it are reported as unresolved.
    pub fn scan_transaction<F>(&mut self, tx: &Transaction, ctx: &TxContext, is_known: F) -> ScanReport
    where
        F: Fn(&OutPoint) -> bool,
    {
        let mut report = ScanReport::default();
        let coinbase = is_coinbase(tx);
        let mut any_in = false;
        let mut any_out = false;
        let mut all_out = !tx.outputs.is_empty();
        let mut any_new = false;
        let mut delta: i64 = 0;
        let mut events: Vec<(Addr20, i64)> = Vec::new();

        // 1. Inputs
        if !coinbase {
            for (i, input) in tx.inputs.iter().enumerate() {
                match self.utxos.scan_input(&input.prevout, ctx.link(i as u32)) {
                    Some(found) => {
                        any_in = true;
                        if found.is_new {
                            any_new = true;
                            delta -= found.value as i64;
                            events.push((found.address, -(found.value as i64)));
                        }
                    }
                    None => {
                        if !is_known(&input.prevout) {
                            report.unresolved += 1;
                            debug!("unresolved outpoint {} in {}", input.prevout, hash_hex(&ctx.tx_hash));
                        }
                    }
                }
            }
        }

        // 2. Outputs
        for (i, output) in tx.outputs.iter().enumerate() {
            let recipient = output_recipient(&output.script_pubkey)
                .filter(|addr| self.addresses.contains_key(addr));
            let Some(addr) = recipient else {
                all_out = false;
                continue;
            };
            any_out = true;
            let outpoint = OutPoint::new(ctx.tx_hash, i as u32);
            let is_new = self.utxos.scan_output(
                outpoint,
                addr,
                output.value,
                &output.script_pubkey,
                ctx.link(i as u32),
                coinbase,
                any_in,
            );
            if is_new {
                any_new = true;
                delta += output.value as i64;
                events.push((addr, output.value as i64));
                if let Some(address) = self.addresses.get_mut(&addr) {
                    if !address.txio_keys.contains(&outpoint) {
                        address.txio_keys.push(outpoint);
                    }
                }
            }
        }

        if !any_new {
            return report;
        }

        // 3. Ledger entries
        let sent_to_self = any_in && all_out;
        let change_back = any_in && any_out && !sent_to_self;
        let entry = |address: Option<Addr20>, value: i64| LedgerEntry {
            address,
            value,
            block_height: ctx.height,
            tx_hash: ctx.tx_hash,
            index: ctx.index,
            tx_time: ctx.time,
            valid: true,
            sent_to_self,
            change_back,
        };

        for (addr, value) in events {
            if let Some(address) = self.addresses.get_mut(&addr) {
                if !ctx.zero_conf {
                    address.touch(ctx.height, ctx.time);
                }
                address.add_entry(entry(Some(addr), value));
            }
        }
        if ctx.zero_conf {
            self.zero_conf_ledger.push(entry(None, delta));
            self.scanned_zero_conf.insert(ctx.tx_hash);
        } else {
            self.ledger.push(entry(None, delta));
        }

        report.relevant = true;
        report
    }

    /// Apply a reorg: entries and links of abandoned transactions are
    /// invalidated, surviving confirmed ones are re-dated from `locate`
    pub fn repair_after_reorg<F>(&mut self, invalidated: &BTreeSet<Hash>, locate: F)
    where
        F: Fn(&Hash) -> Option<TxLocation>,
    {
        self.utxos
            .repair_after_reorg(invalidated, |hash| locate(hash).map(|loc| loc.height));

        let repair = |ledger: &mut Vec<LedgerEntry>| {
            for entry in ledger.iter_mut() {
                if invalidated.contains(&entry.tx_hash) {
                    entry.valid = false;
                } else if entry.valid {
                    if let Some(loc) = locate(&entry.tx_hash) {
                        entry.block_height = loc.height;
                        entry.index = loc.index;
                    }
                }
            }
            sort_ledger(ledger);
        };
        repair(&mut self.ledger);
        for address in self.addresses.values_mut() {
            repair(&mut address.ledger);
        }
    }

    /// Pending transactions that made it into a block: their provisional
    /// entries are superseded by the confirmed scan
    pub fn drop_zero_conf(&mut self, tx_hashes: &BTreeSet<Hash>) {
        self.zero_conf_ledger.retain(|e| !tx_hashes.contains(&e.tx_hash));
        for address in self.addresses.values_mut() {
            address
                .zero_conf_ledger
                .retain(|e| !tx_hashes.contains(&e.tx_hash));
        }
        self.scanned_zero_conf.retain(|h| !tx_hashes.contains(h));
    }

    /// Pending transactions that conflict with the chain: their links and
    /// entries are invalidated
    pub fn invalidate_zero_conf(&mut self, tx_hashes: &BTreeSet<Hash>) {
        self.utxos.invalidate_zero_conf(tx_hashes);
        let mark = |ledger: &mut Vec<LedgerEntry>| {
            for entry in ledger.iter_mut().filter(|e| tx_hashes.contains(&e.tx_hash)) {
                entry.valid = false;
            }
        };
        mark(&mut self.zero_conf_ledger);
        for address in self.addresses.values_mut() {
            mark(&mut address.zero_conf_ledger);
        }
        self.scanned_zero_conf.retain(|h| !tx_hashes.contains(h));
    }

    /// Forget the pending plane so the pool can be scanned again; entries
    /// already invalidated stay until compaction
    pub fn clear_zero_conf(&mut self) {
        self.utxos.clear_zero_conf();
        self.zero_conf_ledger.retain(|e| !e.valid);
        let utxos = &self.utxos;
        for address in self.addresses.values_mut() {
            address.zero_conf_ledger.retain(|e| !e.valid);
            address.txio_keys.retain(|op| utxos.contains(op));
        }
        self.scanned_zero_conf.clear();
    }

    /// Physically remove invalidated ledger entries and pairs
    pub fn remove_invalid_entries(&mut self) -> usize {
        let before = self.ledger.len() + self.zero_conf_ledger.len();
        self.ledger.retain(|e| e.valid);
        self.zero_conf_ledger.retain(|e| e.valid);
        let mut removed = before - self.ledger.len() - self.zero_conf_ledger.len();
        for address in self.addresses.values_mut() {
            removed += address.remove_invalid_entries();
            let utxos = &self.utxos;
            address.txio_keys.retain(|op| {
                utxos.get(op).map_or(false, |p| p.has_live_output())
            });
        }
        removed + self.utxos.compact()
    }

    pub fn sort_ledgers(&mut self) {
        sort_ledger(&mut self.ledger);
        sort_ledger(&mut self.zero_conf_ledger);
        for address in self.addresses.values_mut() {
            sort_ledger(&mut address.ledger);
            sort_ledger(&mut address.zero_conf_ledger);
        }
    }

    pub fn balance(&self, top_height: Option<u32>, policy: &SpendPolicy) -> Balance {
        self.utxos.balance(top_height, policy)
    }

    pub fn address_balance(&self, addr: &Addr20, top_height: Option<u32>, policy: &SpendPolicy) -> Balance {
        self.utxos.address_balance(addr, top_height, policy)
    }

    /// Unspent outputs with at least `min_confirmations`; coinbase outputs
    /// must also be mature. `addr` narrows to one address.
    pub fn unspent(
        &self,
        addr: Option<&Addr20>,
        top_height: Option<u32>,
        min_confirmations: u32,
        policy: &SpendPolicy,
    ) -> Vec<UnspentTxOut> {
        self.utxos
            .pairs()
            .filter(|p| p.is_unspent())
            .filter(|p| addr.map_or(true, |a| &p.address == a))
            .filter_map(|p| {
                let confirmations = p.confirmations(top_height);
                let required = if p.from_coinbase {
                    min_confirmations.max(policy.coinbase_maturity)
                } else {
                    min_confirmations
                };
                (confirmations >= required).then(|| UnspentTxOut {
                    tx_hash: p.outpoint.hash,
                    index: p.outpoint.index,
                    height: p.height(),
                    value: p.value,
                    script: p.script.clone(),
                    confirmations,
                })
            })
            .collect()
    }
}
