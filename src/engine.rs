//! Chain engine: owns the header chain, transaction index, wallets and the
//! zero-conf pool, and drives block ingestion through them.

use crate::chain::{HeaderChain, HeaderInsert, ReorgReport};
use crate::codec::parse;
use crate::config::EngineConfig;
use crate::difficulty::check_proof_of_work;
use crate::error::{ChainError, Result};
use crate::mempool::{AdmitOutcome, PurgeReport, ZeroConfPool};
use crate::source::{BlockSource, FramedBlockSource};
use crate::transaction::{block_merkle_root, is_final, total_output_value};
use crate::tx_index::{TxIndex, TxPlacement};
use crate::types::{hash_hex, Addr20, Block, Hash, OutPoint};
use crate::utxo::{Balance, SpendPolicy};
use crate::wallet::{
    sort_ledger, sort_unspent, BtcWallet, LedgerEntry, SelectionStrategy, TxContext, UnspentTxOut,
    WalletId,
};
use log::{debug, info, warn};
use std::io::Read;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// What ingesting one block did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockAddResult {
    pub accepted: bool,
    /// The ingested block is now the main-chain tip
    pub became_new_tip: bool,
    pub caused_reorg: bool,
    pub reorg: Option<ReorgReport>,
    /// Inputs scanned into wallets whose previous output was never indexed
    pub unresolved: usize,
}

/// Totals for a batch pulled from a [`BlockSource`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub blocks: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub reorgs: usize,
}

/// Target of a balance, ledger or unspent query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Wallet(WalletId),
    Address(Addr20),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxConfirmation {
    NotFound,
    /// Indexed, but only in blocks off the main chain
    OffMainChain,
    ZeroConf,
    Confirmed(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixMatches {
    pub blocks: Vec<Hash>,
    pub transactions: Vec<Hash>,
}

pub struct ChainEngine {
    config: EngineConfig,
    chain: HeaderChain,
    tx_index: TxIndex,
    wallets: Vec<BtcWallet>,
    pool: ZeroConfPool,
    /// Highest main-chain height folded into the wallets
    scanned_height: Option<u32>,
}

impl ChainEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chain: HeaderChain::new(config.genesis_hash, config.tie_break),
            config,
            tx_index: TxIndex::new(),
            wallets: Vec::new(),
            pool: ZeroConfPool::new(),
            scanned_height: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn chain(&self) -> &HeaderChain {
        &self.chain
    }

    pub fn tx_index(&self) -> &TxIndex {
        &self.tx_index
    }

    pub fn zero_conf_pool(&self) -> &ZeroConfPool {
        &self.pool
    }

    pub fn wallet(&self, id: WalletId) -> Result<&BtcWallet> {
        self.wallets.get(id).ok_or(ChainError::UnknownWallet(id))
    }

    fn policy(&self) -> SpendPolicy {
        SpendPolicy {
            min_confirmations: self.config.min_confirmations,
            coinbase_maturity: self.config.coinbase_maturity,
        }
    }

    /// IngestBlock: raw bytes × offset → result
    ///
    /// 1. Parse and verify the block; malformed blocks are rejected
    /// 2. Store the header and index its transactions
    /// 3. Organize the chain
    /// 4. On a reorg, repair every wallet before rescanning
    /// 5. Purge the zero-conf pool against the new main chain
    /// 6. When the tip moved, clear every wallet's pending plane
    /// 7. Scan new main-chain blocks, then the pool, into wallets
    pub fn ingest_block(&mut self, raw: &[u8], offset: u64) -> Result<BlockAddResult> {
        // 1. Parse and verify
        let block = match self.parse_block(raw) {
            Ok(block) => block,
            Err(e) => {
                warn!("rejected block at offset {}: {}", offset, e);
                return Err(e);
            }
        };
        let hash = block.header.hash();
        if self.chain.contains(&hash) {
            debug!("block {} already known", hash_hex(&hash));
            return Ok(BlockAddResult::default());
        }

        // 2. Store
        let Block {
            header,
            transactions,
        } = block;
        if self.chain.insert_header(header) == HeaderInsert::Unlinked {
            debug!("block {} arrived before its parent", hash_hex(&hash));
        }
        let mut tx_hashes = Vec::with_capacity(transactions.len());
        for (i, tx) in transactions.into_iter().enumerate() {
            let placement = TxPlacement {
                block_hash: hash,
                index: i as u32,
            };
            tx_hashes.push(self.tx_index.insert(tx, placement));
        }
        self.chain.attach_block_data(&hash, tx_hashes, offset);

        // 3. Organize
        let outcome = self.chain.organize();

        // 4. Repair
        if let Some(reorg) = &outcome.reorg {
            let (chain, tx_index) = (&self.chain, &self.tx_index);
            for wallet in &mut self.wallets {
                wallet.repair_after_reorg(&reorg.invalidated, |h| {
                    tx_index.main_chain_location(h, chain)
                });
            }
            self.scanned_height = Some(reorg.branch_height);
        }

        // 5. Purge
        self.purge_pool();

        // 6. Clear pending state built on the old tip
        if outcome.tip_changed {
            for wallet in &mut self.wallets {
                wallet.clear_zero_conf();
            }
        }

        // 7. Scan
        let unresolved = Self::scan_main_chain(
            &self.chain,
            &self.tx_index,
            &mut self.wallets,
            self.scanned_height,
        );
        self.scanned_height = self.chain.top_height();
        Self::scan_zero_conf(&self.chain, &self.tx_index, &self.pool, &mut self.wallets);

        Ok(BlockAddResult {
            accepted: true,
            became_new_tip: outcome.tip == Some(hash),
            caused_reorg: outcome.reorg.is_some(),
            reorg: outcome.reorg,
            unresolved,
        })
    }

    fn parse_block(&self, raw: &[u8]) -> Result<Block> {
        let (block, consumed) = parse::<Block>(raw, 0)?;
        if consumed != raw.len() {
            return Err(ChainError::MalformedData(format!(
                "{} trailing bytes after block",
                raw.len() - consumed
            )));
        }
        if let Some(tx) = block.transactions.iter().find(|tx| total_output_value(tx).is_none()) {
            return Err(ChainError::MalformedData(format!(
                "output values of {} exceed the money supply",
                hash_hex(&tx.txid())
            )));
        }
        if self.config.verify_merkle_root && block_merkle_root(&block)? != block.header.merkle_root {
            return Err(ChainError::MalformedData(format!(
                "merkle root mismatch in block {}",
                hash_hex(&block.header.hash())
            )));
        }
        if self.config.verify_proof_of_work && !check_proof_of_work(&block.header)? {
            return Err(ChainError::MalformedData(format!(
                "block {} does not meet its target",
                hash_hex(&block.header.hash())
            )));
        }
        Ok(block)
    }

    /// Fold main-chain blocks above `from` into `wallets`
    fn scan_main_chain(
        chain: &HeaderChain,
        tx_index: &TxIndex,
        wallets: &mut [BtcWallet],
        from: Option<u32>,
    ) -> usize {
        if wallets.is_empty() {
            return 0;
        }
        let is_known = |op: &OutPoint| tx_index.resolve_outpoint(op).is_some();
        let mut unresolved = 0;
        for entry in chain.main_chain_above(from) {
            let height = entry.height.unwrap_or(0);
            for (i, tx_hash) in entry.tx_hashes.iter().enumerate() {
                let Some(indexed) = tx_index.by_hash(tx_hash) else {
                    continue;
                };
                let ctx = TxContext::confirmed(*tx_hash, i as u32, height, entry.header.timestamp);
                // every wallet sees the same unknown outpoints
                let mut missing = 0;
                for wallet in wallets.iter_mut() {
                    let report = wallet.scan_transaction(&indexed.tx, &ctx, is_known);
                    missing = missing.max(report.unresolved);
                }
                unresolved += missing;
            }
        }
        unresolved
    }

    /// Purge the pool, then fold the remaining final entries into wallets
    /// that have not seen them
    fn refresh_zero_conf(&mut self) -> PurgeReport {
        let report = self.purge_pool();
        Self::scan_zero_conf(&self.chain, &self.tx_index, &self.pool, &mut self.wallets);
        report
    }

    /// Drop pool entries the main chain confirmed or contradicted
    fn purge_pool(&mut self) -> PurgeReport {
        let (chain, tx_index) = (&self.chain, &self.tx_index);
        let report = self.pool.purge(
            |h| tx_index.main_chain_location(h, chain).is_some(),
            |op| {
                tx_index
                    .spenders_of(op)
                    .iter()
                    .find(|h| tx_index.main_chain_location(h, chain).is_some())
                    .copied()
            },
        );
        if !report.is_empty() {
            for wallet in &mut self.wallets {
                wallet.drop_zero_conf(&report.superseded);
                wallet.invalidate_zero_conf(&report.conflicted);
            }
        }
        report
    }

    fn scan_zero_conf(chain: &HeaderChain, tx_index: &TxIndex, pool: &ZeroConfPool, wallets: &mut [BtcWallet]) {
        let next_height = chain.top_height().map_or(0, |h| h + 1);
        let top_time = chain.top().map_or(0, |e| e.header.timestamp);
        let is_known = |op: &OutPoint| {
            tx_index.resolve_outpoint(op).is_some() || pool.resolve_outpoint(op).is_some()
        };
        for entry in pool.iter() {
            if !is_final(&entry.tx, next_height, top_time) {
                debug!("zero-conf tx {} not final yet", hash_hex(&entry.txid));
                continue;
            }
            let ctx = TxContext::zero_conf(entry.txid, entry.seq, entry.arrival_time);
            for wallet in wallets.iter_mut() {
                if !wallet.has_scanned_zero_conf(&entry.txid) {
                    wallet.scan_transaction(&entry.tx, &ctx, is_known);
                }
            }
        }
    }

    /// AdmitZeroConf: parse, pool and scan an unconfirmed transaction
    ///
    /// A transaction spending an outpoint the main chain already spent is
    /// reported as `Conflicted` and not kept.
    pub fn admit_zero_conf(&mut self, raw: &[u8], arrival_time: u32) -> Result<AdmitOutcome> {
        if !self.config.zero_conf_enabled {
            return Err(ChainError::ZeroConfDisabled);
        }
        let (chain, tx_index) = (&self.chain, &self.tx_index);
        let outcome = self
            .pool
            .admit(raw, arrival_time, |h| tx_index.main_chain_location(h, chain).is_some())?;
        let AdmitOutcome::Admitted(txid) = outcome else {
            return Ok(outcome);
        };
        let report = self.refresh_zero_conf();
        if report.conflicted.contains(&txid) {
            return Ok(AdmitOutcome::Conflicted(txid));
        }
        Ok(outcome)
    }

    /// Run the zero-conf purge on demand
    pub fn purge_zero_conf(&mut self) -> Result<PurgeReport> {
        if !self.config.zero_conf_enabled {
            return Err(ChainError::ZeroConfDisabled);
        }
        Ok(self.refresh_zero_conf())
    }

    /// Register a wallet and scan the existing main chain and pool into it
    pub fn add_wallet<I: IntoIterator<Item = Addr20>>(&mut self, addresses: I) -> WalletId {
        let id = self.wallets.len();
        self.wallets.push(BtcWallet::new(addresses));
        self.rescan_wallet(id);
        info!("registered wallet {}", id);
        id
    }

    /// Track another address in a wallet; the wallet is rescanned from genesis
    pub fn add_address(&mut self, id: WalletId, addr: Addr20) -> Result<bool> {
        let wallet = self.wallets.get_mut(id).ok_or(ChainError::UnknownWallet(id))?;
        if !wallet.add_address(addr) {
            return Ok(false);
        }
        self.rescan_wallet(id);
        Ok(true)
    }

    fn rescan_wallet(&mut self, id: WalletId) {
        let Some(wallet) = self.wallets.get_mut(id) else {
            return;
        };
        wallet.reset_scan_state();
        let wallets = std::slice::from_mut(wallet);
        let unresolved = Self::scan_main_chain(&self.chain, &self.tx_index, wallets, None);
        if unresolved > 0 {
            debug!("wallet {} rescan left {} outpoints unresolved", id, unresolved);
        }
        Self::scan_zero_conf(&self.chain, &self.tx_index, &self.pool, wallets);
    }

    fn top_height(&self) -> Option<u32> {
        self.chain.top_height()
    }

    pub fn query_balance(&self, scope: Scope) -> Result<Balance> {
        let policy = self.policy();
        let top = self.top_height();
        match scope {
            Scope::Wallet(id) => Ok(self.wallet(id)?.balance(top, &policy)),
            Scope::Address(addr) => Ok(self
                .wallet_tracking(&addr)
                .map(|w| w.address_balance(&addr, top, &policy))
                .unwrap_or_default()),
        }
    }

    /// Valid ledger entries, confirmed first, each part ordered by
    /// (height, position)
    pub fn query_ledger(&self, scope: Scope) -> Result<Vec<LedgerEntry>> {
        let (confirmed, pending) = match scope {
            Scope::Wallet(id) => {
                let wallet = self.wallet(id)?;
                (wallet.ledger(), wallet.zero_conf_ledger())
            }
            Scope::Address(addr) => match self.wallet_tracking(&addr).and_then(|w| w.address(&addr)) {
                Some(address) => (address.ledger(), address.zero_conf_ledger()),
                None => return Ok(Vec::new()),
            },
        };
        let mut confirmed: Vec<LedgerEntry> = confirmed.iter().filter(|e| e.valid).cloned().collect();
        let mut pending: Vec<LedgerEntry> = pending.iter().filter(|e| e.valid).cloned().collect();
        sort_ledger(&mut confirmed);
        sort_ledger(&mut pending);
        confirmed.extend(pending);
        Ok(confirmed)
    }

    pub fn query_unspent(&self, scope: Scope, min_confirmations: u32) -> Result<Vec<UnspentTxOut>> {
        let policy = self.policy();
        let top = self.top_height();
        match scope {
            Scope::Wallet(id) => Ok(self.wallet(id)?.unspent(None, top, min_confirmations, &policy)),
            Scope::Address(addr) => Ok(self
                .wallet_tracking(&addr)
                .map(|w| w.unspent(Some(&addr), top, min_confirmations, &policy))
                .unwrap_or_default()),
        }
    }

    /// Unspent outputs ordered for coin selection
    pub fn query_unspent_sorted(
        &self,
        scope: Scope,
        min_confirmations: u32,
        strategy: SelectionStrategy,
    ) -> Result<Vec<UnspentTxOut>> {
        let mut outputs = self.query_unspent(scope, min_confirmations)?;
        sort_unspent(&mut outputs, strategy);
        Ok(outputs)
    }

    fn wallet_tracking(&self, addr: &Addr20) -> Option<&BtcWallet> {
        self.wallets.iter().find(|w| w.has_address(addr))
    }

    /// Confirmation count of a transaction, 1 meaning "in the tip block"
    pub fn confirmations(&self, tx_hash: &Hash) -> TxConfirmation {
        if let Some(location) = self.tx_index.main_chain_location(tx_hash, &self.chain) {
            let top = self.top_height().unwrap_or(location.height);
            return TxConfirmation::Confirmed(top.saturating_sub(location.height) + 1);
        }
        if self.tx_index.contains(tx_hash) {
            TxConfirmation::OffMainChain
        } else if self.pool.contains(tx_hash) {
            TxConfirmation::ZeroConf
        } else {
            TxConfirmation::NotFound
        }
    }

    pub fn is_outpoint_mine(&self, id: WalletId, outpoint: &OutPoint) -> Result<bool> {
        Ok(self.wallet(id)?.is_outpoint_mine(outpoint))
    }

    /// Block and transaction hashes whose display hex starts with `prefix`
    pub fn search_prefix(&self, prefix: &str) -> PrefixMatches {
        PrefixMatches {
            blocks: self.chain.search_prefix(prefix),
            transactions: self.tx_index.search_prefix(prefix),
        }
    }

    /// Remove invalidated ledger entries and pairs from every wallet
    pub fn compact_ledgers(&mut self) -> usize {
        let removed: usize = self
            .wallets
            .iter_mut()
            .map(|w| {
                let removed = w.remove_invalid_entries();
                w.sort_ledgers();
                removed
            })
            .sum();
        debug!("compaction removed {} invalid records", removed);
        removed
    }

    /// Framed source over `reader` using the configured magic
    pub fn framed_source<R: Read>(&self, reader: R) -> FramedBlockSource<R> {
        FramedBlockSource::new(reader, self.config.magic_bytes)
    }

    /// Ingest every block a source yields
    ///
    /// Malformed blocks are counted and skipped; a source integrity failure
    /// aborts the batch.
    pub fn ingest_from_source<S: BlockSource + ?Sized>(&mut self, source: &mut S) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        while let Some(raw) = source.next_block()? {
            summary.blocks += 1;
            match self.ingest_block(&raw.bytes, raw.offset) {
                Ok(result) => {
                    if result.accepted {
                        summary.accepted += 1;
                    }
                    if result.caused_reorg {
                        summary.reorgs += 1;
                    }
                }
                Err(ChainError::MalformedData(_)) => summary.rejected += 1,
                Err(e) => return Err(e),
            }
        }
        info!(
            "ingested {} blocks ({} accepted, {} rejected, {} reorgs)",
            summary.blocks, summary.accepted, summary.rejected, summary.reorgs
        );
        Ok(summary)
    }
}

/// Single-writer / multi-reader handle to an engine
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<RwLock<ChainEngine>>,
}

impl SharedEngine {
    pub fn new(engine: ChainEngine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    /// A poisoned lock still holds a consistent engine: every mutation
    /// completes before it returns
    pub fn read(&self) -> RwLockReadGuard<'_, ChainEngine> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ChainEngine> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ingest_block(&self, raw: &[u8], offset: u64) -> Result<BlockAddResult> {
        self.write().ingest_block(raw, offset)
    }

    pub fn admit_zero_conf(&self, raw: &[u8], arrival_time: u32) -> Result<AdmitOutcome> {
        self.write().admit_zero_conf(raw, arrival_time)
    }

    pub fn query_balance(&self, scope: Scope) -> Result<Balance> {
        self.read().query_balance(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::serialize;
    use crate::config::TieBreak;
    use crate::constants::MAINNET_MAGIC;
    use crate::transaction::merkle_root;
    use crate::types::{BlockHeader, Transaction, TransactionInput, TransactionOutput};
    use std::io::Cursor;

    const ALICE: Addr20 = [0xa1; 20];
    const BOB: Addr20 = [0xb0; 20];
    const CAROL: Addr20 = [0xc0; 20];

    fn p2pkh(addr: Addr20) -> Vec<u8> {
        let mut script = vec![0x76, 0xa9, 0x14];
        script.extend_from_slice(&addr);
        script.extend_from_slice(&[0x88, 0xac]);
        script
    }

    fn coinbase(tag: u8, addr: Addr20, value: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint::null(),
                script_sig: vec![0x01, tag],
                sequence: 0xffffffff,
            }],
            outputs: vec![TransactionOutput {
                value,
                script_pubkey: p2pkh(addr),
            }],
            lock_time: 0,
        }
    }

    fn spend(prevout: OutPoint, outputs: &[(Addr20, u64)]) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout,
                script_sig: vec![0x00],
                sequence: 0xffffffff,
            }],
            outputs: outputs
                .iter()
                .map(|(addr, value)| TransactionOutput {
                    value: *value,
                    script_pubkey: p2pkh(*addr),
                })
                .collect(),
            lock_time: 0,
        }
    }

    /// Serialized block on top of `prev`, and its hash
    fn block(prev: Hash, nonce: u32, transactions: Vec<Transaction>) -> (Hash, Vec<u8>) {
        let txids: Vec<Hash> = transactions.iter().map(|t| t.txid()).collect();
        let header = BlockHeader {
            version: 1,
            prev_block_hash: prev,
            merkle_root: merkle_root(&txids).unwrap(),
            timestamp: 1_231_006_505 + nonce,
            bits: 0x1d00ffff,
            nonce,
        };
        let hash = header.hash();
        (hash, serialize(&Block { header, transactions }))
    }

    fn engine(maturity: u32) -> ChainEngine {
        ChainEngine::new(EngineConfig {
            coinbase_maturity: maturity,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EngineConfig {
            min_confirmations: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(ChainEngine::new(config), Err(ChainError::Config(_))));
    }

    #[test]
    fn test_linear_ingest_and_maturity() {
        let mut engine = engine(2);
        let wallet = engine.add_wallet([ALICE]);
        let cb0 = coinbase(0, ALICE, 50);
        let cb0_id = cb0.txid();
        let (g, raw) = block([0; 32], 0, vec![cb0]);

        let result = engine.ingest_block(&raw, 8).unwrap();
        assert!(result.accepted && result.became_new_tip && !result.caused_reorg);
        assert_eq!(
            engine.query_balance(Scope::Wallet(wallet)).unwrap(),
            Balance { full: 50, spendable: 0, unconfirmed: 50 }
        );
        assert!(engine.query_unspent(Scope::Wallet(wallet), 1).unwrap().is_empty());

        let (_, raw) = block(g, 1, vec![coinbase(1, BOB, 50)]);
        engine.ingest_block(&raw, 300).unwrap();
        assert_eq!(engine.query_balance(Scope::Wallet(wallet)).unwrap().spendable, 50);
        assert_eq!(engine.confirmations(&cb0_id), TxConfirmation::Confirmed(2));
        assert_eq!(engine.query_unspent(Scope::Address(ALICE), 1).unwrap().len(), 1);
        assert_eq!(engine.chain().header_by_hash(&g).unwrap().byte_offset, Some(8));
        assert!(engine.is_outpoint_mine(wallet, &OutPoint::new(cb0_id, 0)).unwrap());
    }

    #[test]
    fn test_duplicate_and_malformed_blocks() {
        let mut engine = engine(1);
        let (_, raw) = block([0; 32], 0, vec![coinbase(0, ALICE, 50)]);
        assert!(engine.ingest_block(&raw, 0).unwrap().accepted);
        assert!(!engine.ingest_block(&raw, 0).unwrap().accepted);

        let (_, mut bad) = block([0; 32], 1, vec![coinbase(1, ALICE, 50)]);
        // corrupt the merkle root
        bad[40] ^= 0xff;
        assert!(matches!(engine.ingest_block(&bad, 0), Err(ChainError::MalformedData(_))));

        let (_, mut trailing) = block([0; 32], 2, vec![coinbase(2, ALICE, 50)]);
        trailing.push(0);
        assert!(matches!(engine.ingest_block(&trailing, 0), Err(ChainError::MalformedData(_))));
        assert_eq!(engine.chain().len(), 1);
    }

    #[test]
    fn test_out_of_order_blocks() {
        let mut engine = engine(1);
        let wallet = engine.add_wallet([ALICE]);
        let (g, raw_g) = block([0; 32], 0, vec![coinbase(0, ALICE, 50)]);
        let (b1, raw_b1) = block(g, 1, vec![coinbase(1, ALICE, 25)]);

        let first = engine.ingest_block(&raw_b1, 0).unwrap();
        assert!(first.accepted && !first.became_new_tip);
        assert_eq!(engine.query_balance(Scope::Wallet(wallet)).unwrap().full, 0);

        let second = engine.ingest_block(&raw_g, 0).unwrap();
        assert!(!second.became_new_tip);
        assert_eq!(engine.chain().top().unwrap().hash, b1);
        assert_eq!(engine.query_balance(Scope::Wallet(wallet)).unwrap().full, 75);
    }

    #[test]
    fn test_unresolved_inputs_counted_once() {
        let mut engine = engine(1);
        engine.add_wallet([ALICE]);
        engine.add_wallet([BOB]);
        let orphan_spend = spend(OutPoint::new([9; 32], 0), &[(ALICE, 10)]);
        let (_, raw) = block([0; 32], 0, vec![coinbase(0, BOB, 50), orphan_spend]);
        assert_eq!(engine.ingest_block(&raw, 0).unwrap().unresolved, 1);
    }

    #[test]
    fn test_reorg_restores_spent_output() {
        let mut engine = engine(1);
        let wallet = engine.add_wallet([ALICE]);
        let cb0 = coinbase(0, ALICE, 50);
        let (g, raw) = block([0; 32], 0, vec![cb0.clone()]);
        engine.ingest_block(&raw, 0).unwrap();

        let pay = spend(OutPoint::new(cb0.txid(), 0), &[(BOB, 50)]);
        let pay_id = pay.txid();
        let (_, raw) = block(g, 1, vec![coinbase(1, BOB, 50), pay]);
        engine.ingest_block(&raw, 0).unwrap();
        assert_eq!(engine.query_balance(Scope::Wallet(wallet)).unwrap().full, 0);

        // equal work: the current tip stays
        let (b1, raw) = block(g, 2, vec![coinbase(2, CAROL, 50)]);
        let tie = engine.ingest_block(&raw, 0).unwrap();
        assert!(tie.accepted && !tie.became_new_tip && !tie.caused_reorg);

        let (_, raw) = block(b1, 3, vec![coinbase(3, CAROL, 50)]);
        let result = engine.ingest_block(&raw, 0).unwrap();
        assert!(result.caused_reorg && result.became_new_tip);
        let reorg = result.reorg.unwrap();
        assert_eq!(reorg.branch_point, g);
        assert!(reorg.invalidated.contains(&pay_id));

        let balance = engine.query_balance(Scope::Wallet(wallet)).unwrap();
        assert_eq!(balance.full, 50);
        assert_eq!(engine.confirmations(&pay_id), TxConfirmation::OffMainChain);

        let ledger = engine.query_ledger(Scope::Wallet(wallet)).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].value, 50);

        // a wallet scanned from scratch agrees
        let fresh = engine.add_wallet([ALICE]);
        assert_eq!(engine.query_balance(Scope::Wallet(fresh)).unwrap(), balance);
        assert_eq!(engine.compact_ledgers(), 2);
    }

    #[test]
    fn test_zero_conf_superseded_by_block() {
        let mut engine = engine(1);
        let wallet = engine.add_wallet([ALICE]);
        let cb0 = coinbase(0, ALICE, 50);
        let (g, raw) = block([0; 32], 0, vec![cb0.clone()]);
        engine.ingest_block(&raw, 0).unwrap();

        let pay = spend(OutPoint::new(cb0.txid(), 0), &[(BOB, 30), (ALICE, 20)]);
        let pay_id = pay.txid();
        assert_eq!(
            engine.admit_zero_conf(&serialize(&pay), 100).unwrap(),
            AdmitOutcome::Admitted(pay_id)
        );
        assert_eq!(engine.confirmations(&pay_id), TxConfirmation::ZeroConf);
        assert_eq!(
            engine.query_balance(Scope::Wallet(wallet)).unwrap(),
            Balance { full: 20, spendable: 20, unconfirmed: 0 }
        );
        let ledger = engine.query_ledger(Scope::Wallet(wallet)).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger[1].is_zero_conf() && ledger[1].change_back);
        assert_eq!(ledger[1].value, -30);

        let (_, raw) = block(g, 1, vec![coinbase(1, BOB, 50), pay.clone()]);
        engine.ingest_block(&raw, 0).unwrap();
        assert!(engine.zero_conf_pool().is_empty());
        assert_eq!(engine.confirmations(&pay_id), TxConfirmation::Confirmed(1));
        let ledger = engine.query_ledger(Scope::Wallet(wallet)).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.iter().all(|e| !e.is_zero_conf()));
        assert_eq!(
            engine.admit_zero_conf(&serialize(&pay), 200).unwrap(),
            AdmitOutcome::AlreadyConfirmed(pay_id)
        );
    }

    #[test]
    fn test_zero_conf_conflict() {
        let mut engine = engine(1);
        let wallet = engine.add_wallet([ALICE]);
        let cb0 = coinbase(0, ALICE, 50);
        let source = OutPoint::new(cb0.txid(), 0);
        let (g, raw) = block([0; 32], 0, vec![cb0]);
        engine.ingest_block(&raw, 0).unwrap();

        let pending = spend(source, &[(BOB, 50)]);
        engine.admit_zero_conf(&serialize(&pending), 100).unwrap();

        let winner = spend(source, &[(CAROL, 49)]);
        let (_, raw) = block(g, 1, vec![coinbase(1, BOB, 50), winner]);
        engine.ingest_block(&raw, 0).unwrap();

        assert!(engine.zero_conf_pool().is_empty());
        assert_eq!(engine.confirmations(&pending.txid()), TxConfirmation::NotFound);
        let ledger = engine.query_ledger(Scope::Wallet(wallet)).unwrap();
        let values: Vec<i64> = ledger.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![50, -50]);
        assert_eq!(engine.query_balance(Scope::Wallet(wallet)).unwrap(), Balance::default());

        let late = spend(source, &[(ALICE, 10)]);
        assert_eq!(
            engine.admit_zero_conf(&serialize(&late), 300).unwrap(),
            AdmitOutcome::Conflicted(late.txid())
        );
        assert!(engine.zero_conf_pool().is_empty());
    }

    #[test]
    fn test_zero_conf_disabled() {
        let mut engine = ChainEngine::new(EngineConfig {
            zero_conf_enabled: false,
            ..EngineConfig::default()
        })
        .unwrap();
        let raw = serialize(&spend(OutPoint::new([1; 32], 0), &[(BOB, 1)]));
        assert!(matches!(engine.admit_zero_conf(&raw, 0), Err(ChainError::ZeroConfDisabled)));
        assert!(matches!(engine.purge_zero_conf(), Err(ChainError::ZeroConfDisabled)));
    }

    #[test]
    fn test_add_address_rescans() {
        let mut engine = engine(1);
        let wallet = engine.add_wallet([ALICE]);
        let (g, raw) = block([0; 32], 0, vec![coinbase(0, BOB, 50)]);
        engine.ingest_block(&raw, 0).unwrap();
        let (_, raw) = block(g, 1, vec![coinbase(1, BOB, 25)]);
        engine.ingest_block(&raw, 0).unwrap();
        assert_eq!(engine.query_balance(Scope::Wallet(wallet)).unwrap().full, 0);

        assert!(engine.add_address(wallet, BOB).unwrap());
        assert!(!engine.add_address(wallet, BOB).unwrap());
        assert_eq!(engine.query_balance(Scope::Wallet(wallet)).unwrap().full, 75);
        assert_eq!(engine.query_balance(Scope::Address(BOB)).unwrap().full, 75);
        assert_eq!(engine.query_balance(Scope::Address(CAROL)).unwrap(), Balance::default());
        assert!(engine.query_ledger(Scope::Address(CAROL)).unwrap().is_empty());
        assert!(matches!(engine.add_address(7, CAROL), Err(ChainError::UnknownWallet(7))));
    }

    #[test]
    fn test_ingest_from_framed_source() {
        let mut engine = ChainEngine::new(EngineConfig {
            tie_break: TieBreak::PreferFirstSeen,
            ..EngineConfig::default()
        })
        .unwrap();
        let (g, raw_g) = block([0; 32], 0, vec![coinbase(0, ALICE, 50)]);
        let (_, raw_b1) = block(g, 1, vec![coinbase(1, ALICE, 50)]);

        let mut data = Vec::new();
        for payload in [raw_g, vec![1, 2, 3], raw_b1] {
            data.extend_from_slice(&MAINNET_MAGIC);
            data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            data.extend_from_slice(&payload);
        }
        let mut source = engine.framed_source(Cursor::new(data));
        let summary = engine.ingest_from_source(&mut source).unwrap();
        assert_eq!(
            summary,
            IngestSummary { blocks: 3, accepted: 2, rejected: 1, reorgs: 0 }
        );
        assert_eq!(engine.chain().top_height(), Some(1));

        let mut broken = engine.framed_source(Cursor::new(vec![0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]));
        assert!(matches!(
            engine.ingest_from_source(&mut broken),
            Err(ChainError::SourceIntegrity(_))
        ));
    }

    #[test]
    fn test_search_prefix() {
        let mut engine = engine(1);
        let cb0 = coinbase(0, ALICE, 50);
        let cb0_id = cb0.txid();
        let (g, raw) = block([0; 32], 0, vec![cb0]);
        engine.ingest_block(&raw, 0).unwrap();

        let block_prefix = hash_hex(&g)[..8].to_string();
        assert_eq!(engine.search_prefix(&block_prefix).blocks, vec![g]);
        let tx_prefix = hash_hex(&cb0_id)[..8].to_string();
        assert_eq!(engine.search_prefix(&tx_prefix).transactions, vec![cb0_id]);
    }

    #[test]
    fn test_shared_engine_across_threads() {
        let shared = SharedEngine::new(engine(1));
        let wallet = shared.write().add_wallet([ALICE]);
        let (_, raw) = block([0; 32], 0, vec![coinbase(0, ALICE, 50)]);

        let writer = shared.clone();
        std::thread::spawn(move || writer.ingest_block(&raw, 0).unwrap())
            .join()
            .unwrap();
        assert_eq!(shared.query_balance(Scope::Wallet(wallet)).unwrap().full, 50);
        assert_eq!(shared.read().chain().len(), 1);
    }
}
