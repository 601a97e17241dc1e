//! Global transaction index: hash → parsed transaction and its placements

use crate::chain::HeaderChain;
use crate::script::{input_sender, output_recipient};
use crate::types::{hash_hex, Addr20, Hash, OutPoint, Transaction, TransactionInput, TransactionOutput};
use std::collections::HashMap;

/// A block that contains the transaction, and its position inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxPlacement {
    pub block_hash: Hash,
    pub index: u32,
}

/// Where a transaction sits on the current main chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub block_hash: Hash,
    pub height: u32,
    pub index: u32,
}

#[derive(Debug, Clone)]
pub struct TxEntry {
    pub tx: Transaction,
    pub hash: Hash,
    pub size: usize,
    /// Every block seen carrying this transaction, main chain or not
    pub placements: Vec<TxPlacement>,
}

#[derive(Debug, Clone, Default)]
pub struct TxIndex {
    txs: HashMap<Hash, TxEntry>,
    /// Outpoint → hashes of indexed transactions spending it
    spenders: HashMap<OutPoint, Vec<Hash>>,
}

impl TxIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a transaction found in a block; re-inserting only adds a placement
    pub fn insert(&mut self, tx: Transaction, placement: TxPlacement) -> Hash {
        let hash = tx.txid();
        if let Some(entry) = self.txs.get_mut(&hash) {
            if !entry.placements.contains(&placement) {
                entry.placements.push(placement);
            }
            return hash;
        }

        for input in &tx.inputs {
            let spenders = self.spenders.entry(input.prevout).or_default();
            if !spenders.contains(&hash) {
                spenders.push(hash);
            }
        }
        self.txs.insert(
            hash,
            TxEntry {
                size: tx.size(),
                tx,
                hash,
                placements: vec![placement],
            },
        );
        hash
    }

    pub fn by_hash(&self, hash: &Hash) -> Option<&TxEntry> {
        self.txs.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.txs.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// The output an outpoint refers to; `None` means it lies outside what
    /// has been indexed
    pub fn resolve_outpoint(&self, outpoint: &OutPoint) -> Option<&TransactionOutput> {
        self.txs
            .get(&outpoint.hash)
            .and_then(|entry| entry.tx.outputs.get(outpoint.index as usize))
    }

    /// Indexed transactions that spend `outpoint`, on any branch
    pub fn spenders_of(&self, outpoint: &OutPoint) -> &[Hash] {
        self.spenders
            .get(outpoint)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The main-chain placement of a transaction, if any
    pub fn main_chain_location(&self, hash: &Hash, chain: &HeaderChain) -> Option<TxLocation> {
        let entry = self.txs.get(hash)?;
        entry.placements.iter().find_map(|p| {
            chain.main_chain_height(&p.block_hash).map(|height| TxLocation {
                block_hash: p.block_hash,
                height,
                index: p.index,
            })
        })
    }

    /// Address that funded an input, read from the output it spends or,
    /// when that output is outside the index, from the unlocking script
    pub fn sender_address(&self, input: &TransactionInput) -> Option<Addr20> {
        match self.resolve_outpoint(&input.prevout) {
            Some(output) => output_recipient(&output.script_pubkey),
            None => input_sender(&input.script_sig, &input.prevout),
        }
    }

    /// Value carried into a transaction by one input
    pub fn sent_value(&self, input: &TransactionInput) -> Option<u64> {
        self.resolve_outpoint(&input.prevout).map(|output| output.value)
    }

    /// Transaction hashes whose display hex starts with `prefix`
    pub fn search_prefix(&self, prefix: &str) -> Vec<Hash> {
        let prefix = prefix.to_ascii_lowercase();
        let mut found: Vec<Hash> = self
            .txs
            .keys()
            .filter(|hash| hash_hex(hash).starts_with(&prefix))
            .copied()
            .collect();
        found.sort();
        found
    }
}
