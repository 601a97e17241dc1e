//! Shared builders for integration tests
#![allow(dead_code)]

use chain_index::codec::serialize;
use chain_index::transaction::merkle_root;
use chain_index::*;

pub const ALICE: Addr20 = [0xa1; 20];
pub const BOB: Addr20 = [0xb0; 20];
pub const CAROL: Addr20 = [0xc0; 20];

/// Difficulty 1
pub const BITS_EASY: u32 = 0x1d00ffff;
/// Difficulty 256
pub const BITS_HARD: u32 = 0x1c00ffff;

pub const GENESIS_HEX: &str = concat!(
    "0100000000000000000000000000000000000000000000000000000000000000",
    "000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa",
    "4b1e5e4a29ab5f49ffff001d1dac2b7c01010000000100000000000000000000",
    "00000000000000000000000000000000000000000000ffffffff4d04ffff001d",
    "0104455468652054696d65732030332f4a616e2f32303039204368616e63656c",
    "6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f75742066",
    "6f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe554827",
    "1967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4",
    "f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000",
);

pub fn p2pkh(addr: Addr20) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&addr);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

/// Coinbase paying `value` to `addr`; `tag` keeps coinbases distinct
pub fn coinbase(tag: u32, addr: Addr20, value: u64) -> Transaction {
    let mut script_sig = vec![0x04];
    script_sig.extend_from_slice(&tag.to_le_bytes());
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint::null(),
            script_sig,
            sequence: 0xffffffff,
        }],
        outputs: vec![TransactionOutput {
            value,
            script_pubkey: p2pkh(addr),
        }],
        lock_time: 0,
    }
}

pub fn spend(prevouts: &[OutPoint], outputs: &[(Addr20, u64)]) -> Transaction {
    Transaction {
        version: 1,
        inputs: prevouts
            .iter()
            .map(|prevout| TransactionInput {
                prevout: *prevout,
                script_sig: vec![0x00],
                sequence: 0xffffffff,
            })
            .collect(),
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

pub fn header(prev: Hash, nonce: u32, bits: u32, transactions: &[Transaction]) -> BlockHeader {
    let txids: Vec<Hash> = transactions.iter().map(|t| t.txid()).collect();
    BlockHeader {
        version: 1,
        prev_block_hash: prev,
        merkle_root: merkle_root(&txids).unwrap_or(EMPTY_HASH),
        timestamp: 1_231_006_505 + nonce * 600,
        bits,
        nonce,
    }
}

/// A serialized block and its hash
pub struct TestBlock {
    pub hash: Hash,
    pub raw: Vec<u8>,
}

pub fn block_with_bits(prev: Hash, nonce: u32, bits: u32, transactions: Vec<Transaction>) -> TestBlock {
    let header = header(prev, nonce, bits, &transactions);
    let hash = header.hash();
    TestBlock {
        hash,
        raw: serialize(&Block {
            header,
            transactions,
        }),
    }
}

pub fn block(prev: Hash, nonce: u32, transactions: Vec<Transaction>) -> TestBlock {
    block_with_bits(prev, nonce, BITS_EASY, transactions)
}

/// Chain of `len` blocks paying their coinbase to `miner`; nonces start at `first_nonce`
pub fn build_chain(prev: Hash, first_nonce: u32, len: u32, miner: Addr20) -> Vec<TestBlock> {
    let mut blocks = Vec::new();
    let mut tip = prev;
    for n in first_nonce..first_nonce + len {
        let b = block(tip, n, vec![coinbase(n, miner, 50)]);
        tip = b.hash;
        blocks.push(b);
    }
    blocks
}

/// Wrap payloads as `magic | size | payload` records
pub fn frame(payloads: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for payload in payloads {
        out.extend_from_slice(&MAINNET_MAGIC);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
    }
    out
}

pub fn engine_with_maturity(maturity: u32) -> ChainEngine {
    ChainEngine::new(EngineConfig {
        coinbase_maturity: maturity,
        ..EngineConfig::default()
    })
    .unwrap()
}
