//! Constants shared by the codec, chain and wallet layers

use crate::types::Hash;

/// Serialized block header size
pub const HEADER_SIZE: usize = 80;

/// Serialized outpoint size
pub const OUTPOINT_SIZE: usize = 36;

/// Maximum block size accepted from a byte source: 4MB (with SegWit)
pub const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Maximum money supply: 21,000,000 BTC in satoshis
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Satoshis per BTC
pub const SATOSHIS_PER_BTC: u64 = 100_000_000;

/// Confirmations before a coinbase output may be spent
pub const COINBASE_MATURITY: u32 = 100;

/// Confirmations before a regular output counts as spendable
pub const MIN_CONFIRMATIONS: u32 = 1;

/// Lock time threshold: transactions with lock time < this are block height
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// All-zero hash used by coinbase prevouts and the genesis header's parent
pub const EMPTY_HASH: Hash = [0u8; 32];

/// Mainnet network magic framing each record of a block file
pub const MAINNET_MAGIC: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];

/// Block height stored on ledger entries that are not in any block yet
pub const UNCONFIRMED_HEIGHT: u32 = u32::MAX;
