//! # Chain-Index
//!
//! Local blockchain indexing engine: decodes raw blocks, keeps a header tree
//! with heaviest-chain selection and reorganization, indexes transactions,
//! and maintains per-wallet ledgers, unspent outputs and balances, including
//! unconfirmed (zero-conf) transactions.
//!
//! ## Architecture
//!
//! Data flows one way through the engine:
//! - Block source (framed `blk*.dat` style records, or any [`source::BlockSource`])
//! - Codec (canonical wire decoding)
//! - Header chain (organize, reorg report) and transaction index
//! - Wallet views (TxIO pairs, ledgers, balances)
//! - Zero-conf pool (scanned on top of the confirmed state)
//!
//! ## Design Principles
//!
//! 1. **Single Writer**: one engine owns all mutable state; [`SharedEngine`]
//!    adds many-reader / one-writer access
//! 2. **Deterministic Organize**: the main chain depends only on the header
//!    set and the configured tie-break, never on arrival order
//! 3. **Repair, Then Rescan**: a reorg first invalidates what left the main
//!    chain, then scans what joined it
//! 4. **Exact Version Pinning**: hashing dependencies pinned to exact versions
//!
//! ## Usage
//!
//! ```rust
//! use chain_index::{ChainEngine, EngineConfig, Scope};
//!
//! let mut engine = ChainEngine::new(EngineConfig::default()).unwrap();
//! let wallet = engine.add_wallet([[0x11u8; 20]]);
//! let balance = engine.query_balance(Scope::Wallet(wallet)).unwrap();
//! assert_eq!(balance.full, 0);
//! ```

pub mod types;
pub mod constants;
pub mod crypto;
pub mod codec;
pub mod difficulty;
pub mod script;
pub mod transaction;
pub mod chain;
pub mod tx_index;
pub mod utxo;
pub mod wallet;
pub mod mempool;
pub mod source;
pub mod config;
pub mod engine;
pub mod error;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{ChainError, Result};
pub use config::{EngineConfig, TieBreak};
pub use chain::{ChainStatus, HeaderChain, ReorgReport};
pub use engine::{
    BlockAddResult, ChainEngine, IngestSummary, PrefixMatches, Scope, SharedEngine,
    TxConfirmation,
};
pub use mempool::{AdmitOutcome, PurgeReport};
pub use source::{BlockSource, FramedBlockSource, RawBlock};
pub use utxo::{Balance, TxIOPair};
pub use wallet::{LedgerEntry, SelectionStrategy, UnspentTxOut, WalletId};
