//! Transaction-level helpers: coinbase detection, finality and merkle roots

use crate::constants::*;
use crate::crypto::hash256;
use crate::error::{ChainError, Result};
use crate::types::*;

/// Check if transaction is coinbase
pub fn is_coinbase(tx: &Transaction) -> bool {
    tx.inputs.len() == 1
        && tx.inputs[0].prevout.hash == EMPTY_HASH
        && tx.inputs[0].prevout.index == 0xffffffff
}

/// IsFinalTx: whether `tx` could be included in a block at `height` with `time`
///
/// 1. A zero lock time is always final
/// 2. Lock times below the threshold are heights, otherwise timestamps
/// 3. A lock time strictly in the past is final
/// 4. Otherwise final only if every input opted out with a final sequence
pub fn is_final(tx: &Transaction, height: u32, time: u32) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let cutoff = if tx.lock_time < LOCKTIME_THRESHOLD {
        height
    } else {
        time
    };
    if tx.lock_time < cutoff {
        return true;
    }
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Sum of output values; `None` on overflow or above the money supply
pub fn total_output_value(tx: &Transaction) -> Option<u64> {
    tx.outputs
        .iter()
        .try_fold(0u64, |acc, output| acc.checked_add(output.value))
        .filter(|total| *total <= MAX_MONEY)
}

/// Merkle root over transaction hashes in wire order
///
/// Odd levels duplicate their last hash. An empty list has no root.
pub fn merkle_root(tx_hashes: &[Hash]) -> Result<Hash> {
    if tx_hashes.is_empty() {
        return Err(ChainError::MalformedData(
            "cannot compute merkle root of an empty transaction list".to_string(),
        ));
    }

    let mut level = tx_hashes.to_vec();
    while level.len() > 1 {
        let mut next_level = Vec::with_capacity((level.len() + 1) / 2);
        for chunk in level.chunks(2) {
            let right = chunk.get(1).unwrap_or(&chunk[0]);
            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(&chunk[0]);
            combined[32..].copy_from_slice(right);
            next_level.push(hash256(&combined));
        }
        level = next_level;
    }
    Ok(level[0])
}

/// Merkle root of a parsed block's transactions
pub fn block_merkle_root(block: &Block) -> Result<Hash> {
    let hashes: Vec<Hash> = block.transactions.iter().map(|tx| tx.txid()).collect();
    merkle_root(&hashes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_with(lock_time: u32, sequence: u32) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint::new([1; 32], 0),
                script_sig: vec![],
                sequence,
            }],
            outputs: vec![TransactionOutput {
                value: 1000,
                script_pubkey: vec![],
            }],
            lock_time,
        }
    }

    #[test]
    fn test_is_coinbase() {
        let mut tx = tx_with(0, SEQUENCE_FINAL);
        assert!(!is_coinbase(&tx));
        tx.inputs[0].prevout = OutPoint::null();
        assert!(is_coinbase(&tx));
        tx.inputs.push(tx.inputs[0].clone());
        assert!(!is_coinbase(&tx));
    }

    #[test]
    fn test_is_final_zero_lock_time() {
        assert!(is_final(&tx_with(0, 0), 0, 0));
    }

    #[test]
    fn test_is_final_height_lock() {
        let tx = tx_with(100, 0);
        assert!(!is_final(&tx, 100, 0));
        assert!(is_final(&tx, 101, 0));
    }

    #[test]
    fn test_is_final_time_lock() {
        let tx = tx_with(LOCKTIME_THRESHOLD + 10, 0);
        assert!(!is_final(&tx, 1_000_000, LOCKTIME_THRESHOLD + 10));
        assert!(is_final(&tx, 0, LOCKTIME_THRESHOLD + 11));
    }

    #[test]
    fn test_is_final_sequence_opt_out() {
        assert!(is_final(&tx_with(1_000, SEQUENCE_FINAL), 1, 0));
    }

    #[test]
    fn test_total_output_value_overflow() {
        let mut tx = tx_with(0, 0);
        assert_eq!(total_output_value(&tx), Some(1000));
        tx.outputs.push(TransactionOutput {
            value: u64::MAX,
            script_pubkey: vec![],
        });
        assert_eq!(total_output_value(&tx), None);

        tx.outputs.pop();
        tx.outputs[0].value = MAX_MONEY + 1;
        assert_eq!(total_output_value(&tx), None);
    }

    #[test]
    fn test_merkle_root_single_is_identity() {
        assert_eq!(merkle_root(&[[5u8; 32]]).unwrap(), [5u8; 32]);
    }

    #[test]
    fn test_merkle_root_odd_duplicates_last() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        assert_eq!(
            merkle_root(&[a, b, c]).unwrap(),
            merkle_root(&[a, b, c, c]).unwrap()
        );
    }

    #[test]
    fn test_merkle_root_pair() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let mut combined = Vec::new();
        combined.extend_from_slice(&a);
        combined.extend_from_slice(&b);
        assert_eq!(merkle_root(&[a, b]).unwrap(), hash256(&combined));
    }

    #[test]
    fn test_merkle_root_empty() {
        assert!(merkle_root(&[]).is_err());
    }
}
