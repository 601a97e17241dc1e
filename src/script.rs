//! Script-pattern classification for inputs and outputs
//!
//! Only the patterns needed to attribute value to a 20-byte recipient are
//! recognised; everything else falls into the `NonStandard` / `Unknown` bucket.

use crate::constants::EMPTY_HASH;
use crate::crypto::hash160;
use crate::types::{Addr20, OutPoint};
use serde::{Deserialize, Serialize};

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_RETURN: u8 = 0x6a;
const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKMULTISIG: u8 = 0xae;

/// Locking-script patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxOutScriptType {
    PayToPubKeyHash,
    PayToPubKey,
    PayToScriptHash,
    PayToWitnessPubKeyHash,
    Multisig,
    OpReturn,
    NonStandard,
}

/// Unlocking-script patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxInScriptType {
    /// signature followed by a public key
    Standard,
    /// spends the null outpoint
    Coinbase,
    /// a lone signature, spending a pay-to-pubkey output
    SpendPubKey,
    /// empty script sig, witness carries the data
    Witness,
    Unknown,
}

/// Classify a locking script
pub fn classify_output(script: &[u8]) -> TxOutScriptType {
    match script {
        [OP_DUP, OP_HASH160, 0x14, .., OP_EQUALVERIFY, OP_CHECKSIG] if script.len() == 25 => {
            TxOutScriptType::PayToPubKeyHash
        }
        [0x41, .., OP_CHECKSIG] if script.len() == 67 => TxOutScriptType::PayToPubKey,
        [0x21, .., OP_CHECKSIG] if script.len() == 35 => TxOutScriptType::PayToPubKey,
        [OP_HASH160, 0x14, .., OP_EQUAL] if script.len() == 23 => TxOutScriptType::PayToScriptHash,
        [OP_0, 0x14, ..] if script.len() == 22 => TxOutScriptType::PayToWitnessPubKeyHash,
        [OP_RETURN, ..] => TxOutScriptType::OpReturn,
        [.., OP_CHECKMULTISIG] if is_multisig(script) => TxOutScriptType::Multisig,
        _ => TxOutScriptType::NonStandard,
    }
}

/// The 20-byte recipient of an output, when its pattern names exactly one
pub fn output_recipient(script: &[u8]) -> Option<Addr20> {
    recipient_for(script, classify_output(script))
}

/// Recipient extraction for an already-classified script
pub fn recipient_for(script: &[u8], script_type: TxOutScriptType) -> Option<Addr20> {
    let slice = match script_type {
        TxOutScriptType::PayToPubKeyHash => &script[3..23],
        TxOutScriptType::PayToScriptHash => &script[2..22],
        TxOutScriptType::PayToWitnessPubKeyHash => &script[2..22],
        TxOutScriptType::PayToPubKey => return Some(hash160(&script[1..script.len() - 1])),
        _ => return None,
    };
    let mut addr = [0u8; 20];
    addr.copy_from_slice(slice);
    Some(addr)
}

/// Classify an unlocking script in the context of the outpoint it spends
pub fn classify_input(script: &[u8], prevout: &OutPoint) -> TxInScriptType {
    if prevout.hash == EMPTY_HASH {
        return TxInScriptType::Coinbase;
    }
    if script.is_empty() {
        return TxInScriptType::Witness;
    }
    match push_items(script).as_deref() {
        Some([sig, pubkey]) if is_signature(sig) && is_pubkey(pubkey) => TxInScriptType::Standard,
        Some([sig]) if is_signature(sig) => TxInScriptType::SpendPubKey,
        _ => TxInScriptType::Unknown,
    }
}

/// Sender address recoverable from the unlocking script alone
pub fn input_sender(script: &[u8], prevout: &OutPoint) -> Option<Addr20> {
    match classify_input(script, prevout) {
        TxInScriptType::Standard => push_items(script)
            .and_then(|items| items.last().map(|pubkey| hash160(pubkey))),
        _ => None,
    }
}

fn is_signature(item: &[u8]) -> bool {
    (9..=73).contains(&item.len()) && item[0] == 0x30
}

fn is_pubkey(item: &[u8]) -> bool {
    match item.len() {
        33 => item[0] == 0x02 || item[0] == 0x03,
        65 => item[0] == 0x04,
        _ => false,
    }
}

/// Split a push-only script into its data items
fn push_items(script: &[u8]) -> Option<Vec<&[u8]>> {
    let mut items = Vec::new();
    let mut pos = 0usize;
    while pos < script.len() {
        let opcode = script[pos];
        pos += 1;
        let len = match opcode {
            OP_0 => 0,
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => {
                let n = *script.get(pos)? as usize;
                pos += 1;
                n
            }
            OP_PUSHDATA2 => {
                let bytes = script.get(pos..pos + 2)?;
                pos += 2;
                u16::from_le_bytes([bytes[0], bytes[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let bytes = script.get(pos..pos + 4)?;
                pos += 4;
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            }
            _ => return None,
        };
        items.push(script.get(pos..pos.checked_add(len)?)?);
        pos += len;
    }
    Some(items)
}

/// OP_m <pubkey>... OP_n OP_CHECKMULTISIG with n keys
fn is_multisig(script: &[u8]) -> bool {
    if script.len() < 3 {
        return false;
    }
    let required = script[0];
    let total = script[script.len() - 2];
    if !(0x51..=0x60).contains(&required) || !(0x51..=0x60).contains(&total) || required > total {
        return false;
    }
    match push_items(&script[1..script.len() - 2]) {
        Some(keys) => keys.len() == (total - 0x50) as usize && keys.iter().all(|k| is_pubkey(k)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2pkh(addr: [u8; 20]) -> Vec<u8> {
        let mut script = vec![OP_DUP, OP_HASH160, 0x14];
        script.extend_from_slice(&addr);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        script
    }

    #[test]
    fn test_p2pkh_recipient() {
        let script = p2pkh([9; 20]);
        assert_eq!(classify_output(&script), TxOutScriptType::PayToPubKeyHash);
        assert_eq!(output_recipient(&script), Some([9; 20]));
    }

    #[test]
    fn test_p2pk_recipient_is_hash160_of_key() {
        let mut key = vec![0x04];
        key.extend_from_slice(&[7u8; 64]);
        let mut script = vec![0x41];
        script.extend_from_slice(&key);
        script.push(OP_CHECKSIG);
        assert_eq!(classify_output(&script), TxOutScriptType::PayToPubKey);
        assert_eq!(output_recipient(&script), Some(hash160(&key)));
    }

    #[test]
    fn test_p2sh_and_witness() {
        let mut p2sh = vec![OP_HASH160, 0x14];
        p2sh.extend_from_slice(&[3; 20]);
        p2sh.push(OP_EQUAL);
        assert_eq!(classify_output(&p2sh), TxOutScriptType::PayToScriptHash);
        assert_eq!(output_recipient(&p2sh), Some([3; 20]));

        let mut wpkh = vec![OP_0, 0x14];
        wpkh.extend_from_slice(&[4; 20]);
        assert_eq!(classify_output(&wpkh), TxOutScriptType::PayToWitnessPubKeyHash);
        assert_eq!(output_recipient(&wpkh), Some([4; 20]));
    }

    #[test]
    fn test_op_return_and_nonstandard() {
        assert_eq!(classify_output(&[OP_RETURN, 0x01, 0xff]), TxOutScriptType::OpReturn);
        assert_eq!(classify_output(&[0x51]), TxOutScriptType::NonStandard);
        assert_eq!(output_recipient(&[0x51]), None);
    }

    #[test]
    fn test_multisig() {
        let mut script = vec![0x51, 0x21];
        script.push(0x02);
        script.extend_from_slice(&[1; 32]);
        script.extend_from_slice(&[0x51, OP_CHECKMULTISIG]);
        assert_eq!(classify_output(&script), TxOutScriptType::Multisig);
        assert_eq!(output_recipient(&script), None);
    }

    #[test]
    fn test_classify_inputs() {
        let prevout = OutPoint::new([1; 32], 0);
        let mut sig = vec![0x30];
        sig.extend_from_slice(&[0; 70]);
        let mut pubkey = vec![0x02];
        pubkey.extend_from_slice(&[5; 32]);

        let mut standard = vec![sig.len() as u8];
        standard.extend_from_slice(&sig);
        standard.push(pubkey.len() as u8);
        standard.extend_from_slice(&pubkey);
        assert_eq!(classify_input(&standard, &prevout), TxInScriptType::Standard);
        assert_eq!(input_sender(&standard, &prevout), Some(hash160(&pubkey)));

        let mut lone = vec![sig.len() as u8];
        lone.extend_from_slice(&sig);
        assert_eq!(classify_input(&lone, &prevout), TxInScriptType::SpendPubKey);

        assert_eq!(classify_input(&[], &prevout), TxInScriptType::Witness);
        assert_eq!(classify_input(&[0x04, 1, 2, 3, 4], &OutPoint::null()), TxInScriptType::Coinbase);
        assert_eq!(classify_input(&[0xac], &prevout), TxInScriptType::Unknown);
    }

    #[test]
    fn test_truncated_push_is_unknown() {
        let prevout = OutPoint::new([1; 32], 0);
        assert_eq!(classify_input(&[0x10, 0x30], &prevout), TxInScriptType::Unknown);
    }
}
