//! Canonical wire encoding for headers, outpoints, inputs, outputs,
//! transactions and blocks.
//!
//! Every decoder reads through one cursor abstraction, [`WireRead`], so the
//! same code path serves owned buffers, borrowed slices and block payloads
//! handed over by a byte source.

use crate::constants::{HEADER_SIZE, OUTPOINT_SIZE};
use crate::crypto::hash256;
use crate::error::{ChainError, Result};
use crate::types::*;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Smallest possible serialized input: outpoint, empty script, sequence
const MIN_INPUT_SIZE: usize = OUTPOINT_SIZE + 1 + 4;

/// Smallest possible serialized output: value, empty script
const MIN_OUTPUT_SIZE: usize = 8 + 1;

/// Smallest possible serialized transaction
const MIN_TX_SIZE: usize = 4 + 1 + 1 + 4;

/// A readable byte cursor that knows how much input is left.
pub trait WireRead: Read {
    /// Bytes left between the cursor and the end of the buffer
    fn remaining(&self) -> usize;

    /// Bytes consumed so far
    fn consumed(&self) -> usize;

    #[inline]
    fn read_u8_le(&mut self) -> Result<u8> {
        Ok(ReadBytesExt::read_u8(self)?)
    }

    #[inline]
    fn read_u32_le(&mut self) -> Result<u32> {
        Ok(ReadBytesExt::read_u32::<LittleEndian>(self)?)
    }

    #[inline]
    fn read_u64_le(&mut self) -> Result<u64> {
        Ok(ReadBytesExt::read_u64::<LittleEndian>(self)?)
    }

    #[inline]
    fn read_hash(&mut self) -> Result<Hash> {
        let mut hash = [0u8; 32];
        self.read_exact(&mut hash)?;
        Ok(hash)
    }

    /// Read a compact-size integer, rejecting non-minimal encodings
    fn read_var_int(&mut self) -> Result<u64> {
        let prefix = self.read_u8_le()?;
        let (value, minimum) = match prefix {
            0xfd => (ReadBytesExt::read_u16::<LittleEndian>(self)? as u64, 0xfd),
            0xfe => (ReadBytesExt::read_u32::<LittleEndian>(self)? as u64, 0x1_0000),
            0xff => (ReadBytesExt::read_u64::<LittleEndian>(self)?, 0x1_0000_0000),
            n => return Ok(n as u64),
        };
        if value < minimum {
            return Err(ChainError::MalformedData(format!(
                "non-canonical varint 0x{:x} with prefix 0x{:02x}",
                value, prefix
            )));
        }
        Ok(value)
    }

    /// Read `len` raw bytes, failing before allocation if the buffer is shorter
    fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        if len > self.remaining() as u64 {
            return Err(ChainError::MalformedData(format!(
                "declared length {} exceeds remaining {} bytes",
                len,
                self.remaining()
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read an element count and check it could possibly fit in what is left
    fn read_count(&mut self, min_element_size: usize) -> Result<usize> {
        let count = self.read_var_int()?;
        let needed = count.saturating_mul(min_element_size as u64);
        if needed > self.remaining() as u64 {
            return Err(ChainError::MalformedData(format!(
                "declared count {} cannot fit in remaining {} bytes",
                count,
                self.remaining()
            )));
        }
        Ok(count as usize)
    }
}

impl WireRead for Cursor<&[u8]> {
    fn remaining(&self) -> usize {
        self.get_ref().len().saturating_sub(self.position() as usize)
    }

    fn consumed(&self) -> usize {
        self.position() as usize
    }
}

impl WireRead for Cursor<Vec<u8>> {
    fn remaining(&self) -> usize {
        self.get_ref().len().saturating_sub(self.position() as usize)
    }

    fn consumed(&self) -> usize {
        self.position() as usize
    }
}

/// Types with a canonical wire encoding
pub trait Encodable {
    /// Append the encoding to `buf`, returning the number of bytes written
    fn consensus_encode(&self, buf: &mut Vec<u8>) -> usize;
}

/// Types decodable from a [`WireRead`] cursor
pub trait Decodable: Sized {
    fn consensus_decode<R: WireRead>(reader: &mut R) -> Result<Self>;
}

/// Serialize any encodable entity to an owned buffer
pub fn serialize<T: Encodable>(item: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    item.consensus_encode(&mut buf);
    buf
}

/// Parse one entity starting at `offset`, returning it and the bytes consumed
pub fn parse<T: Decodable>(bytes: &[u8], offset: usize) -> Result<(T, usize)> {
    if offset > bytes.len() {
        return Err(ChainError::MalformedData(format!(
            "offset {} past end of {}-byte buffer",
            offset,
            bytes.len()
        )));
    }
    let mut cursor = Cursor::new(&bytes[offset..]);
    let item = T::consensus_decode(&mut cursor)?;
    Ok((item, cursor.consumed()))
}

/// Append a compact-size integer in its minimal form
pub fn write_var_int(buf: &mut Vec<u8>, n: u64) -> usize {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
    var_int_size(n)
}

/// Encoded size of a compact-size integer
pub fn var_int_size(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

fn write_script(buf: &mut Vec<u8>, script: &[u8]) -> usize {
    let len = write_var_int(buf, script.len() as u64);
    buf.extend_from_slice(script);
    len + script.len()
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, buf: &mut Vec<u8>) -> usize {
        buf.extend_from_slice(&self.hash);
        buf.extend_from_slice(&self.index.to_le_bytes());
        OUTPOINT_SIZE
    }
}

impl Decodable for OutPoint {
    fn consensus_decode<R: WireRead>(reader: &mut R) -> Result<Self> {
        Ok(OutPoint {
            hash: reader.read_hash()?,
            index: reader.read_u32_le()?,
        })
    }
}

impl Encodable for TransactionInput {
    fn consensus_encode(&self, buf: &mut Vec<u8>) -> usize {
        let mut len = self.prevout.consensus_encode(buf);
        len += write_script(buf, &self.script_sig);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        len + 4
    }
}

impl Decodable for TransactionInput {
    fn consensus_decode<R: WireRead>(reader: &mut R) -> Result<Self> {
        let prevout = OutPoint::consensus_decode(reader)?;
        let script_len = reader.read_var_int()?;
        let script_sig = reader.read_bytes(script_len)?;
        let sequence = reader.read_u32_le()?;
        Ok(TransactionInput {
            prevout,
            script_sig,
            sequence,
        })
    }
}

impl Encodable for TransactionOutput {
    fn consensus_encode(&self, buf: &mut Vec<u8>) -> usize {
        buf.extend_from_slice(&self.value.to_le_bytes());
        8 + write_script(buf, &self.script_pubkey)
    }
}

impl Decodable for TransactionOutput {
    fn consensus_decode<R: WireRead>(reader: &mut R) -> Result<Self> {
        let value = reader.read_u64_le()?;
        let script_len = reader.read_var_int()?;
        let script_pubkey = reader.read_bytes(script_len)?;
        Ok(TransactionOutput {
            value,
            script_pubkey,
        })
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, buf: &mut Vec<u8>) -> usize {
        buf.extend_from_slice(&self.version.to_le_bytes());
        let mut len = 4 + write_var_int(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            len += input.consensus_encode(buf);
        }
        len += write_var_int(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            len += output.consensus_encode(buf);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        len + 4
    }
}

impl Decodable for Transaction {
    fn consensus_decode<R: WireRead>(reader: &mut R) -> Result<Self> {
        let version = reader.read_u32_le()?;

        let num_inputs = reader.read_count(MIN_INPUT_SIZE)?;
        let mut inputs = Vec::with_capacity(num_inputs);
        for _ in 0..num_inputs {
            inputs.push(TransactionInput::consensus_decode(reader)?);
        }

        let num_outputs = reader.read_count(MIN_OUTPUT_SIZE)?;
        let mut outputs = Vec::with_capacity(num_outputs);
        for _ in 0..num_outputs {
            outputs.push(TransactionOutput::consensus_decode(reader)?);
        }

        let lock_time = reader.read_u32_le()?;
        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, buf: &mut Vec<u8>) -> usize {
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.prev_block_hash);
        buf.extend_from_slice(&self.merkle_root);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        HEADER_SIZE
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode<R: WireRead>(reader: &mut R) -> Result<Self> {
        if reader.remaining() < HEADER_SIZE {
            return Err(ChainError::MalformedData(format!(
                "header needs {} bytes, {} remaining",
                HEADER_SIZE,
                reader.remaining()
            )));
        }
        Ok(BlockHeader {
            version: reader.read_u32_le()?,
            prev_block_hash: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
            timestamp: reader.read_u32_le()?,
            bits: reader.read_u32_le()?,
            nonce: reader.read_u32_le()?,
        })
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, buf: &mut Vec<u8>) -> usize {
        let mut len = self.header.consensus_encode(buf);
        len += write_var_int(buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            len += tx.consensus_encode(buf);
        }
        len
    }
}

impl Decodable for Block {
    fn consensus_decode<R: WireRead>(reader: &mut R) -> Result<Self> {
        let header = BlockHeader::consensus_decode(reader)?;
        let num_txs = reader.read_count(MIN_TX_SIZE)?;
        let mut transactions = Vec::with_capacity(num_txs);
        for _ in 0..num_txs {
            transactions.push(Transaction::consensus_decode(reader)?);
        }
        Ok(Block {
            header,
            transactions,
        })
    }
}

impl BlockHeader {
    /// Double-hash of the 80 serialized bytes
    pub fn hash(&self) -> Hash {
        hash256(&serialize(self))
    }
}

impl Transaction {
    /// Double-hash of the serialized transaction
    pub fn txid(&self) -> Hash {
        hash256(&serialize(self))
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|i| OUTPOINT_SIZE + var_int_size(i.script_sig.len() as u64) + i.script_sig.len() + 4)
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|o| 8 + var_int_size(o.script_pubkey.len() as u64) + o.script_pubkey.len())
            .sum();
        4 + var_int_size(self.inputs.len() as u64)
            + inputs
            + var_int_size(self.outputs.len() as u64)
            + outputs
            + 4
    }
}
