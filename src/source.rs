//! Block byte sources
//!
//! The engine never touches storage itself; a [`BlockSource`] hands it raw
//! block payloads together with their offset in whatever backs the source.

use crate::constants::MAX_BLOCK_SIZE;
use crate::error::{ChainError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// One block payload and where it starts in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub bytes: Vec<u8>,
    pub offset: u64,
}

pub trait BlockSource {
    /// Next payload, `None` once the source is exhausted
    fn next_block(&mut self) -> Result<Option<RawBlock>>;
}

/// Reads `magic(4) | size(4, LE) | payload` records, the layout of
/// `blkNNNNN.dat` files. A zeroed magic marks trailing preallocated space.
pub struct FramedBlockSource<R: Read> {
    reader: R,
    magic: [u8; 4],
    position: u64,
}

impl<R: Read> FramedBlockSource<R> {
    pub fn new(reader: R, magic: [u8; 4]) -> Self {
        Self {
            reader,
            magic,
            position: 0,
        }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fill `buf`, returning how many bytes were available before EOF
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChainError::SourceIntegrity(e.to_string())),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> BlockSource for FramedBlockSource<R> {
    fn next_block(&mut self) -> Result<Option<RawBlock>> {
        let mut magic = [0u8; 4];
        match self.read_up_to(&mut magic)? {
            0 => return Ok(None),
            4 => {}
            n => {
                return Err(ChainError::SourceIntegrity(format!(
                    "truncated record marker at offset {} ({} of 4 bytes)",
                    self.position, n
                )))
            }
        }
        if magic == [0u8; 4] {
            return Ok(None);
        }
        if magic != self.magic {
            return Err(ChainError::SourceIntegrity(format!(
                "bad magic {} at offset {}",
                hex::encode(magic),
                self.position
            )));
        }

        let size = self.reader.read_u32::<LittleEndian>().map_err(|e| {
            ChainError::SourceIntegrity(format!("truncated record size at offset {}: {}", self.position, e))
        })? as usize;
        if size > MAX_BLOCK_SIZE {
            return Err(ChainError::SourceIntegrity(format!(
                "record of {} bytes at offset {} exceeds the block size limit",
                size, self.position
            )));
        }

        let mut bytes = vec![0u8; size];
        let got = self.read_up_to(&mut bytes)?;
        if got != size {
            return Err(ChainError::SourceIntegrity(format!(
                "record at offset {} declares {} bytes, only {} present",
                self.position, size, got
            )));
        }

        let offset = self.position + 8;
        self.position = offset + size as u64;
        Ok(Some(RawBlock { bytes, offset }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAINNET_MAGIC;
    use std::io::Cursor;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = MAINNET_MAGIC.to_vec();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_reads_records_with_offsets() {
        let mut data = frame(&[1, 2, 3]);
        data.extend(frame(&[4, 5]));
        let mut source = FramedBlockSource::new(Cursor::new(data), MAINNET_MAGIC);

        let first = source.next_block().unwrap().unwrap();
        assert_eq!(first, RawBlock { bytes: vec![1, 2, 3], offset: 8 });
        let second = source.next_block().unwrap().unwrap();
        assert_eq!(second, RawBlock { bytes: vec![4, 5], offset: 19 });
        assert!(source.next_block().unwrap().is_none());
        assert_eq!(source.position(), 21);
    }

    #[test]
    fn test_zero_padding_ends_source() {
        let mut data = frame(&[1]);
        data.extend_from_slice(&[0u8; 16]);
        let mut source = FramedBlockSource::new(Cursor::new(data), MAINNET_MAGIC);
        assert!(source.next_block().unwrap().is_some());
        assert!(source.next_block().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic() {
        let mut data = frame(&[1]);
        data[0] = 0xaa;
        let mut source = FramedBlockSource::new(Cursor::new(data), MAINNET_MAGIC);
        assert!(matches!(source.next_block(), Err(ChainError::SourceIntegrity(_))));
    }

    #[test]
    fn test_truncated_payload() {
        let mut data = frame(&[1, 2, 3, 4]);
        data.truncate(data.len() - 2);
        let mut source = FramedBlockSource::new(Cursor::new(data), MAINNET_MAGIC);
        assert!(matches!(source.next_block(), Err(ChainError::SourceIntegrity(_))));
    }

    #[test]
    fn test_truncated_marker() {
        let mut source = FramedBlockSource::new(Cursor::new(vec![0xf9, 0xbe]), MAINNET_MAGIC);
        assert!(matches!(source.next_block(), Err(ChainError::SourceIntegrity(_))));
    }
}
