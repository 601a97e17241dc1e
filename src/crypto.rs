//! Hash capability consumed by the codec and the address layer
//!
//! Only the digest compositions Bitcoin needs live here; the primitives come
//! from `sha2` and `ripemd`.

use crate::types::{Addr20, Hash};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Double SHA256
pub fn hash256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// RIPEMD160 of SHA256
pub fn hash160(data: &[u8]) -> Addr20 {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}
