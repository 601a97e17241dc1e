//! Engine configuration
//!
//! Loaded from JSON or built in code; every field has a default so a partial
//! document such as `{"coinbase_maturity": 2}` is valid.

use crate::constants::{COINBASE_MATURITY, MAINNET_MAGIC, MIN_CONFIRMATIONS};
use crate::error::{ChainError, Result};
use crate::types::Hash;
use serde::{Deserialize, Serialize};

/// How `organize` resolves tips with equal cumulative difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// keep the tip selected by the previous organize
    #[default]
    PreferCurrent,
    /// pick the candidate inserted earliest
    PreferFirstSeen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Confirmations before a coinbase output is spendable
    pub coinbase_maturity: u32,
    /// Confirmations before a regular output is spendable
    pub min_confirmations: u32,
    pub tie_break: TieBreak,
    /// Genesis in display (byte-reversed) hex; if unset, the first header
    /// whose parent is the all-zero hash
    #[serde(with = "display_hash")]
    pub genesis_hash: Option<Hash>,
    pub zero_conf_enabled: bool,
    pub verify_merkle_root: bool,
    pub verify_proof_of_work: bool,
    /// Record marker expected by the framed block source
    pub magic_bytes: [u8; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coinbase_maturity: COINBASE_MATURITY,
            min_confirmations: MIN_CONFIRMATIONS,
            tie_break: TieBreak::default(),
            genesis_hash: None,
            zero_conf_enabled: true,
            verify_merkle_root: true,
            verify_proof_of_work: false,
            magic_bytes: MAINNET_MAGIC,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_confirmations == 0 {
            return Err(ChainError::Config(
                "min_confirmations must be at least 1".to_string(),
            ));
        }
        if self.coinbase_maturity == 0 {
            return Err(ChainError::Config(
                "coinbase_maturity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

mod display_hash {
    use crate::types::{hash_hex, Hash};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Option<Hash>, serializer: S) -> Result<S::Ok, S::Error> {
        match hash {
            Some(h) => serializer.serialize_some(&hash_hex(h)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Hash>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        let Some(text) = text else {
            return Ok(None);
        };
        let bytes = hex::decode(&text).map_err(D::Error::custom)?;
        if bytes.len() != 32 {
            return Err(D::Error::custom(format!(
                "genesis hash must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut hash = [0u8; 32];
        for (dst, src) in hash.iter_mut().zip(bytes.iter().rev()) {
            *dst = *src;
        }
        Ok(Some(hash))
    }
}
