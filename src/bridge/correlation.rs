//! Correlation ids ("hook data") linking a deposit to its Stacks mint

use crate::error::{BridgeError, BridgeResult};

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const TIMESTAMP_LEN: usize = 4;
const RANDOM_LEN: usize = 12;

/// Length of a correlation id in bytes
pub const CORRELATION_ID_LEN: usize = TIMESTAMP_LEN + RANDOM_LEN;

/// 4-byte big-endian unix timestamp followed by 96 random bits
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId([u8; CORRELATION_ID_LEN]);

impl CorrelationId {
    /// Generate a fresh id. Never call this twice for one attempt.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CORRELATION_ID_LEN];
        let seconds = Utc::now().timestamp() as u32;
        bytes[..TIMESTAMP_LEN].copy_from_slice(&seconds.to_be_bytes());
        OsRng.fill_bytes(&mut bytes[TIMESTAMP_LEN..]);
        CorrelationId(bytes)
    }

    /// Parse hex text, with or without `0x`, in any case
    pub fn from_hex(text: &str) -> BridgeResult<Self> {
        let trimmed = text.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let decoded = hex::decode(digits)
            .map_err(|e| BridgeError::InvalidCorrelationId(format!("{}: {}", text, e)))?;

        let bytes: [u8; CORRELATION_ID_LEN] = decoded.try_into().map_err(|v: Vec<u8>| {
            BridgeError::InvalidCorrelationId(format!(
                "{}: expected {} bytes, got {}",
                text,
                CORRELATION_ID_LEN,
                v.len()
            ))
        })?;

        Ok(CorrelationId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; CORRELATION_ID_LEN] {
        &self.0
    }

    /// `0x` + lowercase hex, the form embedded on both chains
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.to_hex())
    }
}

impl FromStr for CorrelationId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CorrelationId::from_hex(s)
    }
}

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        CorrelationId::from_hex(&text).map_err(serde::de::Error::custom)
    }
}
