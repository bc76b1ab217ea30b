//! Stacks address codec
//!
//! The xReserve contract takes the destination recipient as a fixed `bytes32`.
//! A Stacks standard principal is a c32check string carrying a version byte and
//! a 20-byte hash160. Layout of the 32-byte recipient:
//!
//! ```text
//! | zero padding (11 bytes) | version (1 byte) | hash160 (20 bytes) |
//! ```

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Crockford-style alphabet used by c32check
const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

const PAYLOAD_LEN: usize = 20;
const CHECKSUM_LEN: usize = 4;
const PADDING_LEN: usize = 32 - 1 - PAYLOAD_LEN;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with 'S'")]
    MissingPrefix,

    #[error("invalid c32 character '{0}'")]
    InvalidCharacter(char),

    #[error("decoded payload has {0} bytes, expected 24")]
    InvalidLength(usize),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("address is not in canonical form")]
    NonCanonical,

    #[error("recipient padding bytes are not zero")]
    NonZeroPadding,

    #[error("version {0} is out of range")]
    VersionOutOfRange(u8),
}

/// A decoded Stacks standard principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StacksAddress {
    version: u8,
    hash160: [u8; PAYLOAD_LEN],
}

impl StacksAddress {
    pub fn new(version: u8, hash160: [u8; PAYLOAD_LEN]) -> Result<Self, AddressError> {
        if version >= 32 {
            return Err(AddressError::VersionOutOfRange(version));
        }
        Ok(Self { version, hash160 })
    }
}

impl FromStr for StacksAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix('S').ok_or(AddressError::MissingPrefix)?;
        let mut chars = body.chars();
        let version_char = chars.next().ok_or(AddressError::InvalidLength(0))?;
        let version = c32_value(version_char)?;

        let decoded = c32_decode(chars.as_str())?;
        if decoded.len() != PAYLOAD_LEN + CHECKSUM_LEN {
            return Err(AddressError::InvalidLength(decoded.len()));
        }

        let (payload, checksum) = decoded.split_at(PAYLOAD_LEN);
        if checksum != c32_checksum(version, payload) {
            return Err(AddressError::ChecksumMismatch);
        }

        let mut hash160 = [0u8; PAYLOAD_LEN];
        hash160.copy_from_slice(payload);
        let address = StacksAddress { version, hash160 };

        // Reject strings that decode but are not what we would emit
        if address.to_string() != s {
            return Err(AddressError::NonCanonical);
        }

        Ok(address)
    }
}

impl fmt::Display for StacksAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = Vec::with_capacity(PAYLOAD_LEN + CHECKSUM_LEN);
        data.extend_from_slice(&self.hash160);
        data.extend_from_slice(&c32_checksum(self.version, &self.hash160));

        write!(
            f,
            "S{}{}",
            C32_ALPHABET[self.version as usize] as char,
            c32_encode(&data)
        )
    }
}

/// The 32-byte recipient word passed to `depositToRemote`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteRecipient([u8; 32]);

impl RemoteRecipient {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<&StacksAddress> for RemoteRecipient {
    fn from(address: &StacksAddress) -> Self {
        let mut word = [0u8; 32];
        word[PADDING_LEN] = address.version;
        word[PADDING_LEN + 1..].copy_from_slice(&address.hash160);
        RemoteRecipient(word)
    }
}

impl TryFrom<[u8; 32]> for RemoteRecipient {
    type Error = AddressError;

    fn try_from(word: [u8; 32]) -> Result<Self, Self::Error> {
        if word[..PADDING_LEN].iter().any(|b| *b != 0) {
            return Err(AddressError::NonZeroPadding);
        }
        if word[PADDING_LEN] >= 32 {
            return Err(AddressError::VersionOutOfRange(word[PADDING_LEN]));
        }
        Ok(RemoteRecipient(word))
    }
}

/// Encode a destination address into the relay's recipient word
pub fn encode(destination: &str) -> Result<RemoteRecipient, AddressError> {
    let address: StacksAddress = destination.parse()?;
    Ok(RemoteRecipient::from(&address))
}

/// Decode a recipient word back into the destination address
pub fn decode(recipient: &RemoteRecipient) -> Result<String, AddressError> {
    let word = recipient.as_bytes();
    let mut hash160 = [0u8; PAYLOAD_LEN];
    hash160.copy_from_slice(&word[PADDING_LEN + 1..]);
    let address = StacksAddress::new(word[PADDING_LEN], hash160)?;
    Ok(address.to_string())
}

fn c32_value(c: char) -> Result<u8, AddressError> {
    C32_ALPHABET
        .iter()
        .position(|&a| a as char == c)
        .map(|p| p as u8)
        .ok_or(AddressError::InvalidCharacter(c))
}

fn c32_checksum(version: u8, payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut preimage = Vec::with_capacity(1 + payload.len());
    preimage.push(version);
    preimage.extend_from_slice(payload);

    let digest = Sha256::digest(Sha256::digest(&preimage));
    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(&digest[..CHECKSUM_LEN]);
    checksum
}

/// c32 encoding: big-endian bytes as base-32 digits, one '0' per leading zero byte
fn c32_encode(data: &[u8]) -> String {
    let leading_zeros = data.iter().take_while(|b| **b == 0).count();

    // 5-bit groups from the least significant end
    let mut digits = Vec::with_capacity(data.len() * 8 / 5 + 1);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for byte in data.iter().rev() {
        acc |= (*byte as u32) << bits;
        bits += 8;
        while bits >= 5 {
            digits.push((acc & 0x1f) as u8);
            acc >>= 5;
            bits -= 5;
        }
    }
    if bits > 0 {
        digits.push((acc & 0x1f) as u8);
    }

    while digits.last() == Some(&0) {
        digits.pop();
    }

    let mut out = String::with_capacity(leading_zeros + digits.len());
    out.extend(std::iter::repeat('0').take(leading_zeros));
    out.extend(digits.iter().rev().map(|d| C32_ALPHABET[*d as usize] as char));
    out
}

fn c32_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let values = input.chars().map(c32_value).collect::<Result<Vec<_>, _>>()?;
    let leading_zeros = values.iter().take_while(|v| **v == 0).count();

    let mut bytes = Vec::with_capacity(values.len() * 5 / 8 + 1);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for value in values.iter().rev() {
        acc |= (*value as u32) << bits;
        bits += 5;
        while bits >= 8 {
            bytes.push((acc & 0xff) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        bytes.push((acc & 0xff) as u8);
    }

    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes.extend(std::iter::repeat(0).take(leading_zeros));
    bytes.reverse();
    Ok(bytes)
}
