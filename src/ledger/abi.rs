//! Minimal Solidity ABI codec for the registry contract.
//!
//! Only the shapes the registry uses are covered: `bytes32`, `address`,
//! `uint256` (read back as `u64`), `bool`, and dynamic `string`.

use crate::address::Address;
use crate::digest::Fingerprint;
use crate::error::{ProveItError, Result};
use sha3::{Digest, Keccak256};

/// `register(bytes32,string)`.
pub const REGISTER: &str = "register(bytes32,string)";
/// Revert payload selector for `Error(string)`.
pub const ERROR_STRING: &str = "Error(string)";
/// Revert payload selector for `Panic(uint256)`.
pub const PANIC_UINT: &str = "Panic(uint256)";
/// Event emitted on every successful registration.
pub const HASH_REGISTERED: &str = "HashRegistered(bytes32,address,uint256,string)";

const WORD: usize = 32;

/// Read-only registry getters, all taking a single `bytes32` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Getter {
    /// `verify(bytes32)` returning `(address,uint256,string)`.
    Verify,
    /// `isRegistered(bytes32)` returning `bool`.
    IsRegistered,
    /// `getOwner(bytes32)` returning `address`.
    Owner,
    /// `getTimestamp(bytes32)` returning `uint256`.
    Timestamp,
    /// `getMetadata(bytes32)` returning `string`.
    Metadata,
}

impl Getter {
    /// Every getter, in declaration order.
    pub const ALL: [Getter; 5] = [
        Getter::Verify,
        Getter::IsRegistered,
        Getter::Owner,
        Getter::Timestamp,
        Getter::Metadata,
    ];

    /// Canonical Solidity signature.
    pub fn signature(self) -> &'static str {
        match self {
            Getter::Verify => "verify(bytes32)",
            Getter::IsRegistered => "isRegistered(bytes32)",
            Getter::Owner => "getOwner(bytes32)",
            Getter::Timestamp => "getTimestamp(bytes32)",
            Getter::Metadata => "getMetadata(bytes32)",
        }
    }

    /// 4-byte function selector.
    pub fn selector(self) -> [u8; 4] {
        selector(self.signature())
    }

    /// Looks a getter up by its selector.
    pub fn from_selector(sel: &[u8]) -> Option<Getter> {
        Self::ALL.into_iter().find(|g| g.selector() == sel)
    }
}

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First four bytes of the keccak of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Topic hash of the `HashRegistered` event.
pub fn hash_registered_topic() -> [u8; 32] {
    keccak256(HASH_REGISTERED.as_bytes())
}

/// Left-pads a `u64` into a 32-byte word.
pub fn word_u64(value: u64) -> [u8; 32] {
    let mut out = [0u8; WORD];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Left-pads an address into a 32-byte word.
pub fn word_address(address: &Address) -> [u8; 32] {
    let mut out = [0u8; WORD];
    out[12..].copy_from_slice(address.as_bytes());
    out
}

/// Length word followed by the right-padded UTF-8 bytes.
fn string_tail(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(WORD + padded);
    out.extend_from_slice(&word_u64(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out.resize(WORD + padded, 0);
    out
}

/// Calldata for `register(fingerprint, metadata)`.
pub fn encode_register(fingerprint: &Fingerprint, metadata: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 4 * WORD + metadata.len());
    out.extend_from_slice(&selector(REGISTER));
    out.extend_from_slice(fingerprint.as_bytes());
    out.extend_from_slice(&word_u64(2 * WORD as u64));
    out.extend_from_slice(&string_tail(metadata));
    out
}

/// Calldata for a single-argument getter.
pub fn encode_getter(getter: Getter, fingerprint: &Fingerprint) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + WORD);
    out.extend_from_slice(&getter.selector());
    out.extend_from_slice(fingerprint.as_bytes());
    out
}

/// Splits `register` calldata back into its arguments.
pub fn decode_register_call(input: &[u8]) -> Result<(Fingerprint, String)> {
    if input.len() < 4 || input[..4] != selector(REGISTER) {
        return Err(ProveItError::protocol("calldata is not a register call"));
    }
    let args = &input[4..];
    let fingerprint = Fingerprint::from_bytes(read_word(args, 0)?);
    let offset = word_to_usize(&read_word(args, WORD)?)?;
    let metadata = decode_string_at(args, offset)?;
    Ok((fingerprint, metadata))
}

/// Return data of `verify`: one outer offset, then `(owner, timestamp, offset, string)`.
pub fn encode_registration_tuple(owner: &Address, timestamp: u64, metadata: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 * WORD + metadata.len());
    out.extend_from_slice(&word_u64(WORD as u64));
    out.extend_from_slice(&word_address(owner));
    out.extend_from_slice(&word_u64(timestamp));
    out.extend_from_slice(&word_u64(3 * WORD as u64));
    out.extend_from_slice(&string_tail(metadata));
    out
}

/// Decodes the `verify` return value into `(owner, timestamp, metadata)`.
///
/// Accepts both the struct form (leading offset word of `0x20`) and the flat
/// multi-return form some deployments use.
pub fn decode_registration_tuple(data: &[u8]) -> Result<(Address, u64, String)> {
    let first = read_word(data, 0)?;
    let body = if word_to_usize(&first).ok() == Some(WORD) && data.len() >= 4 * WORD {
        &data[WORD..]
    } else {
        data
    };
    let owner = decode_address(&read_word(body, 0)?)?;
    let timestamp = word_to_u64(&read_word(body, WORD)?)?;
    let offset = word_to_usize(&read_word(body, 2 * WORD)?)?;
    let metadata = decode_string_at(body, offset)?;
    Ok((owner, timestamp, metadata))
}

/// Non-indexed event data `(uint256 timestamp, string metadata)`.
pub fn encode_event_data(timestamp: u64, metadata: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 * WORD + metadata.len());
    out.extend_from_slice(&word_u64(timestamp));
    out.extend_from_slice(&word_u64(2 * WORD as u64));
    out.extend_from_slice(&string_tail(metadata));
    out
}

/// Return data for a `string` result.
pub fn encode_string_return(value: &str) -> Vec<u8> {
    let mut out = word_u64(WORD as u64).to_vec();
    out.extend_from_slice(&string_tail(value));
    out
}

/// Decodes a single `address` return word.
pub fn decode_address(word: &[u8]) -> Result<Address> {
    if word.len() < WORD {
        return Err(ProveItError::protocol("address word too short"));
    }
    if word[..12].iter().any(|b| *b != 0) {
        return Err(ProveItError::protocol("address word has dirty high bytes"));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&word[12..WORD]);
    Ok(Address::from_bytes(out))
}

/// Decodes a single `bool` return word.
pub fn decode_bool(data: &[u8]) -> Result<bool> {
    match word_to_u64(&read_word(data, 0)?)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProveItError::protocol(format!("invalid bool word: {other}"))),
    }
}

/// Decodes a `uint256` return word that must fit in 64 bits.
pub fn decode_u64(data: &[u8]) -> Result<u64> {
    word_to_u64(&read_word(data, 0)?)
}

/// Decodes a lone `string` return value.
pub fn decode_string(data: &[u8]) -> Result<String> {
    let offset = word_to_usize(&read_word(data, 0)?)?;
    decode_string_at(data, offset)
}

/// ABI payload of `Error(reason)`.
pub fn encode_error_reason(reason: &str) -> Vec<u8> {
    let mut out = selector(ERROR_STRING).to_vec();
    out.extend_from_slice(&encode_string_return(reason));
    out
}

/// Human-readable reason from revert data, if it is `Error(string)` or `Panic(uint256)`.
pub fn decode_revert(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (sel, body) = data.split_at(4);
    if sel == selector(ERROR_STRING) {
        return decode_string(body).ok();
    }
    if sel == selector(PANIC_UINT) {
        let code = decode_u64(body).ok()?;
        return Some(format!("panic code 0x{code:02x}"));
    }
    None
}

fn read_word(data: &[u8], at: usize) -> Result<[u8; 32]> {
    let end = at
        .checked_add(WORD)
        .ok_or_else(|| ProveItError::protocol("abi offset overflow"))?;
    let slice = data.get(at..end).ok_or_else(|| {
        ProveItError::protocol(format!("abi data truncated: need {end} bytes, have {}", data.len()))
    })?;
    let mut out = [0u8; WORD];
    out.copy_from_slice(slice);
    Ok(out)
}

fn word_to_u64(word: &[u8; 32]) -> Result<u64> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(ProveItError::protocol("uint256 value exceeds 64 bits"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf))
}

fn word_to_usize(word: &[u8; 32]) -> Result<usize> {
    let value = word_to_u64(word)?;
    usize::try_from(value).map_err(|_| ProveItError::protocol("abi offset exceeds usize"))
}

fn decode_string_at(data: &[u8], offset: usize) -> Result<String> {
    let len = word_to_usize(&read_word(data, offset)?)?;
    let start = offset + WORD;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| ProveItError::protocol("abi string runs past end of data"))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ProveItError::protocol(format!("abi string is not utf-8: {e}")))
}
