//! EIP-1559 (type `0x02`) transaction encoding, signing, and decoding.

use crate::address::Address;
use crate::error::{ProveItError, Result};
use crate::ledger::abi::keccak256;
use crate::ledger::signer::{address_of, SigningIdentity};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use rlp::{Rlp, RlpStream};

const TX_TYPE: u8 = 0x02;
const EMPTY_ACCESS_LIST: [u8; 1] = [0xc0];

/// Unsigned dynamic-fee transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Tx {
    /// Chain the signature is bound to.
    pub chain_id: u64,
    /// Sender account nonce.
    pub nonce: u64,
    /// Tip per gas unit, in wei.
    pub max_priority_fee_per_gas: u128,
    /// Fee cap per gas unit, in wei.
    pub max_fee_per_gas: u128,
    /// Gas budget.
    pub gas_limit: u64,
    /// Call target.
    pub to: Address,
    /// Transferred value, in wei.
    pub value: u128,
    /// Calldata.
    pub input: Vec<u8>,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// Type byte followed by the RLP payload.
    pub raw: Vec<u8>,
    /// Keccak of `raw`, the transaction id.
    pub hash: [u8; 32],
}

impl SignedTx {
    /// `0x`-prefixed raw bytes.
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    /// `0x`-prefixed transaction id.
    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }
}

/// A decoded, signature-checked transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTx {
    /// Transaction fields.
    pub tx: Eip1559Tx,
    /// Sender recovered from the signature.
    pub from: Address,
    /// Transaction id.
    pub hash: [u8; 32],
}

impl Eip1559Tx {
    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.chain_id);
        stream.append(&self.nonce);
        stream.append(&self.max_priority_fee_per_gas);
        stream.append(&self.max_fee_per_gas);
        stream.append(&self.gas_limit);
        let to: &[u8] = self.to.as_bytes();
        stream.append(&to);
        stream.append(&self.value);
        stream.append(&self.input.as_slice());
        stream.append_raw(&EMPTY_ACCESS_LIST, 1);
    }

    /// Keccak of `0x02 || rlp([chain_id, ..., access_list])`.
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        keccak256(&typed_payload(stream.out().as_ref()))
    }

    /// Signs with `signer` and produces the raw envelope.
    pub fn sign(&self, signer: &SigningIdentity) -> Result<SignedTx> {
        let (sig, recid) = signer.sign_prehash(&self.signing_hash())?;
        let (r, s) = sig.split_bytes();
        let mut stream = RlpStream::new_list(12);
        self.append_fields(&mut stream);
        stream.append(&u64::from(recid.to_byte() & 1));
        stream.append(&trim_leading_zeros(&r[..]));
        stream.append(&trim_leading_zeros(&s[..]));
        let raw = typed_payload(stream.out().as_ref());
        let hash = keccak256(&raw);
        Ok(SignedTx { raw, hash })
    }
}

fn typed_payload(rlp_body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + rlp_body.len());
    out.push(TX_TYPE);
    out.extend_from_slice(rlp_body);
    out
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// Decodes a raw type-2 envelope and recovers its sender.
pub fn decode_signed(raw: &[u8]) -> Result<DecodedTx> {
    if raw.is_empty() {
        return Err(ProveItError::invalid("empty raw transaction"));
    }
    if raw[0] != TX_TYPE {
        return Err(ProveItError::invalid(
            "only EIP-1559 (type 0x02) transactions are supported",
        ));
    }
    let rlp = Rlp::new(&raw[1..]);
    if !rlp.is_list() {
        return Err(ProveItError::invalid("typed transaction payload is not an RLP list"));
    }
    let items = rlp
        .item_count()
        .map_err(|err| ProveItError::invalid(format!("invalid rlp item count: {err}")))?;
    if items != 12 {
        return Err(ProveItError::invalid(format!(
            "expected 12 rlp fields for type-2 tx, found {items}"
        )));
    }

    let to_bytes = rlp_bytes(&rlp, 5)?;
    if to_bytes.len() != 20 {
        return Err(ProveItError::invalid(
            "contract creation transactions are not supported",
        ));
    }
    let mut to = [0u8; 20];
    to.copy_from_slice(to_bytes);

    let tx = Eip1559Tx {
        chain_id: rlp_u64(&rlp, 0)?,
        nonce: rlp_u64(&rlp, 1)?,
        max_priority_fee_per_gas: rlp_u128(&rlp, 2)?,
        max_fee_per_gas: rlp_u128(&rlp, 3)?,
        gas_limit: rlp_u64(&rlp, 4)?,
        to: Address::from_bytes(to),
        value: rlp_u128(&rlp, 6)?,
        input: rlp_bytes(&rlp, 7)?.to_vec(),
    };
    let access_list = rlp
        .at(8)
        .map_err(|err| ProveItError::invalid(format!("missing access list: {err}")))?;
    if access_list.as_raw() != EMPTY_ACCESS_LIST {
        return Err(ProveItError::invalid("access lists are not supported"));
    }

    let y_parity = rlp_u64(&rlp, 9)?;
    if y_parity > 1 {
        return Err(ProveItError::invalid("invalid y parity in signature"));
    }
    let r32 = left_pad_32(rlp_bytes(&rlp, 10)?)?;
    let s32 = left_pad_32(rlp_bytes(&rlp, 11)?)?;

    let sig = Signature::from_scalars(r32, s32)
        .map_err(|err| ProveItError::invalid(format!("invalid signature scalars: {err}")))?;
    let recid = RecoveryId::from_byte(y_parity as u8)
        .ok_or_else(|| ProveItError::invalid("invalid signature recovery id"))?;
    let vk = VerifyingKey::recover_from_prehash(&tx.signing_hash(), &sig, recid)
        .map_err(|err| ProveItError::invalid(format!("signature recovery failed: {err}")))?;

    Ok(DecodedTx {
        from: address_of(&vk),
        hash: keccak256(raw),
        tx,
    })
}

fn rlp_bytes<'a>(rlp: &Rlp<'a>, index: usize) -> Result<&'a [u8]> {
    rlp.at(index)
        .map_err(|err| ProveItError::invalid(format!("missing rlp field {index}: {err}")))?
        .data()
        .map_err(|err| ProveItError::invalid(format!("invalid rlp field {index}: {err}")))
}

fn rlp_u64(rlp: &Rlp<'_>, index: usize) -> Result<u64> {
    let bytes = rlp_bytes(rlp, index)?;
    if bytes.len() > 8 {
        return Err(ProveItError::invalid(format!("rlp field {index} overflows u64")));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn rlp_u128(rlp: &Rlp<'_>, index: usize) -> Result<u128> {
    let bytes = rlp_bytes(rlp, index)?;
    if bytes.len() > 16 {
        return Err(ProveItError::invalid(format!("rlp field {index} overflows u128")));
    }
    Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

fn left_pad_32(bytes: &[u8]) -> Result<[u8; 32]> {
    if bytes.len() > 32 {
        return Err(ProveItError::invalid("signature component exceeds 32 bytes"));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}
