//! ABI encoding for constructor arguments and the index setter calls.

use alloy_core::primitives::{Address, Bytes, keccak256};

/// Signature of the index registration setter.
pub const UPDATE_CONTRACT_SIGNATURE: &str = "updateContract(string,address)";
/// Signature of the ownership hand-off.
pub const TRANSFER_OWNERSHIP_SIGNATURE: &str = "transferOwnership(address)";

const WORD: usize = 32;

/// First four bytes of the keccak-256 hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn address_word(address: Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_slice());
    word
}

fn usize_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

/// Append address constructor arguments to creation bytecode.
pub fn encode_deployment(bytecode: &Bytes, args: &[Address]) -> Bytes {
    let mut data = Vec::with_capacity(bytecode.len() + args.len() * WORD);
    data.extend_from_slice(bytecode);
    for arg in args {
        data.extend_from_slice(&address_word(*arg));
    }
    Bytes::from(data)
}

/// Encode `updateContract(string key, address addr)`.
pub fn encode_update_contract(key: &str, address: Address) -> Bytes {
    let padded_len = key.len().div_ceil(WORD) * WORD;
    let mut data = Vec::with_capacity(4 + 3 * WORD + padded_len);

    data.extend_from_slice(&selector(UPDATE_CONTRACT_SIGNATURE));
    // Head: offset of the dynamic string (two head words), then the address.
    data.extend_from_slice(&usize_word(2 * WORD));
    data.extend_from_slice(&address_word(address));
    // Tail: length, then the bytes right-padded to a word boundary.
    data.extend_from_slice(&usize_word(key.len()));
    data.extend_from_slice(key.as_bytes());
    data.resize(data.len() + padded_len - key.len(), 0);

    Bytes::from(data)
}

/// Encode `transferOwnership(address newOwner)`.
pub fn encode_transfer_ownership(new_owner: Address) -> Bytes {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector(TRANSFER_OWNERSHIP_SIGNATURE));
    data.extend_from_slice(&address_word(new_owner));
    Bytes::from(data)
}

/// A decoded call against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCall {
    UpdateContract { key: String, address: Address },
    TransferOwnership { new_owner: Address },
}

fn word_at(data: &[u8], offset: usize) -> Option<&[u8]> {
    data.get(offset..offset.checked_add(WORD)?)
}

fn decode_address(word: &[u8]) -> Option<Address> {
    if word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_slice(&word[12..]))
}

fn decode_usize(word: &[u8]) -> Option<usize> {
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return None;
    }
    let mut be = [0u8; 8];
    be.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(be)).ok()
}

/// Decode call data produced by [`encode_update_contract`] or
/// [`encode_transfer_ownership`].
pub fn decode_index_call(data: &[u8]) -> Option<IndexCall> {
    let (head, args) = (data.get(..4)?, data.get(4..)?);

    if head == selector(TRANSFER_OWNERSHIP_SIGNATURE) {
        let new_owner = decode_address(word_at(args, 0)?)?;
        return Some(IndexCall::TransferOwnership { new_owner });
    }

    if head == selector(UPDATE_CONTRACT_SIGNATURE) {
        let offset = decode_usize(word_at(args, 0)?)?;
        let address = decode_address(word_at(args, WORD)?)?;
        let len = decode_usize(word_at(args, offset)?)?;
        let start = offset.checked_add(WORD)?;
        let raw = args.get(start..start.checked_add(len)?)?;
        let key = String::from_utf8(raw.to_vec()).ok()?;
        return Some(IndexCall::UpdateContract { key, address });
    }

    None
}

/// Split deployment data into constructor arguments, given the bytecode it
/// starts with.
pub fn decode_deployment_args(bytecode: &[u8], data: &[u8]) -> Option<Vec<Address>> {
    let args = data.strip_prefix(bytecode)?;
    if args.len() % WORD != 0 {
        return None;
    }
    args.chunks(WORD).map(decode_address).collect()
}
