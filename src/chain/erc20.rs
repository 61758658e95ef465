//! ERC-20 calldata encoding and decoding.
//!
//! Selectors are recomputed from the canonical signatures (keccak-256, first
//! four bytes) rather than hardcoded, and every argument is encoded as a
//! 32-byte big-endian word.

use sha3::{Digest, Keccak256};

const TRANSFER_SIG: &str = "transfer(address,uint256)";
const APPROVE_SIG: &str = "approve(address,uint256)";
const BALANCE_OF_SIG: &str = "balanceOf(address)";

/// First four bytes of the keccak-256 hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn address_bytes(address: &str) -> Option<[u8; 20]> {
    let body = address.strip_prefix("0x")?;
    let raw = hex::decode(body).ok()?;
    raw.try_into().ok()
}

fn push_address_word(out: &mut Vec<u8>, address: [u8; 20]) {
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(&address);
}

fn push_amount_word(out: &mut Vec<u8>, amount: u128) {
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&amount.to_be_bytes());
}

fn encode_call(sig: &str, build: impl FnOnce(&mut Vec<u8>)) -> String {
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&selector(sig));
    build(&mut data);
    format!("0x{}", hex::encode(data))
}

/// `transfer(recipient, amount)` calldata. None when the address is malformed.
pub fn transfer_calldata(recipient: &str, amount: u128) -> Option<String> {
    let recipient = address_bytes(recipient)?;
    Some(encode_call(TRANSFER_SIG, |data| {
        push_address_word(data, recipient);
        push_amount_word(data, amount);
    }))
}

/// `approve(spender, 2^256 - 1)` calldata, the one-time maximal allowance.
pub fn approve_max_calldata(spender: &str) -> Option<String> {
    let spender = address_bytes(spender)?;
    Some(encode_call(APPROVE_SIG, |data| {
        push_address_word(data, spender);
        data.extend_from_slice(&[0xff_u8; 32]);
    }))
}

/// `balanceOf(holder)` calldata.
pub fn balance_of_calldata(holder: &str) -> Option<String> {
    let holder = address_bytes(holder)?;
    Some(encode_call(BALANCE_OF_SIG, |data| {
        push_address_word(data, holder);
    }))
}

/// A recognized ERC-20 call, decoded from raw calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedErc20 {
    Transfer { to: String, amount: u128 },
    Approve { spender: String, amount: u128 },
    BalanceOf { holder: String },
}

fn word_address(word: &[u8]) -> String {
    format!("0x{}", hex::encode(&word[12..32]))
}

/// Reads a uint256 word into a u128, saturating when the value exceeds it
/// (the maximal-approval word decodes to `u128::MAX`).
fn word_amount(word: &[u8]) -> u128 {
    if word[..16].iter().any(|b| *b != 0) {
        return u128::MAX;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..32]);
    u128::from_be_bytes(low)
}

/// Decodes calldata against the three signatures this runtime emits.
pub fn decode_erc20(data: &str) -> Option<DecodedErc20> {
    let raw = hex::decode(data.strip_prefix("0x")?).ok()?;
    if raw.len() < 4 {
        return None;
    }
    let (sel, args) = raw.split_at(4);
    if sel == selector(TRANSFER_SIG) && args.len() == 64 {
        Some(DecodedErc20::Transfer {
            to: word_address(&args[..32]),
            amount: word_amount(&args[32..64]),
        })
    } else if sel == selector(APPROVE_SIG) && args.len() == 64 {
        Some(DecodedErc20::Approve {
            spender: word_address(&args[..32]),
            amount: word_amount(&args[32..64]),
        })
    } else if sel == selector(BALANCE_OF_SIG) && args.len() == 32 {
        Some(DecodedErc20::BalanceOf {
            holder: word_address(&args[..32]),
        })
    } else {
        None
    }
}
