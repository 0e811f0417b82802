//! Minimal Solidity ABI encoding for the calls the burn/mint flow makes

use bridge_types::{keccak256, Amount, EvmAddress};

pub const BALANCE_OF: &str = "balanceOf(address)";
pub const ALLOWANCE: &str = "allowance(address,address)";
pub const APPROVE: &str = "approve(address,uint256)";
pub const DEPOSIT_FOR_BURN: &str = "depositForBurn(uint256,uint32,bytes32,address)";
pub const RECEIVE_MESSAGE: &str = "receiveMessage(bytes,bytes)";
pub const MESSAGE_SENT: &str = "MessageSent(bytes)";

const WORD: usize = 32;

/// ABI argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(EvmAddress),
    Uint(u128),
    FixedBytes([u8; 32]),
    Bytes(Vec<u8>),
}

/// First four bytes of the keccak hash of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic-0 of an event signature
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// Encode arguments as head/tail sections
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_size = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_size);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Address(address) => head.extend_from_slice(&address.to_word()),
            Token::Uint(value) => head.extend_from_slice(&uint_word(*value)),
            Token::FixedBytes(bytes) => head.extend_from_slice(bytes),
            Token::Bytes(bytes) => {
                head.extend_from_slice(&uint_word((head_size + tail.len()) as u128));
                tail.extend_from_slice(&uint_word(bytes.len() as u128));
                tail.extend_from_slice(bytes);
                tail.resize(tail.len() + padded_len(bytes.len()) - bytes.len(), 0);
            }
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Encode a function call: selector followed by the arguments
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(tokens));
    data
}

pub fn balance_of(owner: EvmAddress) -> Vec<u8> {
    encode_call(BALANCE_OF, &[Token::Address(owner)])
}

pub fn allowance(owner: EvmAddress, spender: EvmAddress) -> Vec<u8> {
    encode_call(ALLOWANCE, &[Token::Address(owner), Token::Address(spender)])
}

pub fn approve(spender: EvmAddress, amount: Amount) -> Vec<u8> {
    encode_call(APPROVE, &[Token::Address(spender), Token::Uint(amount.units())])
}

pub fn deposit_for_burn(
    amount: Amount,
    destination_domain: u32,
    mint_recipient: EvmAddress,
    burn_token: EvmAddress,
) -> Vec<u8> {
    encode_call(
        DEPOSIT_FOR_BURN,
        &[
            Token::Uint(amount.units()),
            Token::Uint(destination_domain as u128),
            Token::FixedBytes(mint_recipient.to_word()),
            Token::Address(burn_token),
        ],
    )
}

pub fn receive_message(message: &[u8], attestation: &[u8]) -> Vec<u8> {
    encode_call(
        RECEIVE_MESSAGE,
        &[Token::Bytes(message.to_vec()), Token::Bytes(attestation.to_vec())],
    )
}

/// The `index`-th 32-byte word of `data`
pub fn word(data: &[u8], index: usize) -> Option<&[u8]> {
    data.get(index * WORD..(index + 1) * WORD)
}

/// Decode a uint256 that must fit in 128 bits
pub fn decode_uint(word: &[u8]) -> Option<u128> {
    if word.len() != WORD || word[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..]);
    Some(u128::from_be_bytes(buf))
}

pub fn decode_address(word: &[u8]) -> Option<EvmAddress> {
    let word: &[u8; 32] = word.try_into().ok()?;
    Some(EvmAddress::from_word(word))
}

/// Decode the dynamic `bytes` argument whose offset sits in head word `index`
pub fn decode_bytes(data: &[u8], index: usize) -> Option<Vec<u8>> {
    let offset = usize::try_from(decode_uint(word(data, index)?)?).ok()?;
    let len_word = data.get(offset..offset.checked_add(WORD)?)?;
    let len = usize::try_from(decode_uint(len_word)?).ok()?;
    let start = offset + WORD;
    data.get(start..start.checked_add(len)?).map(<[u8]>::to_vec)
}

/// Split call data into its selector and argument section
pub fn split_call(data: &[u8]) -> Option<([u8; 4], &[u8])> {
    let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some((selector, &data[4..]))
}

/// Parse a `0x`-prefixed hex blob
pub fn parse_hex(input: &str) -> Option<Vec<u8>> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(digits).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(selector(BALANCE_OF)), "70a08231");
        assert_eq!(hex::encode(selector(APPROVE)), "095ea7b3");
        assert_eq!(hex::encode(selector(ALLOWANCE)), "dd62ed3e");
        assert_eq!(hex::encode(selector(DEPOSIT_FOR_BURN)), "6fd3504e");
        assert_eq!(hex::encode(selector(RECEIVE_MESSAGE)), "57ecfd28");
    }

    #[test]
    fn test_message_sent_topic() {
        assert_eq!(
            hex::encode(event_topic(MESSAGE_SENT)),
            "8c5261668696ce22758910d05bab8f186d6eb247ceac2af2e82c7dc17669b036"
        );
    }

    #[test]
    fn test_approve_layout() {
        let spender = EvmAddress::from_bytes([0x11; 20]);
        let data = approve(spender, Amount::from_whole(100));
        assert_eq!(data.len(), 4 + 64);
        let (_, args) = split_call(&data).unwrap();
        assert_eq!(decode_address(word(args, 0).unwrap()), Some(spender));
        assert_eq!(decode_uint(word(args, 1).unwrap()), Some(100_000_000));
    }

    #[test]
    fn test_dynamic_bytes_layout() {
        let message = vec![0xab; 33];
        let attestation = vec![0xcd; 65];
        let data = receive_message(&message, &attestation);
        let (_, args) = split_call(&data).unwrap();

        // two head words, then len + 64 padded bytes, then len + 96 padded bytes
        assert_eq!(args.len(), 64 + 32 + 64 + 32 + 96);
        assert_eq!(decode_uint(word(args, 0).unwrap()), Some(64));
        assert_eq!(decode_uint(word(args, 1).unwrap()), Some(64 + 32 + 64));
        assert_eq!(decode_bytes(args, 0), Some(message));
        assert_eq!(decode_bytes(args, 1), Some(attestation));
    }

    #[test]
    fn test_decode_uint_rejects_wide_values() {
        let mut word = [0u8; 32];
        word[0] = 1;
        assert_eq!(decode_uint(&word), None);
        assert_eq!(decode_uint(&[0u8; 31]), None);
    }
}
