//! Stellar strkey (ed25519 public key) validation
//!
//! Account ids are 56 characters of RFC 4648 base32 that decode to 35 bytes:
//! a version byte (`6 << 3`, which renders as a leading `G`), the 32-byte key
//! and a little-endian CRC16-XModem checksum over the first 33 bytes.

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const ACCOUNT_ID_LEN: usize = 56;
const DECODED_LEN: usize = 35;
const VERSION_ACCOUNT_ID: u8 = 6 << 3;

/// True if `value` is a well-formed `G...` account id with a valid checksum
pub fn is_valid_account_id(value: &str) -> bool {
    if value.len() != ACCOUNT_ID_LEN || !value.starts_with('G') {
        return false;
    }
    let Some(raw) = decode_base32(value.as_bytes()) else {
        return false;
    };
    if raw.len() != DECODED_LEN || raw[0] != VERSION_ACCOUNT_ID {
        return false;
    }
    let (payload, checksum) = raw.split_at(DECODED_LEN - 2);
    let expected = crc16_xmodem(payload).to_le_bytes();
    checksum == expected
}

/// Renders a raw ed25519 public key as a `G...` account id
pub fn encode_account_id(key: &[u8; 32]) -> String {
    let mut raw = Vec::with_capacity(DECODED_LEN);
    raw.push(VERSION_ACCOUNT_ID);
    raw.extend_from_slice(key);
    let checksum = crc16_xmodem(&raw).to_le_bytes();
    raw.extend_from_slice(&checksum);
    encode_base32(&raw)
}

fn decode_base32(input: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &ch in input {
        let value = ALPHABET.iter().position(|&a| a == ch)? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    // 56 chars carry exactly 280 bits, so no leftover bits are allowed
    if bits != 0 && buffer & ((1 << bits) - 1) != 0 {
        return None;
    }
    Some(out)
}

fn encode_base32(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in input {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
