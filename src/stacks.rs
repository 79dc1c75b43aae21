//! Stacks chain utility codecs.
//!
//! Local building blocks for the `/stacks/*` endpoints: c32check address
//! encoding and validation, Clarity wire-value decoding, signed-message
//! digests, and secp256k1 signature recovery. Anything that needs chain
//! state (balances, names, transactions) goes through the lookup adapter
//! instead.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Address version bytes in use on Stacks.
pub const VERSION_MAINNET_P2PKH: u8 = 22;
pub const VERSION_MAINNET_P2SH: u8 = 20;
pub const VERSION_TESTNET_P2PKH: u8 = 26;
pub const VERSION_TESTNET_P2SH: u8 = 21;

const SIP018_PREFIX: &[u8] = b"SIP018";
const SIGNED_MESSAGE_PREFIX: &[u8] = b"\x17Stacks Signed Message:\n";

#[derive(Debug, thiserror::Error)]
pub enum StacksError {
    #[error("invalid c32 character: {0}")]
    InvalidC32Char(char),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("truncated clarity value")]
    Truncated,
    #[error("unknown clarity type tag: {0:#04x}")]
    UnknownTypeTag(u8),
    #[error("clarity value too deeply nested")]
    TooDeep,
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// `ripemd160(sha256(data))`, the hash behind both Stacks addresses and the
/// `hash160` endpoint. Must stay bit-identical to the on-chain primitive.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(sha));
    out
}

fn c32_value(c: char) -> Result<u32, StacksError> {
    C32_ALPHABET
        .iter()
        .position(|&a| a == c.to_ascii_uppercase() as u8)
        .map(|p| p as u32)
        .ok_or(StacksError::InvalidC32Char(c))
}

/// Crockford-style base32 encoding with leading-zero-byte preservation.
pub fn c32_encode(data: &[u8]) -> String {
    let mut result: Vec<u8> = Vec::with_capacity(data.len() * 8 / 5 + 2);
    let mut carry: u32 = 0;
    let mut carry_bits: u32 = 0;
    for &byte in data.iter().rev() {
        carry |= (byte as u32) << carry_bits;
        carry_bits += 8;
        while carry_bits >= 5 {
            result.push(C32_ALPHABET[(carry & 0x1F) as usize]);
            carry >>= 5;
            carry_bits -= 5;
        }
    }
    if carry_bits > 0 {
        result.push(C32_ALPHABET[(carry & 0x1F) as usize]);
    }
    while result.last() == Some(&b'0') {
        result.pop();
    }
    let leading_zero_bytes = data.iter().take_while(|&&b| b == 0).count();
    result.extend(std::iter::repeat_n(b'0', leading_zero_bytes));
    result.reverse();
    String::from_utf8(result).unwrap_or_default()
}

/// Inverse of [`c32_encode`].
pub fn c32_decode(input: &str) -> Result<Vec<u8>, StacksError> {
    let mut result: Vec<u8> = Vec::with_capacity(input.len() * 5 / 8 + 1);
    let mut carry: u32 = 0;
    let mut carry_bits: u32 = 0;
    for c in input.chars().rev() {
        carry |= c32_value(c)? << carry_bits;
        carry_bits += 5;
        while carry_bits >= 8 {
            result.push((carry & 0xFF) as u8);
            carry >>= 8;
            carry_bits -= 8;
        }
    }
    if carry_bits > 0 && carry != 0 {
        result.push((carry & 0xFF) as u8);
    }
    while result.last() == Some(&0) {
        result.pop();
    }
    let leading_zero_chars = input.chars().take_while(|&c| c == '0').count();
    result.extend(std::iter::repeat_n(0u8, leading_zero_chars));
    result.reverse();
    Ok(result)
}

/// Builds a c32check address from a version byte and hash160.
pub fn c32_address(version: u8, hash: &[u8; 20]) -> String {
    let mut preimage = Vec::with_capacity(21);
    preimage.push(version);
    preimage.extend_from_slice(hash);
    let checksum = Sha256::digest(Sha256::digest(&preimage));
    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(hash);
    payload.extend_from_slice(&checksum[..4]);
    format!(
        "S{}{}",
        C32_ALPHABET[version as usize & 0x1F] as char,
        c32_encode(&payload)
    )
}

/// Validates a c32check address and returns its version byte and hash160.
pub fn decode_address(address: &str) -> Result<(u8, [u8; 20]), StacksError> {
    let mut chars = address.chars();
    if chars.next() != Some('S') {
        return Err(StacksError::InvalidAddress(
            "address must start with S".to_string(),
        ));
    }
    let version_char = chars
        .next()
        .ok_or_else(|| StacksError::InvalidAddress("address too short".to_string()))?;
    let version = c32_value(version_char)? as u8;
    if !matches!(
        version,
        VERSION_MAINNET_P2PKH | VERSION_MAINNET_P2SH | VERSION_TESTNET_P2PKH | VERSION_TESTNET_P2SH
    ) {
        return Err(StacksError::InvalidAddress(format!(
            "unknown address version: {version}"
        )));
    }
    let body = c32_decode(chars.as_str())?;
    if body.len() != 24 {
        return Err(StacksError::InvalidAddress(format!(
            "payload has {} bytes, expected 24",
            body.len()
        )));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&body[..20]);
    let mut preimage = Vec::with_capacity(21);
    preimage.push(version);
    preimage.extend_from_slice(&hash);
    let checksum = Sha256::digest(Sha256::digest(&preimage));
    if checksum[..4] != body[20..] {
        return Err(StacksError::ChecksumMismatch);
    }
    Ok((version, hash))
}

pub fn is_mainnet_version(version: u8) -> bool {
    matches!(version, VERSION_MAINNET_P2PKH | VERSION_MAINNET_P2SH)
}

// ============================================================================
// Signed messages
// ============================================================================

fn varint(n: usize) -> Vec<u8> {
    if n < 0xFD {
        vec![n as u8]
    } else if n <= 0xFFFF {
        let mut v = vec![0xFD];
        v.extend_from_slice(&(n as u16).to_le_bytes());
        v
    } else {
        let mut v = vec![0xFE];
        v.extend_from_slice(&(n as u32).to_le_bytes());
        v
    }
}

/// Digest of a Stacks signed message: `sha256(prefix || varint(len) || msg)`.
pub fn message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SIGNED_MESSAGE_PREFIX);
    hasher.update(varint(message.len()));
    hasher.update(message);
    hasher.finalize().into()
}

/// SIP-018 structured-data digest over precomputed domain and message hashes.
pub fn structured_digest(domain_hash: &[u8; 32], message_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SIP018_PREFIX);
    hasher.update(domain_hash);
    hasher.update(message_hash);
    hasher.finalize().into()
}

fn normalize_recovery(v: u8) -> Result<RecoveryId, StacksError> {
    let v = if v >= 27 { v - 27 } else { v };
    RecoveryId::try_from(v).map_err(|e| StacksError::InvalidSignature(e.to_string()))
}

fn try_recover(
    digest: &[u8; 32],
    rs: &[u8],
    v: u8,
) -> Result<VerifyingKey, StacksError> {
    let signature =
        Signature::from_slice(rs).map_err(|e| StacksError::InvalidSignature(e.to_string()))?;
    let recovery = normalize_recovery(v)?;
    VerifyingKey::recover_from_prehash(digest, &signature, recovery)
        .map_err(|e| StacksError::InvalidSignature(e.to_string()))
}

/// Recovers the signer's public key from a 65-byte signature over `digest`.
///
/// Stacks tooling has emitted both RSV and VRS layouts over time; RSV is
/// tried first, VRS second.
pub fn recover_public_key(digest: &[u8; 32], signature: &[u8]) -> Result<VerifyingKey, StacksError> {
    if signature.len() != 65 {
        return Err(StacksError::InvalidSignature(format!(
            "signature has {} bytes, expected 65",
            signature.len()
        )));
    }
    match try_recover(digest, &signature[..64], signature[64]) {
        Ok(key) => Ok(key),
        Err(rsv_err) => try_recover(digest, &signature[1..], signature[0]).map_err(|_| rsv_err),
    }
}

/// Derives the c32 address of a recovered public key.
pub fn address_of_public_key(key: &VerifyingKey, mainnet: bool) -> String {
    let compressed = key.to_encoded_point(true);
    let hash = hash160(compressed.as_bytes());
    let version = if mainnet {
        VERSION_MAINNET_P2PKH
    } else {
        VERSION_TESTNET_P2PKH
    };
    c32_address(version, &hash)
}

// ============================================================================
// Clarity wire values
// ============================================================================

const CLARITY_MAX_DEPTH: usize = 32;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], StacksError> {
        let end = self.pos.checked_add(n).ok_or(StacksError::Truncated)?;
        if end > self.bytes.len() {
            return Err(StacksError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, StacksError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, StacksError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Decodes a hex-encoded Clarity wire value into a JSON rendering.
pub fn decode_clarity_hex(input: &str) -> Result<serde_json::Value, StacksError> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    let bytes = hex::decode(stripped)?;
    let mut reader = Reader {
        bytes: &bytes,
        pos: 0,
    };
    let value = decode_clarity_value(&mut reader, 0)?;
    if reader.pos != bytes.len() {
        return Err(StacksError::Truncated);
    }
    Ok(value)
}

fn decode_principal(reader: &mut Reader<'_>) -> Result<String, StacksError> {
    let version = reader.u8()?;
    let mut hash = [0u8; 20];
    hash.copy_from_slice(reader.take(20)?);
    Ok(c32_address(version, &hash))
}

fn decode_clarity_value(
    reader: &mut Reader<'_>,
    depth: usize,
) -> Result<serde_json::Value, StacksError> {
    if depth > CLARITY_MAX_DEPTH {
        return Err(StacksError::TooDeep);
    }
    let tag = reader.u8()?;
    let value = match tag {
        0x00 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(reader.take(16)?);
            serde_json::json!({"type": "int", "value": i128::from_be_bytes(bytes).to_string()})
        }
        0x01 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(reader.take(16)?);
            serde_json::json!({"type": "uint", "value": u128::from_be_bytes(bytes).to_string()})
        }
        0x02 => {
            let len = reader.u32()? as usize;
            let bytes = reader.take(len)?;
            serde_json::json!({"type": "buffer", "hex": format!("0x{}", hex::encode(bytes))})
        }
        0x03 => serde_json::json!({"type": "bool", "value": true}),
        0x04 => serde_json::json!({"type": "bool", "value": false}),
        0x05 => {
            let address = decode_principal(reader)?;
            serde_json::json!({"type": "principal", "address": address})
        }
        0x06 => {
            let address = decode_principal(reader)?;
            let name_len = reader.u8()? as usize;
            let name = String::from_utf8_lossy(reader.take(name_len)?).into_owned();
            serde_json::json!({"type": "contractPrincipal", "address": address, "contractName": name})
        }
        0x07 => {
            let inner = decode_clarity_value(reader, depth + 1)?;
            serde_json::json!({"type": "responseOk", "value": inner})
        }
        0x08 => {
            let inner = decode_clarity_value(reader, depth + 1)?;
            serde_json::json!({"type": "responseErr", "value": inner})
        }
        0x09 => serde_json::json!({"type": "none"}),
        0x0a => {
            let inner = decode_clarity_value(reader, depth + 1)?;
            serde_json::json!({"type": "some", "value": inner})
        }
        0x0b => {
            let count = reader.u32()? as usize;
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(decode_clarity_value(reader, depth + 1)?);
            }
            serde_json::json!({"type": "list", "items": items})
        }
        0x0c => {
            let count = reader.u32()? as usize;
            let mut entries = serde_json::Map::new();
            for _ in 0..count {
                let key_len = reader.u8()? as usize;
                let key = String::from_utf8_lossy(reader.take(key_len)?).into_owned();
                entries.insert(key, decode_clarity_value(reader, depth + 1)?);
            }
            serde_json::json!({"type": "tuple", "entries": entries})
        }
        0x0d => {
            let len = reader.u32()? as usize;
            let value = String::from_utf8_lossy(reader.take(len)?).into_owned();
            serde_json::json!({"type": "stringAscii", "value": value})
        }
        0x0e => {
            let len = reader.u32()? as usize;
            let value = String::from_utf8_lossy(reader.take(len)?).into_owned();
            serde_json::json!({"type": "stringUtf8", "value": value})
        }
        other => return Err(StacksError::UnknownTypeTag(other)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boot_address_encodes_correctly() {
        assert_eq!(c32_address(22, &[0u8; 20]), "SP000000000000000000002Q6VF78");
    }

    #[test]
    fn known_hash_round_trips_on_both_networks() {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&hex::decode("a46ff88886c2ef9762d970b4d2c63678835bd39d").unwrap());
        let mainnet = c32_address(22, &hash);
        assert_eq!(mainnet, "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7");
        let testnet = c32_address(26, &hash);
        assert_eq!(testnet, "ST2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKQYAC0RQ");

        for (address, version) in [(mainnet, 22u8), (testnet, 26u8)] {
            let (decoded_version, decoded_hash) = decode_address(&address).unwrap();
            assert_eq!(decoded_version, version);
            assert_eq!(decoded_hash, hash);
        }
    }

    #[test]
    fn corrupted_addresses_fail_the_checksum() {
        let err = decode_address("SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ8").unwrap_err();
        assert!(matches!(
            err,
            StacksError::ChecksumMismatch | StacksError::InvalidAddress(_)
        ));
        assert!(decode_address("0xdeadbeef").is_err());
        assert!(decode_address("SZ000000000000000000002Q6VF78").is_err());
    }

    #[test]
    fn hash160_matches_the_reference() {
        assert_eq!(
            hex::encode(hash160(b"hello")),
            "b6a9c8c230722b7c748331a8b450f05566dc7d0f"
        );
    }

    #[test]
    fn message_digest_matches_the_reference() {
        assert_eq!(
            hex::encode(message_digest(b"hello world")),
            "619997693db23de4b92ed152444a578a134143d9ad2c0f4dff2615de9d42ad96"
        );
    }

    #[test]
    fn recovers_the_signing_key_from_an_rsv_signature() {
        let digest = message_digest(b"hello world");
        let signature = hex::decode(
            "f01d6b9018ab421dd410404cb869072065522bf85734008f105cf385a023a80f\
             5919d2dae18d069583bb4af14e2347b31b4e4ec94c799f48c063418eca576acd00",
        )
        .unwrap();
        let key = recover_public_key(&digest, &signature).unwrap();
        assert_eq!(
            hex::encode(key.to_encoded_point(true).as_bytes()),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(
            address_of_public_key(&key, true),
            "SP1THWXQ8368SDN2MJGE4BMDKMCHZ2GSVTS1X0BPM"
        );
    }

    #[test]
    fn rejects_malformed_signatures() {
        let digest = message_digest(b"hello");
        assert!(recover_public_key(&digest, &[0u8; 10]).is_err());
        assert!(recover_public_key(&digest, &[0u8; 65]).is_err());
    }

    #[test]
    fn decodes_primitive_clarity_values() {
        assert_eq!(
            decode_clarity_hex("0x0100000000000000000000000000000001").unwrap(),
            json!({"type": "uint", "value": "1"})
        );
        assert_eq!(
            decode_clarity_hex("0x00ffffffffffffffffffffffffffffffff").unwrap(),
            json!({"type": "int", "value": "-1"})
        );
        assert_eq!(
            decode_clarity_hex("0x03").unwrap(),
            json!({"type": "bool", "value": true})
        );
        assert_eq!(
            decode_clarity_hex("0x09").unwrap(),
            json!({"type": "none"})
        );
        assert_eq!(
            decode_clarity_hex("0x020000000301af9b").unwrap(),
            json!({"type": "buffer", "hex": "0x01af9b"})
        );
    }

    #[test]
    fn decodes_principals() {
        let value =
            decode_clarity_hex("0x0516a46ff88886c2ef9762d970b4d2c63678835bd39d").unwrap();
        assert_eq!(
            value,
            json!({"type": "principal", "address": "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7"})
        );
    }

    #[test]
    fn decodes_composite_values() {
        // (list u1 u2)
        let value = decode_clarity_hex(
            "0x0b00000002\
             0100000000000000000000000000000001\
             0100000000000000000000000000000002",
        )
        .unwrap();
        assert_eq!(value["type"], "list");
        assert_eq!(value["items"][1]["value"], "2");

        // (ok (some "hi"))
        let value = decode_clarity_hex("0x070a0d000000026869").unwrap();
        assert_eq!(value["type"], "responseOk");
        assert_eq!(value["value"]["value"]["value"], "hi");
    }

    #[test]
    fn rejects_truncated_and_trailing_input() {
        assert!(decode_clarity_hex("0x01000000").is_err());
        assert!(decode_clarity_hex("0x03ff").is_err());
        assert!(decode_clarity_hex("0xfe").is_err());
    }
}
