//! Text forms of `public_key` and `signature`.
//!
//! Binary layout is one curve byte (`0` = K1, `1` = R1) followed by the raw
//! key (33 bytes) or signature (65 bytes). Text is base58 of the raw bytes
//! plus a 4-byte RIPEMD-160 checksum. WebAuthn keys are not supported.

use ripemd::{Digest, Ripemd160};

use crate::error::CodecError;

pub const PUBLIC_KEY_LEN: usize = 33;
pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    K1,
    R1,
}

impl KeyType {
    pub fn from_byte(b: u8, ty: &str) -> Result<Self, CodecError> {
        match b {
            0 => Ok(Self::K1),
            1 => Ok(Self::R1),
            other => Err(CodecError::invalid(ty, format!("unsupported curve type {other}"))),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::K1 => 0,
            Self::R1 => 1,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::K1 => "K1",
            Self::R1 => "R1",
        }
    }
}

fn checksum(data: &[u8], suffix: &[u8]) -> [u8; 4] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.update(suffix);
    let digest = hasher.finalize();
    [digest[0], digest[1], digest[2], digest[3]]
}

fn encode_with_checksum(data: &[u8], suffix: &[u8]) -> String {
    let mut buf = data.to_vec();
    buf.extend_from_slice(&checksum(data, suffix));
    bs58::encode(buf).into_string()
}

fn decode_with_checksum(
    text: &str,
    len: usize,
    suffix: &[u8],
    ty: &str,
) -> Result<Vec<u8>, CodecError> {
    let raw = bs58::decode(text)
        .into_vec()
        .map_err(|e| CodecError::invalid(ty, e.to_string()))?;
    if raw.len() != len + 4 {
        return Err(CodecError::invalid(
            ty,
            format!("expected {} bytes, got {}", len + 4, raw.len()),
        ));
    }
    let (data, check) = raw.split_at(len);
    if checksum(data, suffix) != check {
        return Err(CodecError::invalid(ty, "checksum mismatch"));
    }
    Ok(data.to_vec())
}

/// `PUB_K1_…` / `PUB_R1_…` for the given curve and key bytes.
pub fn public_key_to_string(kind: KeyType, data: &[u8]) -> String {
    format!(
        "PUB_{}_{}",
        kind.suffix(),
        encode_with_checksum(data, kind.suffix().as_bytes())
    )
}

/// Parse a public key. Legacy `EOS…` keys are accepted as K1.
pub fn string_to_public_key(s: &str) -> Result<(KeyType, Vec<u8>), CodecError> {
    if let Some(rest) = s.strip_prefix("PUB_K1_") {
        return Ok((KeyType::K1, decode_with_checksum(rest, PUBLIC_KEY_LEN, b"K1", "public_key")?));
    }
    if let Some(rest) = s.strip_prefix("PUB_R1_") {
        return Ok((KeyType::R1, decode_with_checksum(rest, PUBLIC_KEY_LEN, b"R1", "public_key")?));
    }
    if let Some(rest) = s.strip_prefix("EOS") {
        return Ok((KeyType::K1, decode_with_checksum(rest, PUBLIC_KEY_LEN, b"", "public_key")?));
    }
    Err(CodecError::invalid("public_key", format!("unrecognised format '{s}'")))
}

pub fn signature_to_string(kind: KeyType, data: &[u8]) -> String {
    format!(
        "SIG_{}_{}",
        kind.suffix(),
        encode_with_checksum(data, kind.suffix().as_bytes())
    )
}

pub fn string_to_signature(s: &str) -> Result<(KeyType, Vec<u8>), CodecError> {
    if let Some(rest) = s.strip_prefix("SIG_K1_") {
        return Ok((KeyType::K1, decode_with_checksum(rest, SIGNATURE_LEN, b"K1", "signature")?));
    }
    if let Some(rest) = s.strip_prefix("SIG_R1_") {
        return Ok((KeyType::R1, decode_with_checksum(rest, SIGNATURE_LEN, b"R1", "signature")?));
    }
    Err(CodecError::invalid("signature", format!("unrecognised format '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_round_trip() {
        let mut data = vec![0x02];
        data.extend((1..=32).map(|i| i as u8));
        let text = public_key_to_string(KeyType::K1, &data);
        assert!(text.starts_with("PUB_K1_"));
        let (kind, back) = string_to_public_key(&text).unwrap();
        assert_eq!(kind, KeyType::K1);
        assert_eq!(back, data);
    }

    #[test]
    fn legacy_key_uses_plain_checksum() {
        let data = vec![0x03; PUBLIC_KEY_LEN];
        let legacy = format!("EOS{}", encode_with_checksum(&data, b""));
        let (kind, back) = string_to_public_key(&legacy).unwrap();
        assert_eq!(kind, KeyType::K1);
        assert_eq!(back, data);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let data = vec![0x01; SIGNATURE_LEN];
        let text = signature_to_string(KeyType::R1, &data);
        // swap the curve tag so the checksum suffix no longer matches
        let tampered = text.replacen("SIG_R1_", "SIG_K1_", 1);
        assert!(string_to_signature(&tampered).is_err());
        assert_eq!(string_to_signature(&text).unwrap().1, data);
    }
}
