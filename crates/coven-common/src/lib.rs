//! Common utilities for Coven indexers
//!
//! Conversions between the EVM primitive types and their storage (BLOB) and
//! display (lowercase hex) forms.

use primitive_types::{H160, H256, U256};

// ===== Address conversions =====

/// Convert an address to a 20-byte BLOB for storage
pub fn address_to_blob(address: H160) -> Vec<u8> {
    address.as_bytes().to_vec()
}

/// Convert BLOB back to an address.
///
/// Shorter inputs are right-aligned (zero padded on the left); longer inputs
/// keep their trailing 20 bytes.
pub fn blob_to_address(bytes: &[u8]) -> H160 {
    let mut arr = [0u8; 20];
    let len = bytes.len().min(20);
    arr[20 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    H160::from(arr)
}

/// Canonical account id: `0x` followed by 40 lowercase hex digits
pub fn address_to_hex(address: H160) -> String {
    format!("{address:#x}")
}

/// Parse a `0x`-prefixed (or bare) hex address, case-insensitive.
///
/// Returns `None` unless the input holds exactly 20 bytes.
pub fn parse_address(value: &str) -> Option<H160> {
    let stripped = value
        .trim()
        .strip_prefix("0x")
        .or_else(|| value.trim().strip_prefix("0X"))
        .unwrap_or_else(|| value.trim());
    let bytes = hex::decode(stripped).ok()?;
    if bytes.len() != 20 {
        return None;
    }
    Some(H160::from_slice(&bytes))
}

// ===== Hash conversions =====

/// Convert H256 to a 32-byte BLOB
pub fn hash_to_blob(hash: H256) -> Vec<u8> {
    hash.as_bytes().to_vec()
}

/// Convert BLOB back to H256 (big-endian, left padded)
pub fn blob_to_hash(bytes: &[u8]) -> H256 {
    let mut arr = [0u8; 32];
    let len = bytes.len().min(32);
    arr[32 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    H256::from(arr)
}

// ===== U256 conversions =====

/// Convert U256 to a variable-length BLOB (big-endian, leading zeros stripped).
///
/// Zero is stored as a single `0x00` byte.
pub fn u256_to_blob(value: U256) -> Vec<u8> {
    let bytes = value.to_big_endian();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(31);
    bytes[start..].to_vec()
}

/// Convert BLOB back to U256 (big-endian). Empty input is zero.
pub fn blob_to_u256(bytes: &[u8]) -> U256 {
    if bytes.is_empty() {
        return U256::zero();
    }
    let len = bytes.len().min(32);
    U256::from_big_endian(&bytes[bytes.len() - len..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_blob_roundtrip_and_padding() {
        let address = H160::from_low_u64_be(0xabcdef);
        assert_eq!(blob_to_address(&address_to_blob(address)), address);
        assert_eq!(blob_to_address(&[0xab, 0xcd, 0xef]), address);
    }

    #[test]
    fn test_address_hex_is_lowercase() {
        let address = parse_address("0x5180db8F5c931aaE63c74266b211F580155ecac8").unwrap();
        assert_eq!(
            address_to_hex(address),
            "0x5180db8f5c931aae63c74266b211f580155ecac8"
        );
    }

    #[test]
    fn test_parse_address_rejects_wrong_length() {
        assert!(parse_address("0x1234").is_none());
        assert!(parse_address("not hex").is_none());
        assert!(parse_address("0000000000000000000000000000000000000000").is_some());
    }

    #[test]
    fn test_u256_blob_is_compact() {
        assert_eq!(u256_to_blob(U256::zero()), vec![0u8]);
        assert_eq!(u256_to_blob(U256::from(256u64)), vec![1u8, 0]);
        assert_eq!(u256_to_blob(U256::MAX).len(), 32);
        assert_eq!(blob_to_u256(&u256_to_blob(U256::MAX)), U256::MAX);
        assert_eq!(blob_to_u256(&[]), U256::zero());
    }

    #[test]
    fn test_hash_blob_left_pads() {
        assert_eq!(blob_to_hash(&[1]), H256::from_low_u64_be(1));
    }
}
