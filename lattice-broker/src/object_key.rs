use bytes::{Buf, BufMut};

use crate::error::CallError;

/// Size of the fixed header: 8 byte type id + 4 byte instance-key length.
pub const KEY_HEADER_LEN: usize = 12;

// The wire layout, with field-name(size in bytes):
// ------------------------------------------------
// | TYPE ID(8) | INSTANCEKEY | INSTANCEKEY       |
// |            | LENGTH(4)   |   (length bytes)  |
// ------------------------------------------------
// Both integers are big-endian. This layout is decoded by existing
// deployments and must stay byte-exact.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// The identifier embedded in every reference minted by a factory.
pub struct ObjectKey {
    pub type_id: u64,
    pub instance_key: Vec<u8>,
}

impl ObjectKey {
    pub fn new(type_id: u64, instance_key: Vec<u8>) -> Self {
        Self {
            type_id,
            instance_key,
        }
    }

    /// Encodes the key into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(KEY_HEADER_LEN + self.instance_key.len());
        buf.put_u64(self.type_id);
        buf.put_u32(self.instance_key.len() as u32);
        buf.put_slice(&self.instance_key);
        buf
    }

    /// Decodes a wire-form key, validating the embedded length.
    pub fn decode(raw: &[u8]) -> Result<Self, CallError> {
        if raw.len() < KEY_HEADER_LEN {
            return Err(CallError::MalformedKey);
        }

        let mut cursor = raw;
        let type_id = cursor.get_u64();
        let key_len = cursor.get_u32() as usize;
        if cursor.remaining() != key_len {
            return Err(CallError::MalformedKey);
        }

        Ok(Self {
            type_id,
            instance_key: cursor.to_vec(),
        })
    }

    /// Checks whether a raw key was minted for the given type.
    ///
    /// Length consistency is validated before the id comparison, a malformed
    /// key classifies as "not same type" rather than erroring.
    pub fn matches_type(raw: &[u8], type_id: u64) -> bool {
        match Self::decode(raw) {
            Ok(key) => key.type_id == type_id,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for key in [b"".to_vec(), b"k".to_vec(), vec![0xAB; 300]] {
            let original = ObjectKey::new(0x0011_2233_4455_6677, key);
            let decoded = ObjectKey::decode(&original.encode()).expect("Decode OK");
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_wire_layout_is_byte_exact() {
        let encoded = ObjectKey::new(1, vec![0xFF, 0xEE]).encode();
        assert_eq!(
            encoded,
            vec![0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2, 0xFF, 0xEE],
        );
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        assert!(matches!(
            ObjectKey::decode(&[0; 11]),
            Err(CallError::MalformedKey)
        ));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut encoded = ObjectKey::new(7, vec![1, 2, 3]).encode();
        encoded.pop();
        assert!(matches!(
            ObjectKey::decode(&encoded),
            Err(CallError::MalformedKey)
        ));

        let mut encoded = ObjectKey::new(7, vec![1, 2, 3]).encode();
        encoded.push(0);
        assert!(matches!(
            ObjectKey::decode(&encoded),
            Err(CallError::MalformedKey)
        ));
    }

    #[test]
    fn test_matches_type() {
        let encoded = ObjectKey::new(42, b"instance".to_vec()).encode();
        assert!(ObjectKey::matches_type(&encoded, 42));
        assert!(!ObjectKey::matches_type(&encoded, 43));
        assert!(!ObjectKey::matches_type(&encoded[..10], 42));
    }
}
