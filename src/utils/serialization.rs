// Canonical binary encoding used for persistence and for every hash in the ledger.
// Byte sequences are length-prefixed and sequences keep their order, so encoding is
// deterministic and decoding reproduces the exact value.
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

fn config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Encode a value with the ledger's canonical bincode configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(data, config())
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Decode a value, rejecting input with bytes left over after the value
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let (data, read) = bincode::decode_from_slice(bytes, config())
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    if read != bytes.len() {
        return Err(BlockchainError::Serialization(format!(
            "Deserialization failed: {} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct Record {
        key: Vec<u8>,
        index: i64,
        parts: Vec<Vec<u8>>,
    }

    #[test]
    fn test_encoding_preserves_order_and_empty_fields() {
        let original = Record {
            key: vec![],
            index: -1,
            parts: vec![vec![3], vec![], vec![1, 2]],
        };

        let encoded = serialize(&original).expect("Serialization should work");
        let decoded: Record = deserialize(&encoded).expect("Deserialization should work");

        assert_eq!(original, decoded);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let record = Record {
            key: b"tip".to_vec(),
            index: 7,
            parts: vec![vec![9; 32]],
        };
        assert_eq!(serialize(&record).unwrap(), serialize(&record.clone()).unwrap());
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let mut encoded = serialize(&vec![1u8, 2, 3]).unwrap();
        encoded.push(0);
        let result: Result<Vec<u8>> = deserialize(&encoded);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid_bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<Record> = deserialize(&invalid_bytes);
        assert!(result.is_err());
    }
}
