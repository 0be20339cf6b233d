//! Binary encoding for cached values.
//!
//! Every tier that leaves the process stores `bincode` bytes (optionally
//! compressed). The encoded length is also the size that tier budgets are
//! accounted in, so all tiers agree on what an entry weighs.

use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Value cannot be serialized: {0}")]
    Encode(bincode::Error),

    #[error("Payload cannot be decoded: {0}")]
    Decode(bincode::Error),
}

/// Encode a value.
pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(CodecError::Encode)
}

/// Decode a value previously produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}

/// Size [`encode`] would produce, without allocating the buffer.
pub fn encoded_size(value: &Value) -> Result<u64, CodecError> {
    bincode::serialized_size(value).map_err(CodecError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Column, ColumnData, Opaque, Table};

    #[test]
    fn test_roundtrip_nested() {
        let table = Table::new(vec![
            Column::new("x", ColumnData::Float64(vec![1.5, 2.5])),
            Column::new("ok", ColumnData::Boolean(vec![true, false])),
        ])
        .unwrap();
        let value = Value::List(vec![Value::Text("hello".into()), Value::Table(table), Value::Null]);

        let bytes = encode(&value).unwrap();
        assert_eq!(bytes.len() as u64, encoded_size(&value).unwrap());
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_opaque_fails_to_encode() {
        let value = Value::Map(
            [("conn".to_string(), Value::Opaque(Opaque::new("db", ())))]
                .into_iter()
                .collect(),
        );
        assert!(matches!(encode(&value), Err(CodecError::Encode(_))));
        assert!(encoded_size(&value).is_err());
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(matches!(decode(&[0xff, 0xff, 0xff, 0xff, 0x01]), Err(CodecError::Decode(_))));
    }
}
