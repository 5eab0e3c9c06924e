use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Error;

/// Serialize a value using bincode.
pub fn serialize<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("serialization should not fail")
}

/// Deserialize a value from a byte slice using bincode.
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::InvalidData(format!("deserialization failed: {e}")))
}
