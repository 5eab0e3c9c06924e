pub mod bincode;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errdata;
use crate::error::Result;
use crate::Error;

/// Trait for element types persisted inside chunk blobs.
///
/// Sequences are generic over their element type; anything serializable and
/// cheaply clonable qualifies. Working arrays are handed out by value, hence
/// the Clone bound.
pub trait Cell: Serialize + DeserializeOwned + Clone + Send + Sync {}

impl<T> Cell for T where T: Serialize + DeserializeOwned + Clone + Send + Sync {}

/// Encode a value into a framed blob: `[crc64: u64 BE][bincode payload]`.
///
/// Every blob written to the store carries this frame so corruption is
/// detected at the read boundary rather than deep inside decode.
pub fn encode_framed<T: Serialize>(value: &T) -> Vec<u8> {
    let payload = bincode::serialize(value);

    let mut digest = crc64fast::Digest::new();
    digest.write(&payload);
    let checksum = digest.sum64();

    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.write_u64::<BigEndian>(checksum).unwrap();
    buf.extend_from_slice(&payload);
    buf
}

/// Decode a framed blob, verifying its checksum.
pub fn decode_framed<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut cursor = std::io::Cursor::new(bytes);
    let stored = cursor
        .read_u64::<BigEndian>()
        .map_err(|_| Error::InvalidData("truncated blob frame".to_string()))?;

    let payload = &bytes[8..];
    let mut digest = crc64fast::Digest::new();
    digest.write(payload);
    if digest.sum64() != stored {
        return errdata!("blob checksum mismatch");
    }

    bincode::deserialize(payload)
}
