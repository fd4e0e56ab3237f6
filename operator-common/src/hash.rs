use flate2::Crc;
use serde::Serialize;

/// CRC32 (IEEE) over `bytes`. The checksum of an empty input is 0.
pub fn content_hash(bytes: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(bytes);
    crc.sum()
}

/// Hash the JSON serialization of `value`.
///
/// `serde_json::Map` keeps keys sorted, so maps hash the same regardless of
/// the order they were built in.
pub fn json_hash<T: Serialize + ?Sized>(value: &T) -> Result<u32, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(content_hash(&bytes))
}
