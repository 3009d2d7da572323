// Bincode helpers used for every persisted and hashed structure
use crate::error::{Result, WalletError};
use bincode::config::{Configuration, standard};
use serde::{Deserialize, Serialize};

// Varint lengths, little endian. Changing this breaks existing wallet files.
fn wire_config() -> Configuration {
    standard()
}

pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(data, wire_config())
        .map_err(|e| WalletError::Serialization(format!("encoding failed: {e}")))
}

/// Decodes a whole buffer; leftover bytes mean the blob is not what we expected
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let (value, read) = bincode::decode_from_slice(bytes, wire_config())
        .map_err(|e| WalletError::Serialization(format!("decoding failed: {e}")))?;
    if read != bytes.len() {
        return Err(WalletError::Serialization(format!(
            "{} trailing bytes after decoding",
            bytes.len() - read
        )));
    }
    Ok(value)
}
