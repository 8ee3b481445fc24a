/// Value codec: serializer plus the compression envelope
pub mod envelope;
pub mod serializer;

pub use serializer::Serializer;

use crate::error::{TejidoError, TejidoResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Prefix a key with the client namespace: `ns:key`, or `key` when `ns` is empty.
pub fn merge_key(namespace: &str, key: &str) -> String {
    if namespace.is_empty() {
        key.to_string()
    } else {
        let mut merged = String::with_capacity(namespace.len() + key.len() + 1);
        merged.push_str(namespace);
        merged.push(':');
        merged.push_str(key);
        merged
    }
}

/// Per-client codec settings applied to every byte-valued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueCodec {
    pub serializer: Serializer,
    /// Envelope threshold; zero stores values raw
    pub threshold: usize,
    /// Reject raw values of at least this many bytes; zero disables the check
    pub max_byte_size: usize,
}

impl ValueCodec {
    pub fn new(serializer: Serializer, threshold: usize, max_byte_size: usize) -> Self {
        Self {
            serializer,
            threshold,
            max_byte_size,
        }
    }

    /// Size check plus envelope, for a value about to be written
    pub fn wrap(&self, raw: &[u8]) -> TejidoResult<Vec<u8>> {
        if self.max_byte_size > 0 && raw.len() >= self.max_byte_size {
            return Err(TejidoError::operation(format!(
                "value of {} bytes exceeds max.byte.size {}",
                raw.len(),
                self.max_byte_size
            )));
        }
        envelope::encode(raw, self.threshold)
    }

    /// Strip the envelope from a stored value
    pub fn unwrap(&self, stored: &[u8]) -> TejidoResult<Vec<u8>> {
        envelope::decode(stored, self.threshold)
    }

    pub fn to_bytes<T: Serialize + ?Sized>(&self, value: &T) -> TejidoResult<Vec<u8>> {
        self.serializer.serialize(value)
    }

    pub fn from_bytes<T: DeserializeOwned>(&self, raw: &[u8]) -> TejidoResult<T> {
        self.serializer.deserialize(raw)
    }

    /// Decode a stored, enveloped value as text
    pub fn stored_text(&self, stored: &[u8]) -> TejidoResult<String> {
        let raw = self.unwrap(stored)?;
        self.serializer.decode_text(&raw)
    }
}
