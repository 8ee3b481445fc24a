/// Payload serializers for typed values
use crate::error::{ConfigError, TejidoError, TejidoResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::str::FromStr;

/// How typed values become bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    #[default]
    Json,
    Bincode,
}

impl Serializer {
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> TejidoResult<Vec<u8>> {
        match self {
            Serializer::Json => serde_json::to_vec(value)
                .map_err(|e| TejidoError::codec(format!("json encode: {}", e))),
            Serializer::Bincode => bincode::serialize(value)
                .map_err(|e| TejidoError::codec(format!("bincode encode: {}", e))),
        }
    }

    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> TejidoResult<T> {
        match self {
            Serializer::Json => serde_json::from_slice(bytes)
                .map_err(|e| TejidoError::codec(format!("json decode: {}", e))),
            Serializer::Bincode => bincode::deserialize(bytes)
                .map_err(|e| TejidoError::codec(format!("bincode decode: {}", e))),
        }
    }

    /// Read a stored value as text.
    ///
    /// Tries a serialized string first, then (for json) any scalar, then raw
    /// UTF-8, so values written by plain string commands are readable too.
    pub fn decode_text(&self, bytes: &[u8]) -> TejidoResult<String> {
        if let Ok(text) = self.deserialize::<String>(bytes) {
            return Ok(text);
        }
        if *self == Serializer::Json {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) {
                if !value.is_object() && !value.is_array() {
                    return Ok(value.to_string());
                }
            }
        }
        String::from_utf8(bytes.to_vec()).map_err(|e| TejidoError::codec(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Serializer::Json => "json",
            Serializer::Bincode => "bincode",
        }
    }
}

impl FromStr for Serializer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Serializer::Json),
            "bincode" => Ok(Serializer::Bincode),
            other => Err(ConfigError::invalid(
                "serializable",
                format!("unsupported serializer {:?}, expected json or bincode", other),
            )),
        }
    }
}
