use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::errors::CodecError;

// ============================================================================
// Payload Codec
// ============================================================================
//
// Event and command payloads travel as `Data`: an encoding tag plus opaque
// bytes. Decoding checks the tag first and refuses anything it does not
// understand. JSON is the only encoding in use.
//
// ============================================================================

pub const JSON_ENCODING: &str = "application/json";

/// Tagged, encoded payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    pub encoding: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Data {
    pub fn new(encoding: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            encoding: encoding.into(),
            data,
        }
    }

    /// Encode `value` with the default JSON codec
    pub fn json<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        JsonCodec.encode(value)
    }

    /// Decode with the default JSON codec
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        JsonCodec.decode(self)
    }
}

pub trait PayloadCodec: Send + Sync {
    /// Encoding tag written into every `Data` this codec produces
    fn encoding(&self) -> &'static str;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Data, CodecError>;

    fn decode<T: DeserializeOwned>(&self, data: &Data) -> Result<T, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encoding(&self) -> &'static str {
        JSON_ENCODING
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Data, CodecError> {
        Ok(Data::new(JSON_ENCODING, serde_json::to_vec(value)?))
    }

    fn decode<T: DeserializeOwned>(&self, data: &Data) -> Result<T, CodecError> {
        if data.encoding != JSON_ENCODING {
            return Err(CodecError::InvalidEncoding {
                expected: JSON_ENCODING.to_string(),
                actual: data.encoding.clone(),
            });
        }
        Ok(serde_json::from_slice(&data.data)?)
    }
}

/// Raw bytes as a base64 string inside JSON documents
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
