//! Serde helpers for opaque payloads.
//!
//! Payloads are raw bytes inside the engine and standard base64 on the wire.
//! Use with `#[serde(with = "crate::encoding::base64_payload")]`.

/// Standard base64 with padding.
pub mod base64_payload {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Encode bytes as a base64 string.
    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Decode a base64 string. A missing field is an empty payload.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("payload is not valid base64: {e}")))
    }
}
