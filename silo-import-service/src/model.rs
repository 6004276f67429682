use bytes::Bytes;
use silo_common::model::ImportField;

/// Everything a worker node needs to materialise one shard: the opaque
/// chunk produced by the source, the field list of the import and the
/// source tag. Owned by a single chunk job at a time; the chunk bytes are
/// never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardImport {
    pub source_name: String,
    pub chunk: Bytes,
    pub fields: Vec<ImportField>,
}

/// Serde adapter encoding binary chunks as base64 strings in JSON payloads.
pub mod base64_bytes {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        BASE64_STANDARD.encode(value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let decoded = BASE64_STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}
