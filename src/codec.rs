//! The codec port (spec §6) and a `ciborium`-backed reference implementation.

use std::collections::BTreeMap;

use ciborium::value::Value;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{GraphError, Result};

/// `encode`/`decode` over an opaque byte representation. CBOR is the
/// canonical choice (spec §6); decoded maps must use a proto-safe
/// representation, which in Rust is simply a keyed map type rather than a
/// language object — no special handling required, unlike the source
/// ecosystem (spec §9 "Prototype-polluting keys").
pub trait Codec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
    /// Decodes into a generic, order-preserving map — used by callers that
    /// need to inspect a patch or shard payload without a concrete type.
    fn decode_map(&self, bytes: &[u8]) -> Result<BTreeMap<String, Value>>;
}

/// Reference `Codec` implementation over `ciborium`, matching `warp-core`'s
/// and `echo-graph`'s use of CBOR for deterministic binary encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(value, &mut bytes)
            .map_err(|e| GraphError::Codec { message: e.to_string() })?;
        Ok(bytes)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        ciborium::de::from_reader(bytes).map_err(|e| GraphError::Codec { message: e.to_string() })
    }

    fn decode_map(&self, bytes: &[u8]) -> Result<BTreeMap<String, Value>> {
        let value: Value =
            ciborium::de::from_reader(bytes).map_err(|e| GraphError::Codec { message: e.to_string() })?;
        let Value::Map(entries) = value else {
            return Err(GraphError::Codec {
                message: "expected a CBOR map at top level".to_string(),
            });
        };
        let mut map = BTreeMap::new();
        for (k, v) in entries {
            let Value::Text(key) = k else {
                return Err(GraphError::Codec {
                    message: "expected string keys in CBOR map".to_string(),
                });
            };
            map.insert(key, v);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trip() {
        let codec = CborCodec;
        let sample = Sample { a: 7, b: "x".into() };
        let bytes = codec.encode(&sample).unwrap();
        let decoded: Sample = codec.decode(&bytes).unwrap();
        assert_eq!(sample, decoded);
    }

    #[test]
    fn decode_map_rejects_non_map_payloads() {
        let codec = CborCodec;
        let bytes = codec.encode(&42u32).unwrap();
        assert!(codec.decode_map(&bytes).is_err());
    }
}
