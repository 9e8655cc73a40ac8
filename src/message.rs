//! Patch-commit message codec (spec §6 "Patch-commit message format").
//!
//! Commit messages are small CBOR envelopes rather than free text, so a
//! reader can classify a commit (`detect_message_kind`) without touching
//! its tree.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
    Patch,
    Anchor,
    Checkpoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub kind: MessageKind,
    pub graph: String,
    pub writer_id: String,
    pub lamport: u64,
    pub schema: u32,
    pub patch_blob_id: Option<String>,
}

fn encode(envelope: &MessageEnvelope) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(envelope, &mut bytes)
        .map_err(|e| GraphError::Codec { message: e.to_string() })?;
    Ok(bytes)
}

pub fn encode_patch_message(
    graph: &str,
    writer_id: &str,
    lamport: u64,
    schema: u32,
    patch_blob_id: &str,
) -> Result<Vec<u8>> {
    encode(&MessageEnvelope {
        kind: MessageKind::Patch,
        graph: graph.to_string(),
        writer_id: writer_id.to_string(),
        lamport,
        schema,
        patch_blob_id: Some(patch_blob_id.to_string()),
    })
}

pub fn encode_anchor_message(graph: &str, writer_id: &str, lamport: u64, schema: u32) -> Result<Vec<u8>> {
    encode(&MessageEnvelope {
        kind: MessageKind::Anchor,
        graph: graph.to_string(),
        writer_id: writer_id.to_string(),
        lamport,
        schema,
        patch_blob_id: None,
    })
}

pub fn encode_checkpoint_message(graph: &str, lamport: u64, schema: u32, payload_blob_id: &str) -> Result<Vec<u8>> {
    encode(&MessageEnvelope {
        kind: MessageKind::Checkpoint,
        graph: graph.to_string(),
        writer_id: String::new(),
        lamport,
        schema,
        patch_blob_id: Some(payload_blob_id.to_string()),
    })
}

pub fn decode_patch_message(bytes: &[u8]) -> Result<MessageEnvelope> {
    ciborium::de::from_reader(bytes).map_err(|e| GraphError::Codec { message: e.to_string() })
}

pub fn detect_message_kind(bytes: &[u8]) -> Result<MessageKind> {
    decode_patch_message(bytes).map(|envelope| envelope.kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_message_round_trips_and_is_detected() {
        let bytes = encode_patch_message("g1", "w1", 3, 1, "blob-oid").unwrap();
        assert_eq!(detect_message_kind(&bytes).unwrap(), MessageKind::Patch);
        let envelope = decode_patch_message(&bytes).unwrap();
        assert_eq!(envelope.writer_id, "w1");
        assert_eq!(envelope.patch_blob_id.as_deref(), Some("blob-oid"));
    }

    #[test]
    fn anchor_and_checkpoint_kinds_are_distinguishable() {
        let anchor = encode_anchor_message("g1", "w1", 1, 1).unwrap();
        let checkpoint = encode_checkpoint_message("g1", 5, 1, "state-oid").unwrap();
        assert_eq!(detect_message_kind(&anchor).unwrap(), MessageKind::Anchor);
        assert_eq!(detect_message_kind(&checkpoint).unwrap(), MessageKind::Checkpoint);
        assert_eq!(decode_patch_message(&checkpoint).unwrap().patch_blob_id.as_deref(), Some("state-oid"));
    }
}
