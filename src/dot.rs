//! Dots and event ids: the causal coordinates everything else is built on.

use std::cmp::Ordering;
use std::fmt;

/// A single-writer monotonic event coordinate `(writerId, counter)`.
///
/// Issued monotonically by a single writer; immutable once created. Encoded
/// on the wire as `"{writerId}:{counter}"` (see [`Dot::encode`]).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Dot {
    pub writer: String,
    pub counter: u64,
}

impl Dot {
    pub fn new(writer: impl Into<String>, counter: u64) -> Self {
        Self {
            writer: writer.into(),
            counter,
        }
    }

    /// Byte-stable wire encoding: `"{writerId}:{counter}"`.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.writer, self.counter)
    }

    pub fn decode(s: &str) -> Option<Self> {
        let (writer, counter) = s.rsplit_once(':')?;
        let counter = counter.parse().ok()?;
        Some(Self {
            writer: writer.to_string(),
            counter,
        })
    }
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// A 4-tuple `(lamport, writerId, patchSha, opIndex)` used as the LWW
/// priority. Totally ordered lexicographically on those four fields in that
/// order — the derived [`Ord`] impl does exactly this because the fields
/// are declared in priority order.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EventId {
    pub lamport: u64,
    pub writer: String,
    pub patch_sha: String,
    pub op_index: u32,
}

impl EventId {
    pub fn new(
        lamport: u64,
        writer: impl Into<String>,
        patch_sha: impl Into<String>,
        op_index: u32,
    ) -> Self {
        Self {
            lamport,
            writer: writer.into(),
            patch_sha: patch_sha.into(),
            op_index,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.lamport, self.writer, self.patch_sha, self.op_index
        )
    }
}

/// Compares two event ids the way the join reducer's LWW register does:
/// strictly greater wins, ties keep the existing value. Exposed as a
/// free function since the comparison itself is the documented tie-break
/// rule (spec §3 "Event id"), not just `Ord`.
pub fn event_id_cmp(a: &EventId, b: &EventId) -> Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_roundtrip() {
        let d = Dot::new("writer-a", 7);
        assert_eq!(d.encode(), "writer-a:7");
        assert_eq!(Dot::decode(&d.encode()), Some(d));
    }

    #[test]
    fn event_id_orders_lamport_first() {
        let a = EventId::new(1, "z", "sha-a", 0);
        let b = EventId::new(2, "a", "sha-a", 0);
        assert_eq!(event_id_cmp(&a, &b), Ordering::Less);
    }

    #[test]
    fn event_id_orders_writer_on_lamport_tie() {
        let a = EventId::new(5, "a", "sha-z", 9);
        let b = EventId::new(5, "b", "sha-a", 0);
        assert_eq!(event_id_cmp(&a, &b), Ordering::Less);
    }

    #[test]
    fn event_id_orders_op_index_last() {
        let a = EventId::new(5, "w", "sha", 0);
        let b = EventId::new(5, "w", "sha", 1);
        assert_eq!(event_id_cmp(&a, &b), Ordering::Less);
    }
}
