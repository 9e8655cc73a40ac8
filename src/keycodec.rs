//! Bit-stable encodings for edge keys and property keys (spec §3).

/// `"{from}\0{to}\0{label}"`.
pub fn encode_edge_key(from: &str, to: &str, label: &str) -> String {
    format!("{from}\0{to}\0{label}")
}

pub fn decode_edge_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut parts = key.splitn(3, '\0');
    let from = parts.next()?;
    let to = parts.next()?;
    let label = parts.next()?;
    Some((from, to, label))
}

/// Node property key: `"{nodeId}\0{key}"`.
pub fn encode_node_prop_key(node: &str, key: &str) -> String {
    format!("{node}\0{key}")
}

/// Edge property key: `"\x01{from}\0{to}\0{label}\0{key}"`. The leading
/// byte distinguishes the edge-property domain from the node-property
/// domain so the two never collide in the flat `prop` map.
pub fn encode_edge_prop_key(from: &str, to: &str, label: &str, key: &str) -> String {
    format!("\u{1}{from}\0{to}\0{label}\0{key}")
}

/// A decoded property key: either a node property or an edge property.
#[derive(Debug, Eq, PartialEq)]
pub enum PropKey<'a> {
    Node { node: &'a str, key: &'a str },
    Edge {
        from: &'a str,
        to: &'a str,
        label: &'a str,
        key: &'a str,
    },
}

pub fn decode_prop_key(encoded: &str) -> Option<PropKey<'_>> {
    if let Some(rest) = encoded.strip_prefix('\u{1}') {
        let mut parts = rest.splitn(4, '\0');
        let from = parts.next()?;
        let to = parts.next()?;
        let label = parts.next()?;
        let key = parts.next()?;
        Some(PropKey::Edge {
            from,
            to,
            label,
            key,
        })
    } else {
        let (node, key) = encoded.split_once('\0')?;
        Some(PropKey::Node { node, key })
    }
}
