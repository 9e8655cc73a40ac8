//! The join reducer (spec §4.1): applies operations to a [`State`],
//! producing a [`Diff`] of what actually changed.
//!
//! Operations are a closed sum type dispatched through a single `match` —
//! no virtual calls, no open polymorphism (spec §9 "Dynamic dispatch of
//! operations"). Unknown tags are forward-compatible no-ops.

use crate::dot::EventId;
use crate::error::{ErrorContext, GraphError, Result};
use crate::keycodec::{encode_edge_key, encode_edge_prop_key, encode_node_prop_key};
use crate::lww::Lww;
use crate::patch::{CanonicalOp, Op, Patch, PropValue};
use crate::state::{Diff, State};

/// Decodes the wire-level `PropSet` into the canonical node/edge variant the
/// reducer actually applies. The leading `\x01` byte on the `node` field
/// marks an edge-property set (spec §3 "Operation variants").
fn canonicalize(op: Op) -> Option<CanonicalOp> {
    match op {
        Op::NodeAdd { node, dot } => Some(CanonicalOp::NodeAdd { node, dot }),
        Op::NodeRemove { node, observed_dots } => {
            Some(CanonicalOp::NodeRemove { node, observed_dots })
        }
        Op::EdgeAdd { from, to, label, dot } => {
            Some(CanonicalOp::EdgeAdd { from, to, label, dot })
        }
        Op::EdgeRemove {
            from,
            to,
            label,
            observed_dots,
        } => Some(CanonicalOp::EdgeRemove {
            from,
            to,
            label,
            observed_dots,
        }),
        Op::PropSet { node, key, value } => {
            if let Some(rest) = node.strip_prefix('\u{1}') {
                let mut parts = rest.splitn(3, '\0');
                let from = parts.next()?.to_string();
                let to = parts.next()?.to_string();
                let label = parts.next()?.to_string();
                Some(CanonicalOp::EdgePropSet {
                    from,
                    to,
                    label,
                    key,
                    value,
                })
            } else {
                Some(CanonicalOp::NodePropSet { node, key, value })
            }
        }
        Op::BlobValue { .. } | Op::Unknown => None,
    }
}

fn validate_non_empty(field: &str, value: &str, ctx: &ErrorContext) -> Result<()> {
    if value.is_empty() {
        return Err(GraphError::patch_malformed(
            format!("field `{field}` must be a non-empty string"),
            ctx.clone(),
        ));
    }
    Ok(())
}

/// Applies a single canonical op to `state`, returning the diff
/// contribution (possibly empty — an entry is produced only when aliveness
/// or LWW winner actually transitions, spec §4.1).
fn apply_canonical(state: &mut State, op: CanonicalOp, event_id: &EventId, ctx: &ErrorContext) -> Result<Diff> {
    let mut diff = Diff::new();
    match op {
        CanonicalOp::NodeAdd { node, dot } => {
            validate_non_empty("node", &node, ctx)?;
            state.observed_frontier.advance(&dot.writer, dot.counter);
            let became_alive = state.node_alive.add(node.clone(), dot);
            if became_alive {
                diff.nodes_added.push(node);
            }
        }
        CanonicalOp::NodeRemove { node, observed_dots } => {
            validate_non_empty("node", &node, ctx)?;
            for dot in &observed_dots {
                state.observed_frontier.advance(&dot.writer, dot.counter);
            }
            let became_dead = state.node_alive.remove(&node, &observed_dots);
            if became_dead {
                diff.nodes_removed.push(node);
            }
        }
        CanonicalOp::EdgeAdd {
            from,
            to,
            label,
            dot,
        } => {
            validate_non_empty("from", &from, ctx)?;
            validate_non_empty("to", &to, ctx)?;
            validate_non_empty("label", &label, ctx)?;
            state.observed_frontier.advance(&dot.writer, dot.counter);
            let key = encode_edge_key(&from, &to, &label);
            let became_alive = state.edge_alive.add(key.clone(), dot);
            let is_newer_birth = state
                .edge_birth_event
                .get(&key)
                .map(|existing| event_id > existing)
                .unwrap_or(true);
            if is_newer_birth {
                state.edge_birth_event.insert(key.clone(), event_id.clone());
            }
            if became_alive {
                diff.edges_added.push(key);
            }
        }
        CanonicalOp::EdgeRemove {
            from,
            to,
            label,
            observed_dots,
        } => {
            validate_non_empty("from", &from, ctx)?;
            validate_non_empty("to", &to, ctx)?;
            validate_non_empty("label", &label, ctx)?;
            for dot in &observed_dots {
                state.observed_frontier.advance(&dot.writer, dot.counter);
            }
            let key = encode_edge_key(&from, &to, &label);
            let became_dead = state.edge_alive.remove(&key, &observed_dots);
            if became_dead {
                diff.edges_removed.push(key);
            }
        }
        CanonicalOp::NodePropSet { node, key, value } => {
            validate_non_empty("node", &node, ctx)?;
            let prop_key = encode_node_prop_key(&node, &key);
            apply_prop_set(state, prop_key, value, event_id, &mut diff);
        }
        CanonicalOp::EdgePropSet {
            from,
            to,
            label,
            key,
            value,
        } => {
            validate_non_empty("from", &from, ctx)?;
            validate_non_empty("to", &to, ctx)?;
            validate_non_empty("label", &label, ctx)?;
            let edge_key = encode_edge_key(&from, &to, &label);
            // Reject property writes that predate this edge's current
            // incarnation — see SPEC_FULL §9's resolution of the
            // edgeBirthEvent open question.
            if let Some(birth) = state.edge_birth_event.get(&edge_key) {
                if event_id < birth {
                    return Ok(diff);
                }
            }
            let prop_key = encode_edge_prop_key(&from, &to, &label, &key);
            apply_prop_set(state, prop_key, value, event_id, &mut diff);
        }
    }
    Ok(diff)
}

fn apply_prop_set(
    state: &mut State,
    prop_key: String,
    value: PropValue,
    event_id: &EventId,
    diff: &mut Diff,
) {
    let incoming = Lww::new(event_id.clone(), value);
    let existing = state.prop.remove(&prop_key);
    let (winner, changed) = crate::lww::join_option(existing, incoming);
    if changed {
        diff.props_changed.push((prop_key.clone(), winner.value.clone()));
    }
    state.prop.insert(prop_key, winner);
}

/// Applies a single op to `state` with no diff tracking — the fast path
/// (spec §4.1 `applyOp`).
pub fn apply_op(state: &mut State, op: Op, event_id: &EventId) -> Result<()> {
    let ctx = ErrorContext::new().writer(event_id.writer.clone());
    if let Some(canonical) = canonicalize(op) {
        apply_canonical(state, canonical, event_id, &ctx)?;
    }
    Ok(())
}

/// Applies every op in `patch` to `state`, building up a combined [`Diff`]
/// and the `EventId`s from `(patch.lamport, patch.writer_id, sha, opIndex)`
/// (spec §4.1 `applyWithDiff`).
pub fn apply_with_diff(state: &mut State, patch: &Patch, sha: &str) -> Result<Diff> {
    let mut diff = Diff::new();
    let ctx = ErrorContext::new()
        .writer(patch.writer_id.clone())
        .sha(sha.to_string());
    for (idx, op) in patch.operations.iter().enumerate() {
        let event_id = EventId::new(patch.lamport, patch.writer_id.clone(), sha.to_string(), idx as u32);
        if let Some(canonical) = canonicalize(op.clone()) {
            let op_diff = apply_canonical(state, canonical, &event_id, &ctx)?;
            diff.merge(op_diff);
        }
    }
    state.observed_frontier.advance(&patch.writer_id, patch.lamport_counter_hint());
    Ok(diff)
}

/// What a caller wants back from [`reduce`].
pub enum ReduceOptions {
    /// Just the folded state.
    StateOnly,
    /// The folded state plus the combined diff across all patches.
    WithDiff,
}

pub enum ReduceOutput {
    State(State),
    StateAndDiff(State, Diff),
}

impl ReduceOutput {
    pub fn into_state(self) -> State {
        match self {
            ReduceOutput::State(s) => s,
            ReduceOutput::StateAndDiff(s, _) => s,
        }
    }
}

/// Folds `patches` (each paired with its commit sha) into `state` (or a
/// fresh [`State`] if `None`), in the given order. The result does not
/// depend on that order as long as it is a linear extension of the causal
/// order (spec §4.1, §8 commutativity/associativity).
pub fn reduce(
    state: Option<State>,
    patches: &[(Patch, String)],
    options: ReduceOptions,
) -> Result<ReduceOutput> {
    let mut state = state.unwrap_or_default();
    let mut total_diff = Diff::new();
    for (patch, sha) in patches {
        let diff = apply_with_diff(&mut state, patch, sha)?;
        if matches!(options, ReduceOptions::WithDiff) {
            total_diff.merge(diff);
        }
    }
    Ok(match options {
        ReduceOptions::StateOnly => ReduceOutput::State(state),
        ReduceOptions::WithDiff => ReduceOutput::StateAndDiff(state, total_diff),
    })
}

impl Patch {
    /// The frontier contribution of this patch for its own writer: every
    /// patch a writer commits is itself a causal event at `lamport`, so the
    /// writer's frontier must reach at least `lamport` even if the patch
    /// contains no ops that reference a dot directly (e.g. a pure
    /// `PropSet`-only patch).
    fn lamport_counter_hint(&self) -> u64 {
        self.lamport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;
    use crate::patch::Op;
    use proptest::prelude::*;

    fn add_node_patch(writer: &str, lamport: u64, node: &str) -> (Patch, String) {
        (
            Patch::new(
                writer,
                lamport,
                vec![Op::NodeAdd {
                    node: node.to_string(),
                    dot: Dot::new(writer, lamport),
                }],
            ),
            format!("sha-{writer}-{lamport}"),
        )
    }

    #[test]
    fn node_add_then_remove() {
        let mut state = State::new();
        let dot = Dot::new("w1", 1);
        apply_op(&mut state, Op::NodeAdd { node: "n1".into(), dot: dot.clone() }, &EventId::new(1, "w1", "sha", 0)).unwrap();
        assert!(state.is_node_alive("n1"));
        apply_op(
            &mut state,
            Op::NodeRemove { node: "n1".into(), observed_dots: vec![dot] },
            &EventId::new(2, "w1", "sha", 0),
        )
        .unwrap();
        assert!(!state.is_node_alive("n1"));
    }

    #[test]
    fn redundant_add_emits_no_diff() {
        let mut state = State::new();
        let patch = Patch::new(
            "w1",
            1,
            vec![Op::NodeAdd {
                node: "n1".into(),
                dot: Dot::new("w1", 1),
            }],
        );
        apply_with_diff(&mut state, &patch, "sha1").unwrap();
        let diff = apply_with_diff(&mut state, &patch, "sha1").unwrap();
        assert!(diff.nodes_added.is_empty());
    }

    #[test]
    fn unknown_op_is_skipped() {
        let mut state = State::new();
        apply_op(&mut state, Op::Unknown, &EventId::new(1, "w1", "sha", 0)).unwrap();
        assert_eq!(state.node_alive.len(), 0);
    }

    #[test]
    fn malformed_empty_node_id_fails() {
        let mut state = State::new();
        let err = apply_op(
            &mut state,
            Op::NodeAdd { node: String::new(), dot: Dot::new("w1", 1) },
            &EventId::new(1, "w1", "sha", 0),
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::PatchMalformed { .. }));
    }

    #[test]
    fn edge_prop_set_rejected_before_any_birth_is_accepted_leniently() {
        let mut state = State::new();
        let patch = Patch::new(
            "w1",
            1,
            vec![Op::PropSet {
                node: "\u{1}a\0b\0knows".to_string(),
                key: "since".to_string(),
                value: PropValue::Blob { id: "x".into() },
            }],
        );
        let diff = apply_with_diff(&mut state, &patch, "sha1").unwrap();
        assert_eq!(diff.props_changed.len(), 1);
    }

    proptest! {
        #[test]
        fn commutative_across_two_independent_writers(n1 in "[a-d]", n2 in "[a-d]") {
            prop_assume!(n1 != n2);
            let p1 = add_node_patch("w1", 1, &n1);
            let p2 = add_node_patch("w2", 1, &n2);

            let forward = reduce(None, &[p1.clone(), p2.clone()], ReduceOptions::StateOnly).unwrap().into_state();
            let backward = reduce(None, &[p2, p1], ReduceOptions::StateOnly).unwrap().into_state();

            prop_assert_eq!(forward.is_node_alive(&n1), backward.is_node_alive(&n1));
            prop_assert_eq!(forward.is_node_alive(&n2), backward.is_node_alive(&n2));
        }

        #[test]
        fn idempotent_reapply_of_same_patch(n in "[a-d]") {
            let p = add_node_patch("w1", 1, &n);
            let mut state = State::new();
            apply_with_diff(&mut state, &p.0, &p.1).unwrap();
            let before = state.is_node_alive(&n);
            apply_with_diff(&mut state, &p.0, &p.1).unwrap();
            prop_assert_eq!(state.is_node_alive(&n), before);
        }
    }
}
