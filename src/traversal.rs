//! The deterministic graph traversal engine (spec §4.2): BFS, DFS,
//! (un)weighted shortest path, reachability, A*, bidirectional A*,
//! topological sort, weighted longest path, common ancestors, and
//! connected components — all over a [`NeighborProvider`], all with
//! explicit tie-break rules so output is a pure function of input.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};

use crate::cancel::CancellationToken;
use crate::error::{GraphError, Result};
use crate::neighbor::{Direction, Neighbor, NeighborOptions, NeighborProvider};

/// `maxDepth`/`maxNodes` limits shared by every traversal entry point
/// (spec §4.2).
#[derive(Clone, Copy, Debug, Default)]
pub struct TraversalLimits {
    pub max_depth: Option<usize>,
    pub max_nodes: Option<usize>,
}

/// How often (in visited-node count) the cancellation token is polled —
/// defaults to `GraphConfig::cancellation_poll_interval` at the call site.
#[derive(Clone, Copy, Debug)]
pub struct CancellationPolicy {
    pub token: CancellationToken,
    pub cadence: usize,
}

impl CancellationPolicy {
    pub fn never() -> Self {
        Self { token: CancellationToken::new(), cadence: 0 }
    }
}

fn validate_start<P: NeighborProvider>(provider: &P, start: &str) -> Result<()> {
    if !provider.has_node(start) {
        return Err(GraphError::InvalidStart { node: start.to_string() });
    }
    Ok(())
}

fn neighbors_sorted<P: NeighborProvider>(
    provider: &P,
    node: &str,
    direction: Direction,
    options: &NeighborOptions,
) -> Result<Vec<Neighbor>> {
    let mut list = provider.get_neighbors(node, direction, options)?;
    list.sort_by(|a, b| (a.node_id.as_str(), a.label.as_str()).cmp(&(b.node_id.as_str(), b.label.as_str())));
    list
        .dedup_by(|a, b| a.node_id == b.node_id && a.label == b.label);
    Ok(list)
}

// ---------------------------------------------------------------------
// BFS / DFS
// ---------------------------------------------------------------------

/// Level-order BFS (spec §4.2 "BFS"). Frontier nodes at each level are
/// processed in sorted nodeId order; newly discovered neighbors are
/// deduplicated into a set before entering the next level, so a node
/// reachable from three parents at once is enqueued only once.
pub fn bfs<P: NeighborProvider>(
    provider: &P,
    start: &str,
    limits: TraversalLimits,
    cancellation: &CancellationPolicy,
) -> Result<Vec<String>> {
    validate_start(provider, start)?;
    let mut visited = BTreeSet::new();
    visited.insert(start.to_string());
    let mut order = vec![start.to_string()];
    let mut frontier = vec![start.to_string()];
    let mut depth = 0usize;

    while !frontier.is_empty() {
        if limits.max_depth.map(|d| depth >= d).unwrap_or(false) {
            break;
        }
        frontier.sort();
        let mut next: BTreeSet<String> = BTreeSet::new();
        for node in &frontier {
            cancellation.token.check(order.len(), cancellation.cadence)?;
            let out = neighbors_sorted(provider, node, Direction::Out, &NeighborOptions::default())?;
            for neighbor in out {
                if visited.insert(neighbor.node_id.clone()) {
                    next.insert(neighbor.node_id);
                }
            }
        }
        let mut next: Vec<String> = next.into_iter().collect();
        next.sort();
        for node in &next {
            if limits.max_nodes.map(|m| order.len() >= m).unwrap_or(false) {
                return Ok(order);
            }
            order.push(node.clone());
        }
        frontier = next;
        depth += 1;
    }
    Ok(order)
}

/// Iterative pre-order DFS (spec §4.2 "DFS"): children are pushed in
/// *reverse* sorted order so the lexicographically smallest is popped
/// (and thus visited) first.
pub fn dfs<P: NeighborProvider>(
    provider: &P,
    start: &str,
    limits: TraversalLimits,
    cancellation: &CancellationPolicy,
) -> Result<Vec<String>> {
    validate_start(provider, start)?;
    let mut visited = BTreeSet::new();
    let mut order = Vec::new();
    let mut stack = vec![(start.to_string(), 0usize)];

    while let Some((node, depth)) = stack.pop() {
        if visited.contains(&node) {
            continue;
        }
        cancellation.token.check(order.len(), cancellation.cadence)?;
        visited.insert(node.clone());
        order.push(node.clone());
        if limits.max_nodes.map(|m| order.len() >= m).unwrap_or(false) {
            break;
        }
        if limits.max_depth.map(|d| depth >= d).unwrap_or(false) {
            continue;
        }
        let mut out = neighbors_sorted(provider, &node, Direction::Out, &NeighborOptions::default())?;
        out.reverse();
        for neighbor in out {
            if !visited.contains(&neighbor.node_id) {
                stack.push((neighbor.node_id, depth + 1));
            }
        }
    }
    Ok(order)
}

// ---------------------------------------------------------------------
// Unweighted shortest path / reachability
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnweightedPathResult {
    pub found: bool,
    pub path: Vec<String>,
    pub length: i64,
}

/// Level BFS with predecessor recording (spec §4.2 "Shortest path
/// (unweighted)").
pub fn shortest_path_unweighted<P: NeighborProvider>(
    provider: &P,
    start: &str,
    goal: &str,
    limits: TraversalLimits,
    cancellation: &CancellationPolicy,
) -> Result<UnweightedPathResult> {
    validate_start(provider, start)?;
    if start == goal {
        return Ok(UnweightedPathResult { found: true, path: vec![start.to_string()], length: 0 });
    }
    let mut visited = BTreeSet::new();
    visited.insert(start.to_string());
    let mut predecessor: BTreeMap<String, String> = BTreeMap::new();
    let mut queue = VecDeque::new();
    queue.push_back((start.to_string(), 0usize));
    let mut visited_count = 0usize;

    while let Some((node, depth)) = queue.pop_front() {
        cancellation.token.check(visited_count, cancellation.cadence)?;
        visited_count += 1;
        if limits.max_depth.map(|d| depth >= d).unwrap_or(false) {
            continue;
        }
        let neighbors = neighbors_sorted(provider, &node, Direction::Out, &NeighborOptions::default())?;
        for neighbor in neighbors {
            if visited.insert(neighbor.node_id.clone()) {
                predecessor.insert(neighbor.node_id.clone(), node.clone());
                if neighbor.node_id == goal {
                    let mut path = vec![goal.to_string()];
                    let mut current = goal.to_string();
                    while let Some(prev) = predecessor.get(&current) {
                        path.push(prev.clone());
                        current = prev.clone();
                        if current == start {
                            break;
                        }
                    }
                    path.reverse();
                    return Ok(UnweightedPathResult { found: true, length: (path.len() - 1) as i64, path });
                }
                if limits.max_nodes.map(|m| visited.len() >= m).unwrap_or(false) {
                    return Ok(UnweightedPathResult { found: false, path: Vec::new(), length: -1 });
                }
                queue.push_back((neighbor.node_id, depth + 1));
            }
        }
    }
    Ok(UnweightedPathResult { found: false, path: Vec::new(), length: -1 })
}

/// BFS with early termination (spec §4.2 "Reachability").
pub fn reachable<P: NeighborProvider>(
    provider: &P,
    start: &str,
    goal: &str,
    limits: TraversalLimits,
    cancellation: &CancellationPolicy,
) -> Result<bool> {
    Ok(shortest_path_unweighted(provider, start, goal, limits, cancellation)?.found)
}

// ---------------------------------------------------------------------
// Weight functions
// ---------------------------------------------------------------------

pub enum WeightFn<'a> {
    Edge(&'a dyn Fn(&str, &str, &str) -> f64),
    Node(&'a dyn Fn(&str) -> f64),
    Unweighted,
}

impl<'a> WeightFn<'a> {
    fn validate(edge: bool, node: bool) -> Result<()> {
        if edge && node {
            return Err(GraphError::WeightFnConflict);
        }
        Ok(())
    }

    fn cost(&self, from: &str, to: &str, label: &str, memo: &mut BTreeMap<String, f64>) -> f64 {
        match self {
            WeightFn::Edge(f) => f(from, to, label),
            WeightFn::Node(f) => *memo.entry(to.to_string()).or_insert_with(|| f(to)),
            WeightFn::Unweighted => 1.0,
        }
    }
}

#[derive(Clone, Debug)]
struct HeapEntry {
    cost: f64,
    node: String,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.node == other.node
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the lowest cost
        // first; lexicographically smallest nodeId breaks cost ties.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.cmp(&self.node))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn reconstruct(predecessor: &BTreeMap<String, String>, start: &str, goal: &str) -> Vec<String> {
    let mut path = vec![goal.to_string()];
    let mut current = goal.to_string();
    while current != start {
        match predecessor.get(&current) {
            Some(prev) => {
                path.push(prev.clone());
                current = prev.clone();
            }
            None => break,
        }
    }
    path.reverse();
    path
}

/// Dijkstra's algorithm (spec §4.2 "Weighted shortest path"). The
/// equal-cost predecessor update rule: when a candidate path's cost
/// equals the current best and the candidate predecessor is
/// lexicographically smaller than the current predecessor, the
/// predecessor is updated — this is what makes scenario 3 (`S->B->G`
/// over `S->C->G`) deterministic.
pub fn dijkstra<P: NeighborProvider>(
    provider: &P,
    start: &str,
    goal: &str,
    weight: &WeightFn<'_>,
    limits: TraversalLimits,
    cancellation: &CancellationPolicy,
) -> Result<(Vec<String>, f64)> {
    validate_start(provider, start)?;
    let mut dist: BTreeMap<String, f64> = BTreeMap::new();
    let mut predecessor: BTreeMap<String, String> = BTreeMap::new();
    let mut heap = BinaryHeap::new();
    let mut memo = BTreeMap::new();
    let mut visited_count = 0usize;

    dist.insert(start.to_string(), 0.0);
    heap.push(HeapEntry { cost: 0.0, node: start.to_string() });

    while let Some(HeapEntry { cost, node }) = heap.pop() {
        cancellation.token.check(visited_count, cancellation.cadence)?;
        visited_count += 1;
        if node == goal {
            return Ok((reconstruct(&predecessor, start, goal), cost));
        }
        if cost > *dist.get(&node).unwrap_or(&f64::INFINITY) {
            continue;
        }
        if limits.max_nodes.map(|m| visited_count >= m).unwrap_or(false) {
            break;
        }
        let neighbors = neighbors_sorted(provider, &node, Direction::Out, &NeighborOptions::default())?;
        for neighbor in neighbors {
            let edge_cost = weight.cost(&node, &neighbor.node_id, &neighbor.label, &mut memo);
            let candidate = cost + edge_cost;
            let existing = dist.get(&neighbor.node_id).copied();
            let should_update = match existing {
                None => true,
                Some(best) if candidate < best => true,
                Some(best) if candidate == best => {
                    predecessor.get(&neighbor.node_id).map(|p| node.as_str() < p.as_str()).unwrap_or(true)
                }
                _ => false,
            };
            if should_update {
                dist.insert(neighbor.node_id.clone(), candidate);
                predecessor.insert(neighbor.node_id.clone(), node.clone());
                heap.push(HeapEntry { cost: candidate, node: neighbor.node_id });
            }
        }
    }
    Err(GraphError::NoPath { from: start.to_string(), to: goal.to_string() })
}

/// A* search (spec §4.2 "A* search"): same priority discipline as
/// Dijkstra with `f = g + heuristic`. The heuristic is assumed
/// admissible; this engine does not verify that.
pub fn astar<P: NeighborProvider>(
    provider: &P,
    start: &str,
    goal: &str,
    weight: &WeightFn<'_>,
    heuristic: &dyn Fn(&str) -> f64,
    limits: TraversalLimits,
    cancellation: &CancellationPolicy,
) -> Result<(Vec<String>, f64)> {
    validate_start(provider, start)?;
    let mut g_score: BTreeMap<String, f64> = BTreeMap::new();
    let mut predecessor: BTreeMap<String, String> = BTreeMap::new();
    let mut heap = BinaryHeap::new();
    let mut memo = BTreeMap::new();
    let mut visited_count = 0usize;

    g_score.insert(start.to_string(), 0.0);
    heap.push(HeapEntry { cost: heuristic(start), node: start.to_string() });

    while let Some(HeapEntry { node, .. }) = heap.pop() {
        cancellation.token.check(visited_count, cancellation.cadence)?;
        visited_count += 1;
        if node == goal {
            let g = *g_score.get(&node).unwrap_or(&0.0);
            return Ok((reconstruct(&predecessor, start, goal), g));
        }
        if limits.max_nodes.map(|m| visited_count >= m).unwrap_or(false) {
            break;
        }
        let g_here = *g_score.get(&node).unwrap_or(&f64::INFINITY);
        let neighbors = neighbors_sorted(provider, &node, Direction::Out, &NeighborOptions::default())?;
        for neighbor in neighbors {
            let edge_cost = weight.cost(&node, &neighbor.node_id, &neighbor.label, &mut memo);
            let candidate_g = g_here + edge_cost;
            let existing = g_score.get(&neighbor.node_id).copied();
            let should_update = match existing {
                None => true,
                Some(best) if candidate_g < best => true,
                Some(best) if candidate_g == best => {
                    predecessor.get(&neighbor.node_id).map(|p| node.as_str() < p.as_str()).unwrap_or(true)
                }
                _ => false,
            };
            if should_update {
                g_score.insert(neighbor.node_id.clone(), candidate_g);
                predecessor.insert(neighbor.node_id.clone(), node.clone());
                heap.push(HeapEntry { cost: candidate_g + heuristic(&neighbor.node_id), node: neighbor.node_id });
            }
        }
    }
    Err(GraphError::NoPath { from: start.to_string(), to: goal.to_string() })
}

/// Bidirectional A* (spec §4.2): forward fixed to out-edges, backward to
/// in-edges; expansion alternates on the lower f-front; terminates when
/// `min(fwdF, bwdF) >= mu` (the best path found so far). Backward-edge
/// weights are always evaluated `(from, to, label)` in the graph's
/// original orientation, never the direction of backward travel (spec §9
/// "Backward-expansion weight orientation").
pub fn bidirectional_astar<P: NeighborProvider>(
    provider: &P,
    start: &str,
    goal: &str,
    weight: &WeightFn<'_>,
    heuristic_forward: &dyn Fn(&str) -> f64,
    heuristic_backward: &dyn Fn(&str) -> f64,
    limits: TraversalLimits,
    cancellation: &CancellationPolicy,
) -> Result<(Vec<String>, f64)> {
    validate_start(provider, start)?;
    validate_start(provider, goal)?;
    if start == goal {
        return Ok((vec![start.to_string()], 0.0));
    }

    let mut g_fwd: BTreeMap<String, f64> = BTreeMap::from([(start.to_string(), 0.0)]);
    let mut g_bwd: BTreeMap<String, f64> = BTreeMap::from([(goal.to_string(), 0.0)]);
    let mut pred_fwd: BTreeMap<String, String> = BTreeMap::new();
    let mut succ_bwd: BTreeMap<String, String> = BTreeMap::new();
    let mut heap_fwd = BinaryHeap::new();
    let mut heap_bwd = BinaryHeap::new();
    heap_fwd.push(HeapEntry { cost: heuristic_forward(start), node: start.to_string() });
    heap_bwd.push(HeapEntry { cost: heuristic_backward(goal), node: goal.to_string() });

    let mut memo = BTreeMap::new();
    let mut mu = f64::INFINITY;
    let mut meeting: Option<String> = None;
    let mut visited_count = 0usize;

    loop {
        cancellation.token.check(visited_count, cancellation.cadence)?;
        visited_count += 1;
        if limits.max_nodes.map(|m| visited_count >= m).unwrap_or(false) {
            break;
        }
        let fwd_f = heap_fwd.peek().map(|e| e.cost);
        let bwd_f = heap_bwd.peek().map(|e| e.cost);
        let (Some(ff), Some(bf)) = (fwd_f, bwd_f) else { break };
        if ff.min(bf) >= mu {
            break;
        }

        if ff <= bf {
            let HeapEntry { node, .. } = heap_fwd.pop().expect("peeked");
            let g_here = *g_fwd.get(&node).unwrap_or(&f64::INFINITY);
            let neighbors = neighbors_sorted(provider, &node, Direction::Out, &NeighborOptions::default())?;
            for neighbor in neighbors {
                let edge_cost = weight.cost(&node, &neighbor.node_id, &neighbor.label, &mut memo);
                let candidate = g_here + edge_cost;
                let better = g_fwd.get(&neighbor.node_id).map(|&b| candidate < b).unwrap_or(true);
                if better {
                    g_fwd.insert(neighbor.node_id.clone(), candidate);
                    pred_fwd.insert(neighbor.node_id.clone(), node.clone());
                    heap_fwd.push(HeapEntry {
                        cost: candidate + heuristic_forward(&neighbor.node_id),
                        node: neighbor.node_id.clone(),
                    });
                }
                if let Some(&bg) = g_bwd.get(&neighbor.node_id) {
                    let total = candidate + bg;
                    if total < mu || (total == mu && meeting.as_deref().map(|m| neighbor.node_id.as_str() < m).unwrap_or(true)) {
                        mu = total;
                        meeting = Some(neighbor.node_id.clone());
                    }
                }
            }
        } else {
            let HeapEntry { node, .. } = heap_bwd.pop().expect("peeked");
            let g_here = *g_bwd.get(&node).unwrap_or(&f64::INFINITY);
            // Backward expansion walks in-edges but must still evaluate
            // the weight function with the original (from, to) orientation.
            let neighbors = neighbors_sorted(provider, &node, Direction::In, &NeighborOptions::default())?;
            for neighbor in neighbors {
                let edge_cost = weight.cost(&neighbor.node_id, &node, &neighbor.label, &mut memo);
                let candidate = g_here + edge_cost;
                let better = g_bwd.get(&neighbor.node_id).map(|&b| candidate < b).unwrap_or(true);
                if better {
                    g_bwd.insert(neighbor.node_id.clone(), candidate);
                    succ_bwd.insert(neighbor.node_id.clone(), node.clone());
                    heap_bwd.push(HeapEntry {
                        cost: candidate + heuristic_backward(&neighbor.node_id),
                        node: neighbor.node_id.clone(),
                    });
                }
                if let Some(&fg) = g_fwd.get(&neighbor.node_id) {
                    let total = fg + candidate;
                    if total < mu || (total == mu && meeting.as_deref().map(|m| neighbor.node_id.as_str() < m).unwrap_or(true)) {
                        mu = total;
                        meeting = Some(neighbor.node_id.clone());
                    }
                }
            }
        }
    }

    let Some(meet) = meeting else {
        return Err(GraphError::NoPath { from: start.to_string(), to: goal.to_string() });
    };
    let mut path = reconstruct(&pred_fwd, start, &meet);
    let mut current = meet.clone();
    while let Some(next) = succ_bwd.get(&current) {
        path.push(next.clone());
        current = next.clone();
    }
    Ok((path, mu))
}

// ---------------------------------------------------------------------
// Topological sort / weighted longest path
// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TopoResult {
    pub sorted: Vec<String>,
    pub has_cycle: bool,
    pub back_edge: Option<(String, String)>,
}

/// Kahn's algorithm (spec §4.2 "Topological sort"): phase 1 BFS-discovers
/// every reachable node and computes in-degrees; phase 2 repeatedly pops
/// the lexicographically smallest zero-indegree node from a priority
/// queue (`BTreeSet`, giving `O(n log n)` overall — never `O(n^2)`
/// rescanning).
pub fn topo_sort<P: NeighborProvider>(
    provider: &P,
    start: &str,
    cancellation: &CancellationPolicy,
) -> Result<TopoResult> {
    validate_start(provider, start)?;
    let mut discovered = BTreeSet::new();
    discovered.insert(start.to_string());
    let mut queue = VecDeque::from([start.to_string()]);
    let mut out_edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut in_degree: BTreeMap<String, usize> = BTreeMap::new();
    in_degree.entry(start.to_string()).or_insert(0);

    while let Some(node) = queue.pop_front() {
        let neighbors = neighbors_sorted(provider, &node, Direction::Out, &NeighborOptions::default())?;
        let targets: Vec<String> = neighbors.into_iter().map(|n| n.node_id).collect();
        for target in &targets {
            *in_degree.entry(target.clone()).or_insert(0) += 1;
            if discovered.insert(target.clone()) {
                queue.push_back(target.clone());
            }
        }
        out_edges.insert(node, targets);
    }

    let mut ready: BTreeSet<String> =
        discovered.iter().filter(|n| *in_degree.get(*n).unwrap_or(&0) == 0).cloned().collect();
    let mut sorted = Vec::new();
    let mut visited_count = 0usize;

    while let Some(node) = ready.iter().next().cloned() {
        cancellation.token.check(visited_count, cancellation.cadence)?;
        visited_count += 1;
        ready.remove(&node);
        sorted.push(node.clone());
        if let Some(targets) = out_edges.get(&node) {
            for target in targets {
                let entry = in_degree.entry(target.clone()).or_insert(0);
                *entry -= 1;
                if *entry == 0 {
                    ready.insert(target.clone());
                }
            }
        }
    }

    if sorted.len() < discovered.len() {
        let back_edge = out_edges.iter().find_map(|(from, targets)| {
            targets
                .iter()
                .find(|to| !sorted.contains(*to))
                .map(|to| (from.clone(), to.clone()))
        });
        return Ok(TopoResult { sorted, has_cycle: true, back_edge });
    }
    Ok(TopoResult { sorted, has_cycle: false, back_edge: None })
}

/// Same as [`topo_sort`] but fails `ERR_GRAPH_HAS_CYCLES` instead of
/// returning `has_cycle: true` — the caller picks whichever fits (spec
/// §4.2).
pub fn topo_sort_or_throw<P: NeighborProvider>(
    provider: &P,
    start: &str,
    cancellation: &CancellationPolicy,
) -> Result<Vec<String>> {
    let result = topo_sort(provider, start, cancellation)?;
    if result.has_cycle {
        let (from, to) = result.back_edge.unwrap_or_default();
        return Err(GraphError::GraphHasCycles { from, to });
    }
    Ok(result.sorted)
}

/// Weighted longest path (spec §4.2): topo sort first (fails on cycle),
/// then DP along the topological order with the same
/// lexicographically-smallest-predecessor tie-break as Dijkstra.
pub fn weighted_longest_path<P: NeighborProvider>(
    provider: &P,
    start: &str,
    weight: &WeightFn<'_>,
    cancellation: &CancellationPolicy,
) -> Result<BTreeMap<String, (f64, Vec<String>)>> {
    let order = topo_sort_or_throw(provider, start, cancellation)?;
    let mut best: BTreeMap<String, f64> = BTreeMap::from([(start.to_string(), 0.0)]);
    let mut predecessor: BTreeMap<String, String> = BTreeMap::new();
    let mut memo = BTreeMap::new();

    for node in &order {
        let g_here = match best.get(node) {
            Some(v) => *v,
            None => continue,
        };
        let neighbors = neighbors_sorted(provider, node, Direction::Out, &NeighborOptions::default())?;
        for neighbor in neighbors {
            let candidate = g_here + weight.cost(node, &neighbor.node_id, &neighbor.label, &mut memo);
            let existing = best.get(&neighbor.node_id).copied();
            let should_update = match existing {
                None => true,
                Some(b) if candidate > b => true,
                Some(b) if candidate == b => {
                    predecessor.get(&neighbor.node_id).map(|p| node.as_str() < p.as_str()).unwrap_or(true)
                }
                _ => false,
            };
            if should_update {
                best.insert(neighbor.node_id.clone(), candidate);
                predecessor.insert(neighbor.node_id.clone(), node.clone());
            }
        }
    }

    let mut out = BTreeMap::new();
    for (node, cost) in &best {
        out.insert(node.clone(), (*cost, reconstruct(&predecessor, start, node)));
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Common ancestors / connected component
// ---------------------------------------------------------------------

fn ancestors_of<P: NeighborProvider>(
    provider: &P,
    node: &str,
    cancellation: &CancellationPolicy,
) -> Result<BTreeSet<String>> {
    let mut visited = BTreeSet::new();
    visited.insert(node.to_string());
    let mut queue = VecDeque::from([node.to_string()]);
    let mut visited_count = 0usize;
    while let Some(current) = queue.pop_front() {
        cancellation.token.check(visited_count, cancellation.cadence)?;
        visited_count += 1;
        let neighbors = neighbors_sorted(provider, &current, Direction::In, &NeighborOptions::default())?;
        for neighbor in neighbors {
            if visited.insert(neighbor.node_id.clone()) {
                queue.push_back(neighbor.node_id);
            }
        }
    }
    Ok(visited)
}

/// For each input node, BFS on `in` edges; intersect the results (spec
/// §4.2 "Common ancestors" — a node is its own ancestor at depth 0).
pub fn common_ancestors<P: NeighborProvider>(
    provider: &P,
    nodes: &[String],
    cancellation: &CancellationPolicy,
) -> Result<Vec<String>> {
    let mut iter = nodes.iter();
    let Some(first) = iter.next() else {
        return Ok(Vec::new());
    };
    validate_start(provider, first)?;
    let mut common = ancestors_of(provider, first, cancellation)?;
    for node in iter {
        validate_start(provider, node)?;
        let next = ancestors_of(provider, node, cancellation)?;
        common = common.intersection(&next).cloned().collect();
    }
    Ok(common.into_iter().collect())
}

/// BFS with direction `both`, deduplicated by `(neighborId, label)` (spec
/// §4.2 "Connected component").
pub fn connected_component<P: NeighborProvider>(
    provider: &P,
    start: &str,
    limits: TraversalLimits,
    cancellation: &CancellationPolicy,
) -> Result<Vec<String>> {
    validate_start(provider, start)?;
    let mut visited = BTreeSet::new();
    visited.insert(start.to_string());
    let mut order = vec![start.to_string()];
    let mut queue = VecDeque::from([(start.to_string(), 0usize)]);
    let mut visited_count = 0usize;

    while let Some((node, depth)) = queue.pop_front() {
        cancellation.token.check(visited_count, cancellation.cadence)?;
        visited_count += 1;
        if limits.max_depth.map(|d| depth >= d).unwrap_or(false) {
            continue;
        }
        let neighbors = neighbors_sorted(provider, &node, Direction::Both, &NeighborOptions::default())?;
        for neighbor in neighbors {
            if visited.insert(neighbor.node_id.clone()) {
                order.push(neighbor.node_id.clone());
                if limits.max_nodes.map(|m| order.len() >= m).unwrap_or(false) {
                    return Ok(order);
                }
                queue.push_back((neighbor.node_id, depth + 1));
            }
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;
    use crate::patch::{Op, Patch};
    use crate::reduce::{reduce as fold, ReduceOptions};
    use crate::state::State;

    fn edge(writer: &str, lamport: u64, from: &str, to: &str, label: &str) -> (Patch, String) {
        (
            Patch::new(
                writer,
                lamport,
                vec![Op::EdgeAdd { from: from.into(), to: to.into(), label: label.into(), dot: Dot::new(writer, lamport) }],
            ),
            format!("sha-{writer}-{lamport}"),
        )
    }

    fn node(writer: &str, lamport: u64, id: &str) -> (Patch, String) {
        (
            Patch::new(writer, lamport, vec![Op::NodeAdd { node: id.into(), dot: Dot::new(writer, lamport) }]),
            format!("sha-{writer}-{lamport}-n"),
        )
    }

    fn provider_for(patches: Vec<(Patch, String)>) -> crate::neighbor::AdjacencyMapProvider {
        let state: State = fold(None, &patches, ReduceOptions::StateOnly).unwrap().into_state();
        crate::neighbor::AdjacencyMapProvider::from_state(&state)
    }

    #[test]
    fn bfs_level_sort_trap() {
        // A->B, A->C, B->Z, C->D
        let provider = provider_for(vec![
            node("w", 1, "A"), node("w", 2, "B"), node("w", 3, "C"), node("w", 4, "D"), node("w", 5, "Z"),
            edge("w", 6, "A", "B", "e"),
            edge("w", 7, "A", "C", "e"),
            edge("w", 8, "B", "Z", "e"),
            edge("w", 9, "C", "D", "e"),
        ]);
        let order = bfs(&provider, "A", TraversalLimits::default(), &CancellationPolicy::never()).unwrap();
        assert_eq!(order, vec!["A", "B", "C", "D", "Z"]);
    }

    #[test]
    fn dfs_leftmost_reverse_push() {
        // A->B, A->C, B->D, C->E
        let provider = provider_for(vec![
            node("w", 1, "A"), node("w", 2, "B"), node("w", 3, "C"), node("w", 4, "D"), node("w", 5, "E"),
            edge("w", 6, "A", "B", "e"),
            edge("w", 7, "A", "C", "e"),
            edge("w", 8, "B", "D", "e"),
            edge("w", 9, "C", "E", "e"),
        ]);
        let order = dfs(&provider, "A", TraversalLimits::default(), &CancellationPolicy::never()).unwrap();
        assert_eq!(order, vec!["A", "B", "D", "C", "E"]);
    }

    #[test]
    fn dijkstra_equal_cost_predecessor() {
        // S->C(1), C->G(4), S->B(3), B->G(2); both paths cost 5, B < C wins.
        let provider = provider_for(vec![
            node("w", 1, "S"), node("w", 2, "B"), node("w", 3, "C"), node("w", 4, "G"),
            edge("w", 5, "S", "C", "e"),
            edge("w", 6, "C", "G", "e"),
            edge("w", 7, "S", "B", "e"),
            edge("w", 8, "B", "G", "e"),
        ]);
        let weights: BTreeMap<(&str, &str), f64> =
            BTreeMap::from([(("S", "C"), 1.0), (("C", "G"), 4.0), (("S", "B"), 3.0), (("B", "G"), 2.0)]);
        let weight_fn = move |from: &str, to: &str, _label: &str| *weights.get(&(from, to)).unwrap();
        let weight = WeightFn::Edge(&weight_fn);
        let (path, cost) = dijkstra(&provider, "S", "G", &weight, TraversalLimits::default(), &CancellationPolicy::never()).unwrap();
        assert_eq!(path, vec!["S", "B", "G"]);
        assert_eq!(cost, 5.0);
    }

    #[test]
    fn topo_sort_determinism_on_diamond() {
        let provider = provider_for(vec![
            node("w", 1, "A"), node("w", 2, "B"), node("w", 3, "C"), node("w", 4, "D"),
            edge("w", 5, "A", "B", "e"),
            edge("w", 6, "A", "C", "e"),
            edge("w", 7, "B", "D", "e"),
            edge("w", 8, "C", "D", "e"),
        ]);
        let result = topo_sort(&provider, "A", &CancellationPolicy::never()).unwrap();
        assert!(!result.has_cycle);
        assert_eq!(result.sorted, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn cycle_detection_witness() {
        let provider = provider_for(vec![
            node("w", 1, "A"), node("w", 2, "B"), node("w", 3, "C"),
            edge("w", 4, "A", "B", "e"),
            edge("w", 5, "B", "C", "e"),
            edge("w", 6, "C", "A", "e"),
        ]);
        let err = topo_sort_or_throw(&provider, "A", &CancellationPolicy::never()).unwrap_err();
        assert!(matches!(err, GraphError::GraphHasCycles { .. }));
    }

    #[test]
    fn invalid_start_fails() {
        let provider = provider_for(vec![node("w", 1, "A")]);
        let err = bfs(&provider, "missing", TraversalLimits::default(), &CancellationPolicy::never()).unwrap_err();
        assert!(matches!(err, GraphError::InvalidStart { .. }));
    }

    #[test]
    fn connected_component_unions_both_directions() {
        let provider = provider_for(vec![
            node("w", 1, "A"), node("w", 2, "B"), node("w", 3, "C"),
            edge("w", 4, "A", "B", "e"),
            edge("w", 5, "C", "B", "e"),
        ]);
        let mut component = connected_component(&provider, "A", TraversalLimits::default(), &CancellationPolicy::never()).unwrap();
        component.sort();
        assert_eq!(component, vec!["A", "B", "C"]);
    }
}
