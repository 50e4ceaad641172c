use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use tracing::debug;

use super::graph::LayoutGraph;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderStats {
    pub initial_crossings: usize,
    pub crossings: usize,
    pub passes: usize,
}

/// Orders nodes within ranks: BFS seed, then alternating median sweeps,
/// keeping the ordering with the fewest crossings seen.
pub fn order_within_ranks(graph: &mut LayoutGraph, max_passes: usize) -> OrderStats {
    initial_order(graph);
    let initial = count_crossings(graph);
    let mut best = initial;
    let mut best_ranks = graph.ranks.clone();
    let mut passes = 0;

    while passes < max_passes && best > 0 {
        let downward = passes % 2 == 0;
        sweep(graph, downward);
        passes += 1;
        let crossings = count_crossings(graph);
        debug!(pass = passes, crossings, "ordering sweep");
        if crossings < best {
            best = crossings;
            best_ranks = graph.ranks.clone();
        }
    }

    graph.ranks = best_ranks;
    graph.sync_orders();
    OrderStats {
        initial_crossings: initial,
        crossings: best,
        passes,
    }
}

/// Breadth-first from the sources in node order; ties keep discovery order.
pub fn initial_order(graph: &mut LayoutGraph) {
    let n = graph.nodes.len();
    let rank_count = if n == 0 { 0 } else { graph.max_rank() as usize + 1 };
    let mut ranks: Vec<Vec<usize>> = vec![Vec::new(); rank_count];
    let mut seen = vec![false; n];
    let mut queue: VecDeque<usize> = VecDeque::new();

    let sources = (0..n).filter(|&v| graph.in_edges[v].is_empty());
    let everything = 0..n;
    for start in sources.chain(everything) {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            ranks[graph.nodes[node].rank as usize].push(node);
            for next in graph.successors(node) {
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
    }

    graph.ranks = ranks;
    group_clusters_all(graph);
    graph.sync_orders();
}

fn group_clusters_all(graph: &mut LayoutGraph) {
    for r in 0..graph.ranks.len() {
        let mut rank = std::mem::take(&mut graph.ranks[r]);
        group_clusters(graph, &mut rank);
        graph.ranks[r] = rank;
    }
}

fn sweep(graph: &mut LayoutGraph, downward: bool) {
    let rank_count = graph.ranks.len();
    if rank_count < 2 {
        return;
    }
    let ranks: Vec<usize> = if downward {
        (1..rank_count).collect()
    } else {
        (0..rank_count - 1).rev().collect()
    };
    for r in ranks {
        let mut rank = std::mem::take(&mut graph.ranks[r]);
        let keys: HashMap<usize, f32> = rank
            .iter()
            .map(|&node| {
                let mut neighbor_orders: Vec<usize> = if downward {
                    graph.predecessors(node).map(|p| graph.nodes[p].order).collect()
                } else {
                    graph.successors(node).map(|s| graph.nodes[s].order).collect()
                };
                let key = median(&mut neighbor_orders).unwrap_or(graph.nodes[node].order as f32);
                (node, key)
            })
            .collect();
        rank.sort_by(|a, b| keys[a].total_cmp(&keys[b]));
        group_clusters(graph, &mut rank);
        for (pos, &node) in rank.iter().enumerate() {
            graph.nodes[node].order = pos;
        }
        graph.ranks[r] = rank;
    }
}

/// Median of neighbor orders; even-length lists average the two middles.
pub fn median(values: &mut [usize]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid] as f32)
    } else {
        Some((values[mid - 1] + values[mid]) as f32 / 2.0)
    }
}

/// Keeps members of each subgraph contiguous within a rank. Each node is keyed
/// by, per nesting level, the mean position of its cluster-mates at that
/// level; lexicographic order on those keys groups clusters without moving
/// them far from where the sweep put them.
fn group_clusters(graph: &LayoutGraph, rank: &mut [usize]) {
    if rank.iter().all(|&node| graph.nodes[node].cluster.is_empty()) {
        return;
    }
    let mut prefix_positions: HashMap<&[usize], (f32, usize)> = HashMap::new();
    for (pos, &node) in rank.iter().enumerate() {
        let cluster = &graph.nodes[node].cluster;
        for depth in 1..=cluster.len() {
            let entry = prefix_positions.entry(&cluster[..depth]).or_insert((0.0, 0));
            entry.0 += pos as f32;
            entry.1 += 1;
        }
    }
    let keys: HashMap<usize, Vec<(f32, usize)>> = rank
        .iter()
        .enumerate()
        .map(|(pos, &node)| {
            let cluster = &graph.nodes[node].cluster;
            let mut key: Vec<(f32, usize)> = (1..=cluster.len())
                .map(|depth| {
                    let (sum, count) = prefix_positions[&cluster[..depth]];
                    (sum / count as f32, cluster[depth - 1] + 1)
                })
                .collect();
            key.push((pos as f32, 0));
            (node, key)
        })
        .collect();
    rank.sort_by(|a, b| compare_keys(&keys[a], &keys[b]));
}

fn compare_keys(a: &[(f32, usize)], b: &[(f32, usize)]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = x.0.total_cmp(&y.0).then(x.1.cmp(&y.1));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Total crossings between every pair of adjacent ranks.
pub fn count_crossings(graph: &LayoutGraph) -> usize {
    let mut total = 0;
    for rank in graph.ranks.iter().take(graph.ranks.len().saturating_sub(1)) {
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for &node in rank {
            for &edge in &graph.out_edges[node] {
                let target = graph.edges[edge].to;
                pairs.push((graph.nodes[node].order, graph.nodes[target].order));
            }
        }
        pairs.sort_unstable();
        let mut targets: Vec<usize> = pairs.into_iter().map(|(_, t)| t).collect();
        total += count_inversions(&mut targets);
    }
    total
}

/// Merge-sort inversion count; sorts `values` as a side effect.
pub fn count_inversions(values: &mut [usize]) -> usize {
    let mut buffer = values.to_vec();
    merge_count(values, &mut buffer)
}

fn merge_count(values: &mut [usize], buffer: &mut [usize]) -> usize {
    let len = values.len();
    if len < 2 {
        return 0;
    }
    let mid = len / 2;
    let mut count = merge_count(&mut values[..mid], &mut buffer[..mid])
        + merge_count(&mut values[mid..], &mut buffer[mid..]);

    let (mut i, mut j, mut k) = (0, mid, 0);
    while i < mid && j < len {
        if values[i] <= values[j] {
            buffer[k] = values[i];
            i += 1;
        } else {
            buffer[k] = values[j];
            count += mid - i;
            j += 1;
        }
        k += 1;
    }
    buffer[k..k + (mid - i)].copy_from_slice(&values[i..mid]);
    k += mid - i;
    buffer[k..k + (len - j)].copy_from_slice(&values[j..len]);
    values.copy_from_slice(&buffer[..len]);
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RankStrategy;
    use crate::layout::rank::{assign_ranks, insert_dummy_nodes};

    fn ranked(ids: &[&str], edges: &[(&str, &str)]) -> LayoutGraph {
        let mut g = LayoutGraph::new();
        for id in ids {
            g.add_node(id, 10.0, 10.0, Vec::new());
        }
        for (i, (a, b)) in edges.iter().enumerate() {
            g.add_edge_by_id(a, b, i);
        }
        assign_ranks(&mut g, RankStrategy::LongestPath, 0);
        insert_dummy_nodes(&mut g);
        g
    }

    fn brute_inversions(values: &[usize]) -> usize {
        let mut count = 0;
        for i in 0..values.len() {
            for j in i + 1..values.len() {
                if values[i] > values[j] {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn inversions_match_brute_force() {
        let samples: [&[usize]; 4] = [&[3, 1, 2], &[0, 0, 1, 1], &[5, 4, 3, 2, 1], &[2, 0, 3, 1, 2, 0]];
        for sample in samples {
            let mut values = sample.to_vec();
            assert_eq!(count_inversions(&mut values), brute_inversions(sample));
            assert!(values.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn median_of_even_list_averages() {
        assert_eq!(median(&mut [4, 1, 3, 2]), Some(2.5));
        assert_eq!(median(&mut [7]), Some(7.0));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn sweeps_remove_an_obvious_crossing() {
        // BFS seeds rank 1 as [D, C], so B->D crosses A->C.
        let mut g = ranked(&["A", "B", "C", "D"], &[("A", "D"), ("A", "C"), ("B", "D")]);
        let stats = order_within_ranks(&mut g, 24);
        assert_eq!(stats.initial_crossings, 1);
        assert_eq!(stats.crossings, 0);
    }

    #[test]
    fn best_ordering_is_never_worse_than_initial() {
        let mut g = ranked(
            &["a", "b", "c", "d", "e", "f"],
            &[("a", "e"), ("a", "f"), ("b", "d"), ("c", "d"), ("b", "f"), ("c", "e")],
        );
        let stats = order_within_ranks(&mut g, 24);
        assert!(stats.crossings <= stats.initial_crossings);
        assert_eq!(count_crossings(&g), stats.crossings);
        for rank in &g.ranks {
            for (pos, &node) in rank.iter().enumerate() {
                assert_eq!(g.nodes[node].order, pos);
            }
        }
    }

    #[test]
    fn cluster_members_stay_contiguous() {
        let mut g = LayoutGraph::new();
        g.add_node("root", 10.0, 10.0, Vec::new());
        g.add_node("x", 10.0, 10.0, vec![0]);
        g.add_node("free", 10.0, 10.0, Vec::new());
        g.add_node("y", 10.0, 10.0, vec![0]);
        for (i, id) in ["x", "free", "y"].iter().enumerate() {
            g.add_edge_by_id("root", id, i);
        }
        assign_ranks(&mut g, RankStrategy::LongestPath, 0);
        order_within_ranks(&mut g, 4);
        let rank: Vec<&str> = g.ranks[1].iter().map(|&n| g.nodes[n].id.as_str()).collect();
        let x = rank.iter().position(|id| *id == "x").unwrap();
        let y = rank.iter().position(|id| *id == "y").unwrap();
        assert_eq!(x.abs_diff(y), 1, "{rank:?}");
    }
}
