use tracing::debug;

use super::graph::LayoutGraph;

const UNVISITED: u8 = 0;
const ON_STACK: u8 = 1;
const DONE: u8 = 2;

/// Reverses every DFS back-edge so the graph becomes a DAG. Back-edges are
/// collected during the walk and flipped afterwards. Returns how many edges
/// were reversed.
pub fn make_acyclic(graph: &mut LayoutGraph) -> usize {
    let n = graph.nodes.len();
    let mut state = vec![UNVISITED; n];
    let mut back_edges = Vec::new();

    for root in 0..n {
        if state[root] != UNVISITED {
            continue;
        }
        state[root] = ON_STACK;
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            let Some(&edge) = graph.out_edges[node].get(cursor) else {
                state[node] = DONE;
                stack.pop();
                continue;
            };
            frame.1 += 1;
            let target = graph.edges[edge].to;
            match state[target] {
                UNVISITED => {
                    state[target] = ON_STACK;
                    stack.push((target, 0));
                }
                ON_STACK => back_edges.push(edge),
                _ => {}
            }
        }
    }

    for &edge in &back_edges {
        graph.reverse_edge(edge);
    }
    debug!(reversed = back_edges.len(), "acyclic pass");
    back_edges.len()
}

/// Restores the original direction of every edge still marked reversed,
/// including the segments of dummy chains built from reversed edges.
pub fn undo_acyclic(graph: &mut LayoutGraph) {
    let reversed: Vec<usize> = graph
        .edges
        .iter()
        .enumerate()
        .filter(|(_, edge)| edge.reversed)
        .map(|(idx, _)| idx)
        .collect();
    for edge in reversed {
        graph.reverse_edge(edge);
    }
}
