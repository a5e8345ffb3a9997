//! Dynamic node-based graph: arena of edges plus a node table of
//! (first_edge, count) blocks.
//!
//! Construction takes an edge list sorted by source and lays the blocks out
//! contiguously (compressed sparse rows). Mutation during graph compression
//! keeps the layout: deletion swaps with the last edge of the block and marks
//! the vacated slot as a dummy; insertion writes into free capacity adjacent
//! to the block if any exists and otherwise relocates the whole block to the
//! end of the arena, leaving dummies behind. Dummy slots are identified by
//! `target == SPECIAL_NODE_ID`.

use crate::geo::{EdgeId, NodeId, SPECIAL_NODE_ID};

/// An input edge for graph construction. The list handed to
/// [`DynamicGraph::from_sorted_edges`] must be sorted by `(source, target)`.
#[derive(Debug, Clone)]
pub struct InputEdge<D> {
    pub source: NodeId,
    pub target: NodeId,
    pub data: D,
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeEntry {
    first_edge: u32,
    edges: u32,
}

#[derive(Debug, Clone)]
struct EdgeSlot<D> {
    target: NodeId,
    data: D,
}

#[derive(Debug)]
pub struct DynamicGraph<D> {
    node_array: Vec<NodeEntry>,
    edge_list: Vec<EdgeSlot<D>>,
    number_of_edges: u32,
}

impl<D: Clone + Default> DynamicGraph<D> {
    /// Build from an edge list sorted by source node id.
    pub fn from_sorted_edges(number_of_nodes: NodeId, edges: &[InputEdge<D>]) -> Self {
        debug_assert!(edges
            .windows(2)
            .all(|w| (w[0].source, w[0].target) <= (w[1].source, w[1].target)));

        let mut node_array = vec![NodeEntry::default(); number_of_nodes as usize + 1];
        let mut edge = 0usize;
        let mut position = 0u32;
        for node in 0..number_of_nodes {
            let last_edge = edge;
            while edge < edges.len() && edges[edge].source == node {
                edge += 1;
            }
            node_array[node as usize].first_edge = position;
            node_array[node as usize].edges = (edge - last_edge) as u32;
            position += (edge - last_edge) as u32;
        }
        node_array[number_of_nodes as usize].first_edge = position;

        let edge_list = edges
            .iter()
            .map(|e| {
                debug_assert!(e.target < number_of_nodes);
                EdgeSlot {
                    target: e.target,
                    data: e.data.clone(),
                }
            })
            .collect();

        Self {
            node_array,
            edge_list,
            number_of_edges: edges.len() as u32,
        }
    }

    pub fn num_nodes(&self) -> NodeId {
        (self.node_array.len() - 1) as NodeId
    }

    pub fn num_edges(&self) -> u32 {
        self.number_of_edges
    }

    pub fn out_degree(&self, node: NodeId) -> u32 {
        self.node_array[node as usize].edges
    }

    pub fn begin_edges(&self, node: NodeId) -> EdgeId {
        self.node_array[node as usize].first_edge
    }

    pub fn end_edges(&self, node: NodeId) -> EdgeId {
        let entry = &self.node_array[node as usize];
        entry.first_edge + entry.edges
    }

    /// Iterator over the edge ids leaving `node`.
    pub fn adjacent_edges(&self, node: NodeId) -> std::ops::Range<EdgeId> {
        self.begin_edges(node)..self.end_edges(node)
    }

    pub fn target(&self, edge: EdgeId) -> NodeId {
        self.edge_list[edge as usize].target
    }

    pub fn set_target(&mut self, edge: EdgeId, node: NodeId) {
        self.edge_list[edge as usize].target = node;
    }

    pub fn edge_data(&self, edge: EdgeId) -> &D {
        &self.edge_list[edge as usize].data
    }

    pub fn edge_data_mut(&mut self, edge: EdgeId) -> &mut D {
        &mut self.edge_list[edge as usize].data
    }

    /// Linear scan over the out-edges of `from`.
    pub fn find_edge(&self, from: NodeId, to: NodeId) -> Option<EdgeId> {
        self.adjacent_edges(from)
            .find(|&e| self.edge_list[e as usize].target == to)
    }

    /// Insert an edge. Invalidates edge ids of `from`'s block when the block
    /// has to be relocated.
    pub fn insert_edge(&mut self, from: NodeId, to: NodeId, data: D) -> EdgeId {
        let node = self.node_array[from as usize];
        let one_beyond_last = (node.first_edge + node.edges) as usize;

        if one_beyond_last == self.edge_list.len() || !self.is_dummy(one_beyond_last as EdgeId) {
            if node.first_edge != 0 && self.is_dummy(node.first_edge - 1) {
                // free capacity immediately before the block: shift down by one
                let entry = &mut self.node_array[from as usize];
                entry.first_edge -= 1;
                let first = entry.first_edge as usize;
                let edges = entry.edges as usize;
                self.edge_list[first] = self.edge_list[first + edges].clone();
            } else {
                // relocate the whole block to the end of the arena
                let new_first_edge = self.edge_list.len() as EdgeId;
                let new_size = (f64::from(node.edges) * 1.1) as u32 + 2;
                self.edge_list.resize(
                    self.edge_list.len() + new_size as usize,
                    EdgeSlot {
                        target: SPECIAL_NODE_ID,
                        data: D::default(),
                    },
                );
                for i in 0..node.edges {
                    self.edge_list[(new_first_edge + i) as usize] =
                        self.edge_list[(node.first_edge + i) as usize].clone();
                    self.make_dummy(node.first_edge + i);
                }
                for i in node.edges + 1..new_size {
                    self.make_dummy(new_first_edge + i);
                }
                self.node_array[from as usize].first_edge = new_first_edge;
            }
        }

        let entry = &mut self.node_array[from as usize];
        let slot = (entry.first_edge + entry.edges) as usize;
        self.edge_list[slot] = EdgeSlot { target: to, data };
        entry.edges += 1;
        self.number_of_edges += 1;
        slot as EdgeId
    }

    /// Delete an edge by id; swaps with the last edge of the block.
    pub fn delete_edge(&mut self, source: NodeId, edge: EdgeId) {
        let entry = &mut self.node_array[source as usize];
        debug_assert!(entry.edges > 0);
        entry.edges -= 1;
        self.number_of_edges -= 1;
        let last = entry.first_edge + entry.edges;
        self.edge_list[edge as usize] = self.edge_list[last as usize].clone();
        self.make_dummy(last);
    }

    /// Delete every (source, target) edge; returns how many were removed.
    pub fn delete_edges_to(&mut self, source: NodeId, target: NodeId) -> u32 {
        let mut deleted = 0;
        while let Some(edge) = self.find_edge(source, target) {
            self.delete_edge(source, edge);
            deleted += 1;
        }
        deleted
    }

    fn is_dummy(&self, edge: EdgeId) -> bool {
        self.edge_list[edge as usize].target == SPECIAL_NODE_ID
    }

    fn make_dummy(&mut self, edge: EdgeId) {
        self.edge_list[edge as usize].target = SPECIAL_NODE_ID;
    }
}
