//! Compressed geometry storage.
//!
//! While the compressor runs, interior nodes of collapsed chains accumulate
//! in per-edge buckets ([`CompressedEdgeContainer`]). Once the graph is
//! frozen, the buckets are zipped into a packed [`GeometryStore`]: one
//! coordinate run per undirected edge, shared between the forward and
//! reverse directed edges through the direction bit of [`GeometryId`].
//! Reading a run against the direction bit yields the reverse geometry.
//!
//! The store appends into fixed-size chunks so growing it never relocates
//! previously written coordinates in bulk.

use rustc_hash::FxHashMap;

use crate::error::{Result, RoadloomError};
use crate::geo::{EdgeId, FixedCoordinate, NodeId};

/// Reference into the [`GeometryStore`]; the forward bit selects the reading
/// direction of the shared run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryId {
    pub id: u32,
    pub forward: bool,
}

impl Default for GeometryId {
    fn default() -> Self {
        Self {
            id: u32::MAX,
            forward: true,
        }
    }
}

impl GeometryId {
    pub fn is_valid(&self) -> bool {
        self.id != u32::MAX
    }
}

const CHUNK_BITS: usize = 16;
const CHUNK_SIZE: usize = 1 << CHUNK_BITS;

/// Append-only coordinate arena backed by fixed-size chunks.
#[derive(Debug, Default)]
pub struct ChunkedVec<T> {
    chunks: Vec<Vec<T>>,
    len: usize,
}

impl<T: Copy> ChunkedVec<T> {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: T) {
        if self.len % CHUNK_SIZE == 0 {
            self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
        }
        self.chunks.last_mut().unwrap().push(value);
        self.len += 1;
    }

    pub fn get(&self, index: usize) -> T {
        self.chunks[index >> CHUNK_BITS][index & (CHUNK_SIZE - 1)]
    }

    pub fn range(&self, start: usize, end: usize) -> impl Iterator<Item = T> + '_ {
        (start..end).map(move |i| self.get(i))
    }
}

/// Interior-node buckets of edges that absorbed compressed chains.
///
/// Keyed by directed edge id. This is only sound while the compressor
/// guarantees that edges are never re-slotted while they still own a bucket:
/// deletion only happens at fully collapsed degree-2 nodes, whose buckets
/// have already been merged into the surviving edges.
#[derive(Debug, Default)]
pub struct CompressedEdgeContainer {
    buckets: FxHashMap<EdgeId, Vec<NodeId>>,
}

impl CompressedEdgeContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_entry(&self, edge: EdgeId) -> bool {
        self.buckets.contains_key(&edge)
    }

    pub fn interior_nodes(&self, edge: EdgeId) -> &[NodeId] {
        self.buckets.get(&edge).map_or(&[], Vec::as_slice)
    }

    /// Record that `surviving` absorbed `removed` across the interior node
    /// `via`: its geometry becomes surviving ++ [via] ++ removed.
    pub fn compress_edge(&mut self, surviving: EdgeId, removed: EdgeId, via: NodeId) {
        let removed_bucket = self.buckets.remove(&removed).unwrap_or_default();
        let bucket = self.buckets.entry(surviving).or_default();
        bucket.push(via);
        bucket.extend(removed_bucket);
    }
}

/// Packed interior-coordinate runs, one per undirected edge.
#[derive(Debug)]
pub struct GeometryStore {
    offsets: Vec<u32>,
    coordinates: ChunkedVec<FixedCoordinate>,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self {
            offsets: vec![0],
            coordinates: ChunkedVec::new(),
        }
    }

    pub fn num_geometries(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// Append a run of interior coordinates (already in forward direction)
    /// and return its geometry index.
    pub fn push_run(&mut self, run: &[FixedCoordinate]) -> u32 {
        for &coordinate in run {
            self.coordinates.push(coordinate);
        }
        self.offsets.push(self.coordinates.len() as u32);
        self.offsets.len() as u32 - 2
    }

    /// Interior coordinates of a directed edge, honoring the direction bit.
    pub fn interior_coordinates(&self, id: GeometryId) -> Result<Vec<FixedCoordinate>> {
        if id.id as usize + 1 >= self.offsets.len() {
            return Err(RoadloomError::IntegrityViolation(format!(
                "geometry id {} out of range ({} stored)",
                id.id,
                self.num_geometries()
            )));
        }
        let start = self.offsets[id.id as usize] as usize;
        let end = self.offsets[id.id as usize + 1] as usize;
        let mut run: Vec<FixedCoordinate> = self.coordinates.range(start, end).collect();
        if !id.forward {
            run.reverse();
        }
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_vec_crosses_chunk_boundary() {
        let mut v = ChunkedVec::new();
        for i in 0..(CHUNK_SIZE + 10) {
            v.push(i as u32);
        }
        assert_eq!(v.len(), CHUNK_SIZE + 10);
        assert_eq!(v.get(0), 0);
        assert_eq!(v.get(CHUNK_SIZE - 1), (CHUNK_SIZE - 1) as u32);
        assert_eq!(v.get(CHUNK_SIZE + 9), (CHUNK_SIZE + 9) as u32);
        let collected: Vec<u32> = v.range(CHUNK_SIZE - 2, CHUNK_SIZE + 2).collect();
        assert_eq!(collected.len(), 4);
    }

    #[test]
    fn test_compress_edge_concatenates() {
        let mut container = CompressedEdgeContainer::new();
        container.compress_edge(0, 1, 7);
        assert_eq!(container.interior_nodes(0), &[7]);
        // absorbing an edge that itself already carries interiors
        container.compress_edge(2, 0, 5);
        assert_eq!(container.interior_nodes(2), &[5, 7]);
        assert!(!container.has_entry(0));
    }

    #[test]
    fn test_store_reverse_read() {
        let mut store = GeometryStore::new();
        let run = vec![
            FixedCoordinate::new(1, 1),
            FixedCoordinate::new(2, 2),
            FixedCoordinate::new(3, 3),
        ];
        let id = store.push_run(&run);

        let forward = store
            .interior_coordinates(GeometryId { id, forward: true })
            .unwrap();
        let backward = store
            .interior_coordinates(GeometryId { id, forward: false })
            .unwrap();

        assert_eq!(forward, run);
        let mut reversed = run.clone();
        reversed.reverse();
        assert_eq!(backward, reversed);
    }

    #[test]
    fn test_store_out_of_range() {
        let store = GeometryStore::new();
        let result = store.interior_coordinates(GeometryId { id: 3, forward: true });
        assert!(result.is_err());
    }
}
