//! Binary file formats of the preprocessing pipeline.
//!
//! Every artifact starts with the 152-byte fingerprint and, where noted,
//! ends with a CRC-64 footer over the body. All integers are little-endian.

pub mod crc;
pub mod ebg_output;
pub mod fingerprint;
pub mod input_graph;
pub mod original_edge_data;
pub mod shapefile;

pub use ebg_output::{EdgeBasedEdgeRecord, EdgeBasedNodeRecord};
pub use fingerprint::Fingerprint;
pub use input_graph::{InputGraph, RawEdge, RawNode, RawRestriction};
