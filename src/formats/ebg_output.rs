//! Edge-based graph artifacts: the node file (`.ebn`) and the edge file
//! (`.ebe`).
//!
//! Node record (32 bytes):
//!   lon1, lat1:   i32   // source coordinate of the directed segment
//!   lon2, lat2:   i32   // target coordinate
//!   name_id:      u32
//!   weight:       u32
//!   flags:        u32   // bit 0 ignore-in-spatial-index, bits 1..5 mode,
//!                       // bits 8..32 component id
//!   id:           u32
//!
//! Edge record (24 bytes):
//!   source:       u32
//!   target:       u32
//!   turn_id:      u32
//!   packed:       u32   // weight:30 | forward:1 | backward:1
//!   duration:     u32
//!   distance:     f32
//!
//! Edges are written sorted by (source, target, weight, unidirectional
//! last). Both files are fingerprint + count + 32-byte inputs-SHA +
//! records + CRC-64 footer; the SHA identifies the input artifact the
//! build consumed, so downstream stages can detect mismatched inputs.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Result, RoadloomError};
use crate::formats::crc::{checksum, Crc64Writer};
use crate::formats::fingerprint::Fingerprint;

pub const NODE_RECORD_SIZE: usize = 32;
pub const EDGE_RECORD_SIZE: usize = 24;

/// Largest weight expressible in the 30-bit field.
pub const MAX_EDGE_WEIGHT: u32 = (1 << 30) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeBasedNodeRecord {
    pub lon1: i32,
    pub lat1: i32,
    pub lon2: i32,
    pub lat2: i32,
    pub name_id: u32,
    pub weight: u32,
    pub ignore_in_grid: bool,
    pub mode: u8,
    pub component: u32,
    pub id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeBasedEdgeRecord {
    pub source: u32,
    pub target: u32,
    pub turn_id: u32,
    pub weight: u32,
    pub duration: u32,
    pub distance: f32,
    pub forward: bool,
    pub backward: bool,
}

fn encode_node(record: &EdgeBasedNodeRecord) -> [u8; NODE_RECORD_SIZE] {
    let mut buffer = [0u8; NODE_RECORD_SIZE];
    buffer[0..4].copy_from_slice(&record.lon1.to_le_bytes());
    buffer[4..8].copy_from_slice(&record.lat1.to_le_bytes());
    buffer[8..12].copy_from_slice(&record.lon2.to_le_bytes());
    buffer[12..16].copy_from_slice(&record.lat2.to_le_bytes());
    buffer[16..20].copy_from_slice(&record.name_id.to_le_bytes());
    buffer[20..24].copy_from_slice(&record.weight.to_le_bytes());
    let flags = u32::from(record.ignore_in_grid)
        | (u32::from(record.mode & 0x0F) << 1)
        | (record.component << 8);
    buffer[24..28].copy_from_slice(&flags.to_le_bytes());
    buffer[28..32].copy_from_slice(&record.id.to_le_bytes());
    buffer
}

fn decode_node(buffer: &[u8]) -> EdgeBasedNodeRecord {
    let flags = u32::from_le_bytes(buffer[24..28].try_into().unwrap());
    EdgeBasedNodeRecord {
        lon1: i32::from_le_bytes(buffer[0..4].try_into().unwrap()),
        lat1: i32::from_le_bytes(buffer[4..8].try_into().unwrap()),
        lon2: i32::from_le_bytes(buffer[8..12].try_into().unwrap()),
        lat2: i32::from_le_bytes(buffer[12..16].try_into().unwrap()),
        name_id: u32::from_le_bytes(buffer[16..20].try_into().unwrap()),
        weight: u32::from_le_bytes(buffer[20..24].try_into().unwrap()),
        ignore_in_grid: flags & 1 != 0,
        mode: ((flags >> 1) & 0x0F) as u8,
        component: flags >> 8,
        id: u32::from_le_bytes(buffer[28..32].try_into().unwrap()),
    }
}

fn encode_edge(record: &EdgeBasedEdgeRecord) -> Result<[u8; EDGE_RECORD_SIZE]> {
    if record.weight > MAX_EDGE_WEIGHT {
        return Err(RoadloomError::IntegrityViolation(format!(
            "edge weight {} exceeds the 30-bit field",
            record.weight
        )));
    }
    let mut buffer = [0u8; EDGE_RECORD_SIZE];
    buffer[0..4].copy_from_slice(&record.source.to_le_bytes());
    buffer[4..8].copy_from_slice(&record.target.to_le_bytes());
    buffer[8..12].copy_from_slice(&record.turn_id.to_le_bytes());
    let packed = record.weight
        | (u32::from(record.forward) << 30)
        | (u32::from(record.backward) << 31);
    buffer[12..16].copy_from_slice(&packed.to_le_bytes());
    buffer[16..20].copy_from_slice(&record.duration.to_le_bytes());
    buffer[20..24].copy_from_slice(&record.distance.to_le_bytes());
    Ok(buffer)
}

fn decode_edge(buffer: &[u8]) -> EdgeBasedEdgeRecord {
    let packed = u32::from_le_bytes(buffer[12..16].try_into().unwrap());
    EdgeBasedEdgeRecord {
        source: u32::from_le_bytes(buffer[0..4].try_into().unwrap()),
        target: u32::from_le_bytes(buffer[4..8].try_into().unwrap()),
        turn_id: u32::from_le_bytes(buffer[8..12].try_into().unwrap()),
        weight: packed & MAX_EDGE_WEIGHT,
        duration: u32::from_le_bytes(buffer[16..20].try_into().unwrap()),
        distance: f32::from_le_bytes(buffer[20..24].try_into().unwrap()),
        forward: packed & (1 << 30) != 0,
        backward: packed & (1 << 31) != 0,
    }
}

const HEADER_SIZE: usize = 8 + 32; // count + inputs-SHA

fn write_records<T>(
    path: &Path,
    inputs_sha: &[u8; 32],
    records: &[T],
    encode: impl Fn(&T) -> Result<Vec<u8>>,
) -> Result<u64> {
    let file = File::create(path).map_err(|e| {
        RoadloomError::ResourceExhausted(format!("cannot create {}: {e}", path.display()))
    })?;
    let mut writer = BufWriter::new(file);
    Fingerprint::current().write_to(&mut writer)?;

    let mut body = Crc64Writer::new(writer);
    body.write(&(records.len() as u64).to_le_bytes())?;
    body.write(inputs_sha)?;
    for record in records {
        body.write(&encode(record)?)?;
    }

    let (mut writer, crc) = body.finalize();
    writer.write_all(&crc.to_le_bytes())?;
    writer.flush()?;
    Ok(crc)
}

fn read_records<T>(
    path: &Path,
    record_size: usize,
    decode: impl Fn(&[u8]) -> T,
) -> Result<(Vec<T>, [u8; 32], u64)> {
    let file = File::open(path)
        .map_err(|e| RoadloomError::invalid_input(path, format!("cannot open: {e}")))?;
    let mut reader = BufReader::new(file);
    Fingerprint::read_from(&mut reader, path, false)?;

    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    if body.len() < HEADER_SIZE + 8 {
        return Err(RoadloomError::invalid_input(path, "truncated body"));
    }
    let (body, footer) = body.split_at(body.len() - 8);
    let stored_crc = u64::from_le_bytes(footer.try_into().unwrap());
    if stored_crc != checksum(body) {
        return Err(RoadloomError::invalid_input(path, "body checksum mismatch"));
    }

    let count = u64::from_le_bytes(body[0..8].try_into().unwrap()) as usize;
    let inputs_sha: [u8; 32] = body[8..HEADER_SIZE].try_into().unwrap();
    if body.len() - HEADER_SIZE != count * record_size {
        return Err(RoadloomError::invalid_input(
            path,
            format!(
                "expected {} records, body holds {} bytes",
                count,
                body.len() - HEADER_SIZE
            ),
        ));
    }

    let records = body[HEADER_SIZE..]
        .chunks_exact(record_size)
        .map(decode)
        .collect();
    Ok((records, inputs_sha, stored_crc))
}

/// Write the node file; returns the body checksum.
pub fn write_nodes(
    path: &Path,
    nodes: &[EdgeBasedNodeRecord],
    inputs_sha: &[u8; 32],
) -> Result<u64> {
    write_records(path, inputs_sha, nodes, |node| Ok(encode_node(node).to_vec()))
}

pub fn read_nodes(path: &Path) -> Result<(Vec<EdgeBasedNodeRecord>, [u8; 32], u64)> {
    read_records(path, NODE_RECORD_SIZE, decode_node)
}

/// Write the edge file sorted by (source, target, weight, unidirectional
/// last); returns the body checksum.
pub fn write_edges(
    path: &Path,
    edges: &[EdgeBasedEdgeRecord],
    inputs_sha: &[u8; 32],
) -> Result<u64> {
    let mut sorted = edges.to_vec();
    sorted.sort_by_key(|edge| {
        (
            edge.source,
            edge.target,
            edge.weight,
            !(edge.forward && edge.backward),
        )
    });
    write_records(path, inputs_sha, &sorted, |edge| {
        encode_edge(edge).map(|b| b.to_vec())
    })
}

pub fn read_edges(path: &Path) -> Result<(Vec<EdgeBasedEdgeRecord>, [u8; 32], u64)> {
    read_records(path, EDGE_RECORD_SIZE, decode_edge)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32) -> EdgeBasedNodeRecord {
        EdgeBasedNodeRecord {
            lon1: 7_000_000,
            lat1: 50_000_000,
            lon2: 7_001_000,
            lat2: 50_000_500,
            name_id: 4,
            weight: 120,
            ignore_in_grid: id % 2 == 0,
            mode: 1,
            component: 3,
            id,
        }
    }

    fn edge(source: u32, target: u32, weight: u32) -> EdgeBasedEdgeRecord {
        EdgeBasedEdgeRecord {
            source,
            target,
            turn_id: source * 100 + target,
            weight,
            duration: weight,
            distance: 42.5,
            forward: true,
            backward: false,
        }
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(encode_node(&node(1)).len(), NODE_RECORD_SIZE);
        assert_eq!(encode_edge(&edge(0, 1, 5)).unwrap().len(), EDGE_RECORD_SIZE);
    }

    #[test]
    fn test_node_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.ebn");
        let nodes = vec![node(0), node(1), node(2)];
        let written_crc = write_nodes(&path, &nodes, &[7u8; 32]).unwrap();

        let (read, inputs_sha, read_crc) = read_nodes(&path).unwrap();
        assert_eq!(read, nodes);
        assert_eq!(inputs_sha, [7u8; 32]);
        assert_eq!(read_crc, written_crc);
    }

    #[test]
    fn test_edge_round_trip_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.ebe");
        let edges = vec![edge(2, 0, 9), edge(0, 1, 5), edge(0, 1, 3)];
        write_edges(&path, &edges, &[0u8; 32]).unwrap();

        let (read, _, _) = read_edges(&path).unwrap();
        assert_eq!(read.len(), 3);
        // sorted by source, then target, then weight
        assert_eq!(read[0].weight, 3);
        assert_eq!(read[1].weight, 5);
        assert_eq!(read[2].source, 2);
    }

    #[test]
    fn test_weight_field_limit() {
        assert!(encode_edge(&EdgeBasedEdgeRecord {
            weight: MAX_EDGE_WEIGHT + 1,
            ..edge(0, 1, 0)
        })
        .is_err());
    }

    #[test]
    fn test_packed_flags_round_trip() {
        let mut record = edge(0, 1, 77);
        record.backward = true;
        let decoded = decode_edge(&encode_edge(&record).unwrap());
        assert_eq!(decoded, record);
    }
}
