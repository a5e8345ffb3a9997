//! The `.rln` input artifact: the node-based street network handed over by
//! the upstream extraction run.
//!
//! Format (little-endian):
//!
//! Fingerprint (152 bytes)
//!
//! Node section:
//!   count:        u64
//!   per record (21 bytes):
//!     lon:        i32   // 1e-6 degrees
//!     lat:        i32
//!     flags:      u8    // bit 0 barrier, bit 1 traffic signal
//!     osm_id:     i64
//!     reserved:   [4]u8
//!
//! Edge section:
//!   count:        u64
//!   per record (31 bytes):
//!     source:     u32
//!     target:     u32
//!     weight:     u32
//!     duration:   u32
//!     distance:   f32
//!     name_id:    u32
//!     flags:      u16   // forward, backward, roundabout, circular,
//!                       // restricted, startpoint, is_split
//!     mode:       u8    // 4-bit travel mode tag
//!     classification: u32
//!
//! Restriction section:
//!   count:        u64
//!   per record:
//!     kind:       u8    // 0 = node via, 1 = way via
//!     from:       u32
//!     via:        u32
//!     via2:       u32   // only meaningful for way restrictions
//!     to:         u32
//!     is_only:    u8
//!     condition:  u16 length + UTF-8 bytes
//!
//! Footer: body CRC-64 (everything after the fingerprint).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, RoadloomError};
use crate::formats::crc::checksum;
use crate::formats::fingerprint::Fingerprint;
use crate::geo::NodeId;

const NODE_RECORD_SIZE: usize = 21;
const EDGE_RECORD_SIZE: usize = 31;

const FLAG_BARRIER: u8 = 0x01;
const FLAG_TRAFFIC_SIGNAL: u8 = 0x02;

const EDGE_FORWARD: u16 = 0x01;
const EDGE_BACKWARD: u16 = 0x02;
const EDGE_ROUNDABOUT: u16 = 0x04;
const EDGE_CIRCULAR: u16 = 0x08;
const EDGE_RESTRICTED: u16 = 0x10;
const EDGE_STARTPOINT: u16 = 0x20;
const EDGE_IS_SPLIT: u16 = 0x40;

#[derive(Debug, Clone)]
pub struct RawNode {
    pub lon: i32,
    pub lat: i32,
    pub barrier: bool,
    pub traffic_signal: bool,
    pub osm_id: i64,
}

#[derive(Debug, Clone)]
pub struct RawEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: u32,
    pub duration: u32,
    pub distance: f32,
    pub name_id: u32,
    pub forward: bool,
    pub backward: bool,
    pub roundabout: bool,
    pub circular: bool,
    pub restricted: bool,
    pub startpoint: bool,
    pub is_split: bool,
    pub mode: u8,
    pub classification: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawRestrictionKind {
    NodeVia,
    WayVia,
}

#[derive(Debug, Clone)]
pub struct RawRestriction {
    pub kind: RawRestrictionKind,
    pub from: NodeId,
    pub via: NodeId,
    /// Second via node for way restrictions (the far end of the via way).
    pub via2: NodeId,
    pub to: NodeId,
    pub is_only: bool,
    /// Conditional clause text; empty when unconditional.
    pub condition: String,
}

#[derive(Debug)]
pub struct InputGraph {
    pub path: PathBuf,
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
    pub restrictions: Vec<RawRestriction>,
}

impl InputGraph {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            RoadloomError::invalid_input(path, format!("cannot open: {e}"))
        })?;
        let mut reader = BufReader::new(file);

        Fingerprint::read_from(&mut reader, path, false)?;

        let mut body = Vec::new();
        reader.read_exact_to_end_checked(path, &mut body)?;

        if body.len() < 8 {
            return Err(RoadloomError::invalid_input(path, "truncated body"));
        }
        let (body, footer) = body.split_at(body.len() - 8);
        let stored_crc = u64::from_le_bytes(footer.try_into().unwrap());
        if stored_crc != checksum(body) {
            return Err(RoadloomError::invalid_input(path, "body checksum mismatch"));
        }

        let mut cursor = Cursor { data: body, pos: 0, path };

        let node_count = cursor.u64()?;
        if node_count > u64::from(u32::MAX) {
            return Err(RoadloomError::invalid_input(path, "impossible node count"));
        }
        let mut nodes = Vec::with_capacity(node_count as usize);
        for _ in 0..node_count {
            let lon = cursor.i32()?;
            let lat = cursor.i32()?;
            let flags = cursor.u8()?;
            let osm_id = cursor.i64()?;
            cursor.skip(4)?;
            nodes.push(RawNode {
                lon,
                lat,
                barrier: flags & FLAG_BARRIER != 0,
                traffic_signal: flags & FLAG_TRAFFIC_SIGNAL != 0,
                osm_id,
            });
        }

        let edge_count = cursor.u64()?;
        let mut edges = Vec::with_capacity(edge_count as usize);
        for _ in 0..edge_count {
            let source = cursor.u32()?;
            let target = cursor.u32()?;
            let weight = cursor.u32()?;
            let duration = cursor.u32()?;
            let distance = cursor.f32()?;
            let name_id = cursor.u32()?;
            let flags = cursor.u16()?;
            let mode = cursor.u8()?;
            let classification = cursor.u32()?;
            edges.push(RawEdge {
                source,
                target,
                weight,
                duration,
                distance,
                name_id,
                forward: flags & EDGE_FORWARD != 0,
                backward: flags & EDGE_BACKWARD != 0,
                roundabout: flags & EDGE_ROUNDABOUT != 0,
                circular: flags & EDGE_CIRCULAR != 0,
                restricted: flags & EDGE_RESTRICTED != 0,
                startpoint: flags & EDGE_STARTPOINT != 0,
                is_split: flags & EDGE_IS_SPLIT != 0,
                mode,
                classification,
            });
        }

        let restriction_count = cursor.u64()?;
        let mut restrictions = Vec::with_capacity(restriction_count as usize);
        for _ in 0..restriction_count {
            let kind = match cursor.u8()? {
                0 => RawRestrictionKind::NodeVia,
                1 => RawRestrictionKind::WayVia,
                other => {
                    return Err(RoadloomError::invalid_input(
                        path,
                        format!("unknown restriction kind {other}"),
                    ))
                }
            };
            let from = cursor.u32()?;
            let via = cursor.u32()?;
            let via2 = cursor.u32()?;
            let to = cursor.u32()?;
            let is_only = cursor.u8()? != 0;
            let condition_len = cursor.u16()? as usize;
            let condition_bytes = cursor.bytes(condition_len)?;
            let condition = String::from_utf8(condition_bytes.to_vec()).map_err(|_| {
                RoadloomError::invalid_input(path, "restriction condition is not UTF-8")
            })?;
            restrictions.push(RawRestriction {
                kind,
                from,
                via,
                via2,
                to,
                is_only,
                condition,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            nodes,
            edges,
            restrictions,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        Fingerprint::current().write_to(&mut writer)?;

        let mut body = Vec::new();
        body.extend_from_slice(&(self.nodes.len() as u64).to_le_bytes());
        for node in &self.nodes {
            let before = body.len();
            body.extend_from_slice(&node.lon.to_le_bytes());
            body.extend_from_slice(&node.lat.to_le_bytes());
            let mut flags = 0u8;
            if node.barrier {
                flags |= FLAG_BARRIER;
            }
            if node.traffic_signal {
                flags |= FLAG_TRAFFIC_SIGNAL;
            }
            body.push(flags);
            body.extend_from_slice(&node.osm_id.to_le_bytes());
            body.extend_from_slice(&[0u8; 4]);
            debug_assert_eq!(body.len() - before, NODE_RECORD_SIZE);
        }

        body.extend_from_slice(&(self.edges.len() as u64).to_le_bytes());
        for edge in &self.edges {
            let before = body.len();
            body.extend_from_slice(&edge.source.to_le_bytes());
            body.extend_from_slice(&edge.target.to_le_bytes());
            body.extend_from_slice(&edge.weight.to_le_bytes());
            body.extend_from_slice(&edge.duration.to_le_bytes());
            body.extend_from_slice(&edge.distance.to_le_bytes());
            body.extend_from_slice(&edge.name_id.to_le_bytes());
            let mut flags = 0u16;
            if edge.forward {
                flags |= EDGE_FORWARD;
            }
            if edge.backward {
                flags |= EDGE_BACKWARD;
            }
            if edge.roundabout {
                flags |= EDGE_ROUNDABOUT;
            }
            if edge.circular {
                flags |= EDGE_CIRCULAR;
            }
            if edge.restricted {
                flags |= EDGE_RESTRICTED;
            }
            if edge.startpoint {
                flags |= EDGE_STARTPOINT;
            }
            if edge.is_split {
                flags |= EDGE_IS_SPLIT;
            }
            body.extend_from_slice(&flags.to_le_bytes());
            body.push(edge.mode);
            body.extend_from_slice(&edge.classification.to_le_bytes());
            debug_assert_eq!(body.len() - before, EDGE_RECORD_SIZE);
        }

        body.extend_from_slice(&(self.restrictions.len() as u64).to_le_bytes());
        for restriction in &self.restrictions {
            body.push(match restriction.kind {
                RawRestrictionKind::NodeVia => 0,
                RawRestrictionKind::WayVia => 1,
            });
            body.extend_from_slice(&restriction.from.to_le_bytes());
            body.extend_from_slice(&restriction.via.to_le_bytes());
            body.extend_from_slice(&restriction.via2.to_le_bytes());
            body.extend_from_slice(&restriction.to.to_le_bytes());
            body.push(u8::from(restriction.is_only));
            let condition = restriction.condition.as_bytes();
            body.extend_from_slice(&(condition.len() as u16).to_le_bytes());
            body.extend_from_slice(condition);
        }

        let crc = checksum(&body);
        writer.write_all(&body)?;
        writer.write_all(&crc.to_le_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

/// Byte-slice reader with position tracking and typed accessors.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Cursor<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(RoadloomError::invalid_input(
                self.path,
                format!("truncated record at offset {}", self.pos),
            ));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }
}

trait ReadToEndChecked {
    fn read_exact_to_end_checked(&mut self, path: &Path, buffer: &mut Vec<u8>) -> Result<()>;
}

impl<R: Read> ReadToEndChecked for R {
    fn read_exact_to_end_checked(&mut self, path: &Path, buffer: &mut Vec<u8>) -> Result<()> {
        self.read_to_end(buffer).map_err(|e| {
            RoadloomError::invalid_input(path, format!("read failed: {e}"))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InputGraph {
        InputGraph {
            path: PathBuf::new(),
            nodes: vec![
                RawNode { lon: 7_000_000, lat: 50_000_000, barrier: false, traffic_signal: true, osm_id: 1001 },
                RawNode { lon: 7_001_000, lat: 50_000_000, barrier: true, traffic_signal: false, osm_id: 1002 },
            ],
            edges: vec![RawEdge {
                source: 0,
                target: 1,
                weight: 120,
                duration: 90,
                distance: 72.5,
                name_id: 3,
                forward: true,
                backward: false,
                roundabout: false,
                circular: false,
                restricted: true,
                startpoint: true,
                is_split: false,
                mode: 1,
                classification: 0x0003_0104,
            }],
            restrictions: vec![RawRestriction {
                kind: RawRestrictionKind::WayVia,
                from: 0,
                via: 1,
                via2: 0,
                to: 1,
                is_only: false,
                condition: "Mo-Fr 07:00-09:00".to_string(),
            }],
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.rln");
        let graph = sample();
        graph.write(&path).unwrap();

        let read = InputGraph::read(&path).unwrap();
        assert_eq!(read.nodes.len(), 2);
        assert!(read.nodes[0].traffic_signal);
        assert!(read.nodes[1].barrier);
        assert_eq!(read.edges.len(), 1);
        assert_eq!(read.edges[0].weight, 120);
        assert!(read.edges[0].restricted);
        assert!(!read.edges[0].backward);
        assert_eq!(read.restrictions.len(), 1);
        assert_eq!(read.restrictions[0].condition, "Mo-Fr 07:00-09:00");
    }

    #[test]
    fn test_corrupted_body_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.rln");
        sample().write(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let flip = 152 + 12;
        bytes[flip] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            InputGraph::read(&path),
            Err(RoadloomError::InputInvalid { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_invalid_input() {
        let result = InputGraph::read(Path::new("/nonexistent/x.rln"));
        assert!(matches!(result, Err(RoadloomError::InputInvalid { .. })));
    }
}
