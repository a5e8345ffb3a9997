//! The original-edge-data sidecar: one record per turn id, carrying what
//! the router needs to reconstruct announcements.
//!
//! Format (little-endian):
//!
//! Fingerprint (152 bytes)
//! inputs_sha: [32]u8  // SHA-256 of the input artifact
//! count:  u32   // placeholder, rewritten once on finalize
//! Body (count records, 20 bytes each):
//!   via_node:     u32
//!   name_id:      u32   // of the onward edge
//!   instruction:  u16   // packed TurnInstruction
//!   lane_data_id: u32
//!   mode:         u8
//!   entry_class:  u8    // bitset of enterable roads at the intersection
//!   pre_bearing:  u16   // deci-degrees
//!   post_bearing: u16   // deci-degrees
//!
//! Records are streamed through the writer in batches and flushed to disk
//! every `FLUSH_THRESHOLD` records so the buffer stays bounded regardless
//! of graph size.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, RoadloomError};
use crate::formats::fingerprint::{Fingerprint, FINGERPRINT_SIZE};
use crate::geo::NodeId;
use crate::guidance::TurnInstruction;

pub const RECORD_SIZE: usize = 20;
pub const FLUSH_THRESHOLD: usize = 100_000;

/// No lane data attached to this turn.
pub const INVALID_LANE_DATA_ID: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OriginalEdgeRecord {
    pub via_node: NodeId,
    pub name_id: u32,
    pub instruction: TurnInstruction,
    pub lane_data_id: u32,
    pub mode: u8,
    pub entry_class: u8,
    pub pre_bearing: u16,
    pub post_bearing: u16,
}

fn encode_record(record: &OriginalEdgeRecord) -> [u8; RECORD_SIZE] {
    let mut buffer = [0u8; RECORD_SIZE];
    buffer[0..4].copy_from_slice(&record.via_node.to_le_bytes());
    buffer[4..8].copy_from_slice(&record.name_id.to_le_bytes());
    buffer[8..10].copy_from_slice(&record.instruction.pack().to_le_bytes());
    buffer[10..14].copy_from_slice(&record.lane_data_id.to_le_bytes());
    buffer[14] = record.mode;
    buffer[15] = record.entry_class;
    buffer[16..18].copy_from_slice(&record.pre_bearing.to_le_bytes());
    buffer[18..20].copy_from_slice(&record.post_bearing.to_le_bytes());
    buffer
}

fn decode_record(buffer: &[u8]) -> Result<OriginalEdgeRecord> {
    Ok(OriginalEdgeRecord {
        via_node: u32::from_le_bytes(buffer[0..4].try_into().unwrap()),
        name_id: u32::from_le_bytes(buffer[4..8].try_into().unwrap()),
        instruction: TurnInstruction::unpack(u16::from_le_bytes(
            buffer[8..10].try_into().unwrap(),
        ))?,
        lane_data_id: u32::from_le_bytes(buffer[10..14].try_into().unwrap()),
        mode: buffer[14],
        entry_class: buffer[15],
        pre_bearing: u16::from_le_bytes(buffer[16..18].try_into().unwrap()),
        post_bearing: u16::from_le_bytes(buffer[18..20].try_into().unwrap()),
    })
}

/// Streaming writer with a bounded in-memory buffer and a final header
/// rewrite carrying the true record count.
pub struct OriginalEdgeDataWriter {
    writer: BufWriter<File>,
    buffer: Vec<OriginalEdgeRecord>,
    count: u32,
    path: PathBuf,
}

impl OriginalEdgeDataWriter {
    pub fn create(path: &Path, inputs_sha: &[u8; 32]) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            RoadloomError::ResourceExhausted(format!("cannot create {}: {e}", path.display()))
        })?;
        let mut writer = BufWriter::new(file);
        Fingerprint::current().write_to(&mut writer)?;
        writer.write_all(inputs_sha)?;
        // placeholder count, rewritten on finalize
        writer.write_all(&0u32.to_le_bytes())?;
        Ok(Self {
            writer,
            buffer: Vec::with_capacity(FLUSH_THRESHOLD),
            count: 0,
            path: path.to_path_buf(),
        })
    }

    pub fn push(&mut self, record: OriginalEdgeRecord) -> Result<()> {
        self.buffer.push(record);
        self.count += 1;
        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        for record in &self.buffer {
            self.writer.write_all(&encode_record(record))?;
        }
        self.buffer.clear();
        Ok(())
    }

    /// Flush remaining records and rewrite the count in the header.
    pub fn finalize(mut self) -> Result<u32> {
        self.flush_buffer()?;
        self.writer.flush()?;
        let mut file = self.writer.into_inner().map_err(|e| {
            RoadloomError::ResourceExhausted(format!(
                "cannot flush {}: {e}",
                self.path.display()
            ))
        })?;
        file.seek(SeekFrom::Start(FINGERPRINT_SIZE as u64 + 32))?;
        file.write_all(&self.count.to_le_bytes())?;
        file.sync_all()?;
        Ok(self.count)
    }
}

/// Read the whole sidecar back; mostly for validation and tests.
pub fn read_all(path: &Path) -> Result<Vec<OriginalEdgeRecord>> {
    let mut file = File::open(path).map_err(|e| {
        RoadloomError::invalid_input(path, format!("cannot open: {e}"))
    })?;
    Fingerprint::read_from(&mut file, path, false)?;

    let mut inputs_sha = [0u8; 32];
    file.read_exact(&mut inputs_sha)?;
    let mut count_bytes = [0u8; 4];
    file.read_exact(&mut count_bytes)?;
    let count = u32::from_le_bytes(count_bytes);

    let mut records = Vec::with_capacity(count as usize);
    let mut buffer = [0u8; RECORD_SIZE];
    for _ in 0..count {
        file.read_exact(&mut buffer).map_err(|_| {
            RoadloomError::invalid_input(path, "record count exceeds file size")
        })?;
        records.push(decode_record(&buffer)?);
    }
    Ok(records)
}
