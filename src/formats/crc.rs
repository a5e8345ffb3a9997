//! Checksums shared by the binary formats: CRC-64/GO-ISO over file bodies
//! and the CRC-8/SMBUS trailer byte that seals the fingerprint header.

use std::io::{self, Write};

use crc::{Crc, CRC_64_GO_ISO, CRC_8_SMBUS};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// CRC-64 of a complete in-memory body.
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// CRC-8 over a fingerprint header prefix.
pub fn checksum8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// Forwards writes to an underlying writer while folding every written byte
/// into a running body CRC-64. For record streams that should not be
/// buffered whole just to checksum them.
pub struct Crc64Writer<W: Write> {
    inner: W,
    digest: crc::Digest<'static, u64>,
}

impl<W: Write> Crc64Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: CRC64.digest(),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.digest.update(bytes);
        self.inner.write_all(bytes)
    }

    /// Hand back the underlying writer together with the body checksum, so
    /// the caller can append the footer outside the checksummed span.
    pub fn finalize(self) -> (W, u64) {
        (self.inner, self.digest.finalize())
    }
}
