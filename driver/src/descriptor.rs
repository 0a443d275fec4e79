//! Hardware descriptor table
//!
//! The block reads per-buffer translation parameters from a table of 256
//! records, 64 bytes each, inside one contiguous device-visible arena.
//! Slots are identified by small integer ids; the id doubles as the
//! range-check slot number.

use log::error;
use static_assertions::const_assert_eq;

use crate::geometry::CACHE_LINE;

pub use bwc_hw::{DESC_RECORD_BYTES as RECORD_BYTES, DESC_SLOT_COUNT as SLOT_COUNT};

const_assert_eq!(RECORD_BYTES, 64);
const_assert_eq!(SLOT_COUNT * RECORD_BYTES, 16384);

/// Index of a descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorId(u16);

impl DescriptorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Translation parameters of one buffer, as the block reads them.
///
/// Address fields are pre-shifted: `uv_start_addr` and the strides are in
/// cache-line (64-byte) units, the base/offset fields in 4096-byte pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetaRecord {
    pub uv_start_addr: u64,
    pub format: u16,
    /// Row stride; the uncompressed stride except for TP10, which
    /// programs its compressed stride here
    pub stride: u32,
    /// TP10 only: the uncompressed stride
    pub stride_uncompressed: u32,
    pub metadata_base_y: u32,
    pub metadata_base_uv: u32,
    pub buffer_y_offset: u32,
    pub buffer_uv_offset: u32,
    /// Width in bytes in the high half; height in the low half
    /// (bytes on hardware v1.1, pixels elsewhere)
    pub width_height: u32,
}

impl MetaRecord {
    /// Pack into the 64-byte wire layout. Unlisted bytes are zero.
    ///
    /// | offset | field               |
    /// |--------|---------------------|
    /// | 0x00   | uv_start_addr (u64) |
    /// | 0x08   | format (u16)        |
    /// | 0x0C   | stride              |
    /// | 0x10   | stride_uncompressed |
    /// | 0x14   | metadata_base_y     |
    /// | 0x18   | metadata_base_uv    |
    /// | 0x1C   | buffer_y_offset     |
    /// | 0x20   | buffer_uv_offset    |
    /// | 0x24   | width_height        |
    pub fn encode(&self) -> [u8; RECORD_BYTES] {
        let mut out = [0u8; RECORD_BYTES];
        out[0x00..0x08].copy_from_slice(&self.uv_start_addr.to_le_bytes());
        out[0x08..0x0A].copy_from_slice(&self.format.to_le_bytes());
        out[0x0C..0x10].copy_from_slice(&self.stride.to_le_bytes());
        out[0x10..0x14].copy_from_slice(&self.stride_uncompressed.to_le_bytes());
        out[0x14..0x18].copy_from_slice(&self.metadata_base_y.to_le_bytes());
        out[0x18..0x1C].copy_from_slice(&self.metadata_base_uv.to_le_bytes());
        out[0x1C..0x20].copy_from_slice(&self.buffer_y_offset.to_le_bytes());
        out[0x20..0x24].copy_from_slice(&self.buffer_uv_offset.to_le_bytes());
        out[0x24..0x28].copy_from_slice(&self.width_height.to_le_bytes());
        out
    }
}

/// Shift a byte address into cache-line units
pub fn cache_addr(addr: u64) -> u64 {
    addr / CACHE_LINE
}

/// Shift a byte address into page units
pub fn page_addr(addr: u64) -> u32 {
    (addr >> 12) as u32
}

/// Slot arena plus the busy bookkeeping
pub struct DescriptorTable {
    arena: Box<[u8]>,
    busy: [bool; SLOT_COUNT],
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self {
            arena: vec![0u8; SLOT_COUNT * RECORD_BYTES].into_boxed_slice(),
            busy: [false; SLOT_COUNT],
        }
    }

    /// Bytes the device-visible arena must cover
    pub fn arena_len() -> usize {
        SLOT_COUNT * RECORD_BYTES
    }

    /// Claim the lowest free slot
    pub fn allocate(&mut self) -> Option<DescriptorId> {
        let idx = self.busy.iter().position(|b| !*b)?;
        self.busy[idx] = true;
        Some(DescriptorId(idx as u16))
    }

    /// Release a slot and zero its record
    pub fn free(&mut self, id: DescriptorId) {
        let idx = id.index();
        if !self.busy[idx] {
            error!("free of idle descriptor slot {idx}");
            return;
        }
        self.busy[idx] = false;
        self.record_mut(id).fill(0);
    }

    /// Write a record into its slot
    pub fn write(&mut self, id: DescriptorId, record: &MetaRecord) {
        self.record_mut(id).copy_from_slice(&record.encode());
    }

    pub fn record_bytes(&self, id: DescriptorId) -> &[u8] {
        let start = id.index() * RECORD_BYTES;
        &self.arena[start..start + RECORD_BYTES]
    }

    fn record_mut(&mut self, id: DescriptorId) -> &mut [u8] {
        let start = id.index() * RECORD_BYTES;
        &mut self.arena[start..start + RECORD_BYTES]
    }

    pub fn busy_count(&self) -> usize {
        self.busy.iter().filter(|b| **b).count()
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}
