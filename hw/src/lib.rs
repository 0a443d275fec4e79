//! Register-level control interface for the bandwidth-compression block
//!
//! The block translates device accesses inside per-buffer address ranges
//! through a table of 64-byte descriptor records. This crate covers the
//! register-level primitives only:
//!
//! - one-time init and version readout
//! - descriptor table base programming
//! - per-slot range windows and range-check enable bits
//! - the global flush (mandatory after enabling a slot)
//! - error interrupt enable/clear and fault address latches
//!
//! Policy (who owns which slot, when to flush, power sequencing) lives in
//! the driver crate. Two implementations are provided: [`mmio::MmioHardware`]
//! for a real register block and [`mock::MockHardware`] for tests and
//! host-side development.

pub mod mmio;
pub mod mock;
pub mod regs;

use bitflags::bitflags;
use thiserror::Error;

/// Number of descriptor slots the block supports
pub const DESC_SLOT_COUNT: usize = 256;

/// Bytes per descriptor record
pub const DESC_RECORD_BYTES: usize = 64;

/// Errors surfaced by register-level operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HwError {
    #[error("global flush did not complete within the poll budget")]
    FlushTimeout,

    #[error("range check for slot {slot} did not disable cleanly")]
    DisableFailed { slot: usize },
}

pub type Result<T> = core::result::Result<T, HwError>;

bitflags! {
    /// Error interrupt lines
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqMask: u32 {
        const RANGE_READ = 1 << 0;
        const RANGE_WRITE = 1 << 1;
        const ENCODE = 1 << 2;
        const DECODE = 1 << 3;
    }
}

/// A single error interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqLine {
    /// Device read outside every enabled range
    RangeRead,
    /// Device write outside every enabled range
    RangeWrite,
    /// Compression error
    Encode,
    /// Decompression error
    Decode,
}

impl IrqLine {
    pub const ALL: [IrqLine; 4] = [
        IrqLine::RangeRead,
        IrqLine::RangeWrite,
        IrqLine::Encode,
        IrqLine::Decode,
    ];

    /// Fault-latch index of this line
    pub fn index(self) -> usize {
        match self {
            IrqLine::RangeRead => 0,
            IrqLine::RangeWrite => 1,
            IrqLine::Encode => 2,
            IrqLine::Decode => 3,
        }
    }

    /// Enable/status mask bit of this line
    pub fn mask(self) -> IrqMask {
        match self {
            IrqLine::RangeRead => IrqMask::RANGE_READ,
            IrqLine::RangeWrite => IrqMask::RANGE_WRITE,
            IrqLine::Encode => IrqMask::ENCODE,
            IrqLine::Decode => IrqMask::DECODE,
        }
    }
}

/// Register-level operations of the compression block.
///
/// Callers serialize access externally; implementations do not lock.
/// The block must be powered for every call.
pub trait Hardware: Send {
    /// Read the hardware revision as (major, minor)
    fn version(&mut self) -> (u32, u32);

    /// Latch power-on defaults. Called once at bring-up.
    fn one_time_init(&mut self);

    /// Program the device-visible base and record stride of the
    /// descriptor table. A zero base detaches the table.
    fn set_descriptor_base(&mut self, base: u64, record_bytes: u32);

    /// Program a slot's address range window
    fn program_range(&mut self, slot: usize, base: u64, size: u64);

    /// Turn on range checking for a slot. A global flush is required
    /// before the slot's translations are coherent.
    fn enable_range_check(&mut self, slot: usize);

    /// Turn off range checking for a slot and flush so no stale
    /// translation survives.
    fn disable_range_check(&mut self, slot: usize) -> Result<()>;

    /// Run a global flush to completion
    fn flush(&mut self) -> Result<()>;

    /// Enable or disable one error interrupt line
    fn irq_enable(&mut self, line: IrqLine, enable: bool);

    /// Clear one line's pending flag
    fn irq_clear(&mut self, line: IrqLine);

    /// Read a line's fault address latch, in cache-line units
    fn fault_address(&mut self, line: IrqLine) -> u64;
}
