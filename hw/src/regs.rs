//! Compression block register map
//!
//! Offsets are relative to the block's MMIO base. All registers are 32 bits
//! wide and little-endian.

/// Global registers
pub const REG_HW_VERSION: usize = 0x000; // [31:16] major, [15:0] minor
pub const REG_CTRL: usize = 0x004; // Global control
pub const REG_FLUSH_TRIG: usize = 0x008; // Write 1 to start a global flush
pub const REG_FLUSH_STATUS: usize = 0x00C; // Flush completion status
pub const REG_DESC_BASE_LO: usize = 0x010; // Descriptor table base, low word
pub const REG_DESC_BASE_HI: usize = 0x014; // Descriptor table base, high word
pub const REG_DESC_STRIDE: usize = 0x018; // Bytes per descriptor record

/// Interrupt registers
pub const REG_IRQ_ENABLE: usize = 0x020; // Per-line enable mask
pub const REG_IRQ_STATUS: usize = 0x024; // Pending lines
pub const REG_IRQ_CLEAR: usize = 0x028; // Write line mask to clear

/// Fault address latches, one 64-bit latch per interrupt line.
/// Latch N low word at FAULT_ADDR_BASE + N*8, high word 4 bytes above.
/// Latched values are in cache-line (64-byte) units.
pub const REG_FAULT_ADDR_BASE: usize = 0x030;
pub const FAULT_ADDR_STRIDE: usize = 0x8;

/// Range-check enable bitmap: 8 words of 32 slot bits each.
pub const REG_RANGE_ENABLE_BASE: usize = 0x100;

/// Per-slot range windows: base (lo/hi) and size (lo/hi), 16 bytes per slot.
pub const REG_RANGE_BASE: usize = 0x200;
pub const RANGE_SLOT_STRIDE: usize = 0x10;
pub const RANGE_BASE_LO: usize = 0x0;
pub const RANGE_BASE_HI: usize = 0x4;
pub const RANGE_SIZE_LO: usize = 0x8;
pub const RANGE_SIZE_HI: usize = 0xC;

/// Control register bits
pub const CTRL_ONE_TIME_INIT: u32 = 1 << 0; // Latch power-on defaults

/// Flush register bits
pub const FLUSH_TRIG_START: u32 = 1 << 0;
pub const FLUSH_STATUS_DONE: u32 = 1 << 0;

/// Read attempts before a flush poll gives up
pub const FLUSH_POLL_BUDGET: u32 = 100_000;
