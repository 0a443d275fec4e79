//! Mock compression block for tests and host-side development
//!
//! Records every programming action and exposes accessors so tests can
//! assert on the block's would-be state. Failure injection knobs model a
//! wedged flush path.

use log::debug;

use crate::{Hardware, HwError, IrqLine, IrqMask, Result, DESC_SLOT_COUNT};

/// In-memory stand-in for the register block
pub struct MockHardware {
    version: (u32, u32),
    descriptor_base: Option<(u64, u32)>,
    ranges: [(u64, u64); DESC_SLOT_COUNT],
    enabled: [bool; DESC_SLOT_COUNT],
    irq_enabled: IrqMask,
    pending: IrqMask,
    fault_latch: [u64; 4],
    init_done: bool,

    /// Completed global flushes
    pub flush_count: usize,
    /// When set, every flush reports a timeout
    pub fail_flush: bool,
}

impl MockHardware {
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            version: (major, minor),
            descriptor_base: None,
            ranges: [(0, 0); DESC_SLOT_COUNT],
            enabled: [false; DESC_SLOT_COUNT],
            irq_enabled: IrqMask::empty(),
            pending: IrqMask::empty(),
            fault_latch: [0; 4],
            init_done: false,
            flush_count: 0,
            fail_flush: false,
        }
    }

    /// Latch a fault address (cache-line units) and raise the line
    pub fn raise(&mut self, line: IrqLine, address: u64) {
        self.fault_latch[line.index()] = address;
        self.pending |= line.mask();
    }

    pub fn is_pending(&self, line: IrqLine) -> bool {
        self.pending.contains(line.mask())
    }

    pub fn is_enabled(&self, slot: usize) -> bool {
        self.enabled[slot]
    }

    pub fn range(&self, slot: usize) -> (u64, u64) {
        self.ranges[slot]
    }

    pub fn enabled_slots(&self) -> usize {
        self.enabled.iter().filter(|e| **e).count()
    }

    pub fn descriptor_base(&self) -> Option<(u64, u32)> {
        self.descriptor_base
    }

    pub fn irq_enabled_mask(&self) -> IrqMask {
        self.irq_enabled
    }

    pub fn init_done(&self) -> bool {
        self.init_done
    }
}

impl Hardware for MockHardware {
    fn version(&mut self) -> (u32, u32) {
        self.version
    }

    fn one_time_init(&mut self) {
        self.init_done = true;
    }

    fn set_descriptor_base(&mut self, base: u64, record_bytes: u32) {
        debug!("mock: descriptor base {base:#x} stride {record_bytes}");
        self.descriptor_base = if base == 0 {
            None
        } else {
            Some((base, record_bytes))
        };
    }

    fn program_range(&mut self, slot: usize, base: u64, size: u64) {
        self.ranges[slot] = (base, size);
    }

    fn enable_range_check(&mut self, slot: usize) {
        self.enabled[slot] = true;
    }

    fn disable_range_check(&mut self, slot: usize) -> Result<()> {
        self.enabled[slot] = false;
        self.flush().map_err(|_| HwError::DisableFailed { slot })
    }

    fn flush(&mut self) -> Result<()> {
        if self.fail_flush {
            return Err(HwError::FlushTimeout);
        }
        self.flush_count += 1;
        Ok(())
    }

    fn irq_enable(&mut self, line: IrqLine, enable: bool) {
        if enable {
            self.irq_enabled |= line.mask();
        } else {
            self.irq_enabled -= line.mask();
        }
    }

    fn irq_clear(&mut self, line: IrqLine) {
        self.pending -= line.mask();
    }

    fn fault_address(&mut self, line: IrqLine) -> u64 {
        self.fault_latch[line.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_lifecycle() {
        let mut hw = MockHardware::new(2, 0);
        hw.program_range(7, 0x8000_0000, 0x2000);
        hw.enable_range_check(7);
        assert!(hw.is_enabled(7));
        assert_eq!(hw.range(7), (0x8000_0000, 0x2000));

        hw.disable_range_check(7).unwrap();
        assert!(!hw.is_enabled(7));
        // Disable carries its own flush.
        assert_eq!(hw.flush_count, 1);
    }

    #[test]
    fn test_flush_failure_injection() {
        let mut hw = MockHardware::new(2, 0);
        hw.fail_flush = true;
        assert_eq!(hw.flush(), Err(HwError::FlushTimeout));
        assert_eq!(
            hw.disable_range_check(3),
            Err(HwError::DisableFailed { slot: 3 })
        );
    }

    #[test]
    fn test_raise_and_clear() {
        let mut hw = MockHardware::new(1, 1);
        hw.raise(IrqLine::RangeWrite, 0x1234);
        assert!(hw.is_pending(IrqLine::RangeWrite));
        assert_eq!(hw.fault_address(IrqLine::RangeWrite), 0x1234);
        hw.irq_clear(IrqLine::RangeWrite);
        assert!(!hw.is_pending(IrqLine::RangeWrite));
    }
}
