//! Volatile MMIO implementation of the [`Hardware`] trait

use core::ptr::{read_volatile, write_volatile};

use log::{debug, error};

use crate::regs::*;
use crate::{Hardware, HwError, IrqLine, Result};

/// Compression block behind a memory-mapped register window
pub struct MmioHardware {
    base: usize,
}

impl MmioHardware {
    /// Create a handle over a mapped register window
    ///
    /// # Safety
    /// The caller must ensure `base` points at the block's registers,
    /// mapped uncached, and that no other handle drives the same block.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    #[inline]
    unsafe fn read_reg(&self, offset: usize) -> u32 {
        read_volatile((self.base + offset) as *const u32)
    }

    #[inline]
    unsafe fn write_reg(&mut self, offset: usize, value: u32) {
        write_volatile((self.base + offset) as *mut u32, value);
    }

    unsafe fn write_reg64(&mut self, lo_offset: usize, hi_offset: usize, value: u64) {
        self.write_reg(lo_offset, value as u32);
        self.write_reg(hi_offset, (value >> 32) as u32);
    }

    unsafe fn read_reg64(&self, lo_offset: usize, hi_offset: usize) -> u64 {
        let lo = self.read_reg(lo_offset) as u64;
        let hi = self.read_reg(hi_offset) as u64;
        (hi << 32) | lo
    }

    fn slot_base(slot: usize) -> usize {
        REG_RANGE_BASE + slot * RANGE_SLOT_STRIDE
    }

    fn enable_word(slot: usize) -> (usize, u32) {
        let word = REG_RANGE_ENABLE_BASE + (slot / 32) * 4;
        let bit = 1u32 << (slot % 32);
        (word, bit)
    }
}

impl Hardware for MmioHardware {
    fn version(&mut self) -> (u32, u32) {
        let v = unsafe { self.read_reg(REG_HW_VERSION) };
        (v >> 16, v & 0xFFFF)
    }

    fn one_time_init(&mut self) {
        unsafe { self.write_reg(REG_CTRL, CTRL_ONE_TIME_INIT) }
    }

    fn set_descriptor_base(&mut self, base: u64, record_bytes: u32) {
        debug!("descriptor base {base:#x} stride {record_bytes}");
        unsafe {
            self.write_reg64(REG_DESC_BASE_LO, REG_DESC_BASE_HI, base);
            self.write_reg(REG_DESC_STRIDE, record_bytes);
        }
    }

    fn program_range(&mut self, slot: usize, base: u64, size: u64) {
        let off = Self::slot_base(slot);
        unsafe {
            self.write_reg64(off + RANGE_BASE_LO, off + RANGE_BASE_HI, base);
            self.write_reg64(off + RANGE_SIZE_LO, off + RANGE_SIZE_HI, size);
        }
    }

    fn enable_range_check(&mut self, slot: usize) {
        let (word, bit) = Self::enable_word(slot);
        unsafe {
            let cur = self.read_reg(word);
            self.write_reg(word, cur | bit);
        }
    }

    fn disable_range_check(&mut self, slot: usize) -> Result<()> {
        let (word, bit) = Self::enable_word(slot);
        unsafe {
            let cur = self.read_reg(word);
            self.write_reg(word, cur & !bit);
        }
        // Stale translations for the slot must not survive the disable.
        self.flush()
            .map_err(|_| HwError::DisableFailed { slot })
    }

    fn flush(&mut self) -> Result<()> {
        unsafe { self.write_reg(REG_FLUSH_TRIG, FLUSH_TRIG_START) };
        for _ in 0..FLUSH_POLL_BUDGET {
            let status = unsafe { self.read_reg(REG_FLUSH_STATUS) };
            if status & FLUSH_STATUS_DONE != 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        error!("flush timed out after {FLUSH_POLL_BUDGET} polls");
        Err(HwError::FlushTimeout)
    }

    fn irq_enable(&mut self, line: IrqLine, enable: bool) {
        let bit = line.mask().bits();
        unsafe {
            let cur = self.read_reg(REG_IRQ_ENABLE);
            let next = if enable { cur | bit } else { cur & !bit };
            self.write_reg(REG_IRQ_ENABLE, next);
        }
    }

    fn irq_clear(&mut self, line: IrqLine) {
        unsafe { self.write_reg(REG_IRQ_CLEAR, line.mask().bits()) }
    }

    fn fault_address(&mut self, line: IrqLine) -> u64 {
        let off = REG_FAULT_ADDR_BASE + line.index() * FAULT_ADDR_STRIDE;
        unsafe { self.read_reg64(off, off + 4) }
    }
}
