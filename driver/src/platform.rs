//! Platform services seam
//!
//! Everything the driver needs from the surrounding system: cache
//! maintenance, the reserved window's CPU mapping, regulator and clock
//! control, cross-CPU execution, the client mmap configuration callback
//! and the device-visible mapping of client buffers. Production supplies a
//! kernel-backed implementation; [`MockPlatform`] records every call for
//! tests and host development.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::debug;

use crate::buffer::{AccessDir, DeviceMapping};
use crate::error::{DriverError, Result};
use crate::lock_mutex;
use crate::BufferHandle;

/// Services the driver consumes from its environment
pub trait PlatformOps: Send + Sync {
    /// CPUs participating in the prefetch-opcode broadcast
    fn cpu_count(&self) -> usize;

    /// Run a closure on the given CPU
    fn run_on_cpu(&self, cpu: usize, f: Box<dyn FnOnce() + Send>) -> Result<()>;

    /// Enable or disable the prefetch opcode on the calling CPU
    fn prefetch_opcode_ctrl(&self, enable: bool) -> Result<()>;

    fn regulator_enable(&self) -> Result<()>;
    fn regulator_disable(&self) -> Result<()>;
    fn clocks_enable(&self) -> Result<()>;
    fn clocks_disable(&self);

    /// Bring the reserved window online as CPU-addressable memory
    fn map_window(&self, base: u64, size: u64) -> Result<()>;

    /// Tear the window's CPU mapping down
    fn unmap_window(&self, base: u64, size: u64);

    /// Remap the window uncached ahead of the offline sync
    fn set_window_uncached(&self, base: u64, size: u64) -> Result<()>;

    /// Undo [`set_window_uncached`](Self::set_window_uncached) after an
    /// aborted offline
    fn restore_window_caching(&self, base: u64, size: u64) -> Result<()>;

    /// Make device writes in the range visible to the CPU
    fn sync_for_cpu(&self, base: u64, size: u64, dir: AccessDir);

    /// Make CPU writes in the range visible to the device
    fn sync_for_device(&self, base: u64, size: u64, dir: AccessDir);

    /// Point the client's future mmaps at either its own buffer
    /// (`linear`) or the given window range
    fn configure_mmap(&self, handle: BufferHandle, linear: bool, base: u64, size: u64)
        -> Result<()>;

    /// Map the client buffer for device access
    fn device_map(&self, handle: BufferHandle) -> Result<DeviceMapping>;

    /// Drop the device mapping
    fn device_unmap(&self, handle: BufferHandle);

    /// Carve out a device-visible arena for the descriptor table,
    /// returning its device address
    fn alloc_descriptor_arena(&self, size: usize) -> Result<u64>;
}

/// Which mock calls should fail
#[derive(Debug, Default, Clone, Copy)]
pub struct MockFailures {
    pub regulator_enable: bool,
    pub clocks_enable: bool,
    pub map_window: bool,
    pub set_window_uncached: bool,
    pub configure_mmap: bool,
    pub device_map: bool,
}

#[derive(Default)]
struct MockState {
    cpu_count: usize,
    regulator_on: bool,
    clocks_on: bool,
    prefetch_enabled: Vec<bool>,
    window_mapped: bool,
    window_uncached: bool,
    device_buffer_len: HashMap<BufferHandle, u64>,
    device_mapped: HashSet<BufferHandle>,
    next_device_base: u64,
    mmap_config: HashMap<BufferHandle, (bool, u64, u64)>,
    synced_for_cpu: u64,
    synced_for_device: u64,
    sync_calls: usize,
    failures: MockFailures,
}

type SyncHook = Box<dyn Fn(usize) + Send + Sync>;

/// Recording platform for tests.
///
/// Device mappings hand out addresses from a private counter; per-handle
/// buffer lengths default to 256 MiB unless a test sets one.
pub struct MockPlatform {
    state: Mutex<MockState>,
    /// Invoked after every `sync_for_cpu` chunk with the call ordinal.
    /// Lets tests interleave work with the offline sync loop.
    sync_hook: Mutex<Option<SyncHook>>,
}

const DEFAULT_DEVICE_LEN: u64 = 256 * 1024 * 1024;

impl MockPlatform {
    pub fn new() -> Self {
        Self::with_cpus(4)
    }

    pub fn with_cpus(cpu_count: usize) -> Self {
        Self {
            state: Mutex::new(MockState {
                cpu_count,
                prefetch_enabled: vec![true; cpu_count],
                next_device_base: 0x4000_0000,
                ..MockState::default()
            }),
            sync_hook: Mutex::new(None),
        }
    }

    pub fn set_failures(&self, failures: MockFailures) {
        lock_mutex(&self.state).failures = failures;
    }

    pub fn set_device_buffer_len(&self, handle: BufferHandle, len: u64) {
        lock_mutex(&self.state).device_buffer_len.insert(handle, len);
    }

    pub fn set_sync_hook(&self, hook: SyncHook) {
        *lock_mutex(&self.sync_hook) = Some(hook);
    }

    pub fn regulator_on(&self) -> bool {
        lock_mutex(&self.state).regulator_on
    }

    pub fn clocks_on(&self) -> bool {
        lock_mutex(&self.state).clocks_on
    }

    pub fn window_mapped(&self) -> bool {
        lock_mutex(&self.state).window_mapped
    }

    pub fn window_uncached(&self) -> bool {
        lock_mutex(&self.state).window_uncached
    }

    pub fn prefetch_enabled_everywhere(&self) -> bool {
        lock_mutex(&self.state).prefetch_enabled.iter().all(|e| *e)
    }

    pub fn device_mapped(&self, handle: BufferHandle) -> bool {
        lock_mutex(&self.state).device_mapped.contains(&handle)
    }

    pub fn mmap_config(&self, handle: BufferHandle) -> Option<(bool, u64, u64)> {
        lock_mutex(&self.state).mmap_config.get(&handle).copied()
    }

    pub fn synced_for_cpu(&self) -> u64 {
        lock_mutex(&self.state).synced_for_cpu
    }

    pub fn synced_for_device(&self) -> u64 {
        lock_mutex(&self.state).synced_for_device
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformOps for MockPlatform {
    fn cpu_count(&self) -> usize {
        lock_mutex(&self.state).cpu_count
    }

    fn run_on_cpu(&self, cpu: usize, f: Box<dyn FnOnce() + Send>) -> Result<()> {
        debug!("mock: run_on_cpu({cpu})");
        f();
        Ok(())
    }

    fn prefetch_opcode_ctrl(&self, enable: bool) -> Result<()> {
        // The mock cannot tell which CPU the closure landed on; flip all.
        for slot in lock_mutex(&self.state).prefetch_enabled.iter_mut() {
            *slot = enable;
        }
        Ok(())
    }

    fn regulator_enable(&self) -> Result<()> {
        let mut state = lock_mutex(&self.state);
        if state.failures.regulator_enable {
            return Err(DriverError::Platform("regulator enable failed"));
        }
        state.regulator_on = true;
        Ok(())
    }

    fn regulator_disable(&self) -> Result<()> {
        lock_mutex(&self.state).regulator_on = false;
        Ok(())
    }

    fn clocks_enable(&self) -> Result<()> {
        let mut state = lock_mutex(&self.state);
        if state.failures.clocks_enable {
            return Err(DriverError::Platform("clock enable failed"));
        }
        state.clocks_on = true;
        Ok(())
    }

    fn clocks_disable(&self) {
        lock_mutex(&self.state).clocks_on = false;
    }

    fn map_window(&self, _base: u64, _size: u64) -> Result<()> {
        let mut state = lock_mutex(&self.state);
        if state.failures.map_window {
            return Err(DriverError::Platform("window map failed"));
        }
        state.window_mapped = true;
        Ok(())
    }

    fn unmap_window(&self, _base: u64, _size: u64) {
        let mut state = lock_mutex(&self.state);
        state.window_mapped = false;
        state.window_uncached = false;
    }

    fn set_window_uncached(&self, _base: u64, _size: u64) -> Result<()> {
        let mut state = lock_mutex(&self.state);
        if state.failures.set_window_uncached {
            return Err(DriverError::Platform("uncached remap failed"));
        }
        state.window_uncached = true;
        Ok(())
    }

    fn restore_window_caching(&self, _base: u64, _size: u64) -> Result<()> {
        lock_mutex(&self.state).window_uncached = false;
        Ok(())
    }

    fn sync_for_cpu(&self, _base: u64, size: u64, _dir: AccessDir) {
        let ordinal;
        {
            let mut state = lock_mutex(&self.state);
            state.synced_for_cpu += size;
            state.sync_calls += 1;
            ordinal = state.sync_calls;
        }
        if let Some(hook) = lock_mutex(&self.sync_hook).as_ref() {
            hook(ordinal);
        }
    }

    fn sync_for_device(&self, _base: u64, size: u64, _dir: AccessDir) {
        lock_mutex(&self.state).synced_for_device += size;
    }

    fn configure_mmap(
        &self,
        handle: BufferHandle,
        linear: bool,
        base: u64,
        size: u64,
    ) -> Result<()> {
        let mut state = lock_mutex(&self.state);
        if state.failures.configure_mmap {
            return Err(DriverError::Platform("mmap configuration failed"));
        }
        state.mmap_config.insert(handle, (linear, base, size));
        Ok(())
    }

    fn device_map(&self, handle: BufferHandle) -> Result<DeviceMapping> {
        let mut state = lock_mutex(&self.state);
        if state.failures.device_map {
            return Err(DriverError::Platform("device map failed"));
        }
        let len = state
            .device_buffer_len
            .get(&handle)
            .copied()
            .unwrap_or(DEFAULT_DEVICE_LEN);
        let base = state.next_device_base;
        state.next_device_base += crate::geometry::align(len, 4096);
        state.device_mapped.insert(handle);
        Ok(DeviceMapping { base, len })
    }

    fn device_unmap(&self, handle: BufferHandle) {
        lock_mutex(&self.state).device_mapped.remove(&handle);
    }

    fn alloc_descriptor_arena(&self, _size: usize) -> Result<u64> {
        Ok(0x8000_0000)
    }
}
