//! Window hotplug and power control
//!
//! The reserved window is CPU-addressable memory only while at least one
//! non-linear buffer exists. An atomic counter tracks that population; the
//! 0->1 edge powers the block and maps the window, the 1->0 edge runs the
//! chunked offline sync and unmaps it. The counter moves before the
//! hotplug mutex is taken so a concurrent offline sees the newcomer and
//! aborts between chunks.
//!
//! Power is an independent refcount; real transitions also broadcast the
//! prefetch-opcode toggle to every CPU and wait for all of them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::sync::WaitGroup;
use log::{debug, error, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::lock_mutex;
use crate::platform::PlatformOps;
use crate::StateCell;

pub(crate) struct HotplugController {
    platform: Arc<dyn PlatformOps>,
    window_base: u64,
    window_size: u64,
    sync_granule: u64,
    non_linear: AtomicU32,
    /// Held across online/offline transitions, including the whole
    /// chunked sync loop
    mem: Mutex<bool>,
    /// Power refcount
    power: Mutex<u32>,
}

impl HotplugController {
    pub fn new(platform: Arc<dyn PlatformOps>, config: &DriverConfig) -> Self {
        Self {
            platform,
            window_base: config.window_base,
            window_size: config.window_size,
            sync_granule: config.sync_granule,
            non_linear: AtomicU32::new(0),
            mem: Mutex::new(false),
            power: Mutex::new(0),
        }
    }

    pub fn non_linear_count(&self) -> u32 {
        self.non_linear.load(Ordering::SeqCst)
    }

    pub fn is_online(&self) -> bool {
        *lock_mutex(&self.mem)
    }

    /// Account a new non-linear buffer; brings the window online on the
    /// 0->1 edge. A failure latches FAULT and undoes the count.
    pub fn increment(&self, state: &StateCell) -> Result<()> {
        self.non_linear.fetch_add(1, Ordering::SeqCst);
        let mut online = lock_mutex(&self.mem);
        if !*online {
            if let Err(e) = self.bring_online() {
                drop(online);
                self.non_linear.fetch_sub(1, Ordering::SeqCst);
                state.set_fault();
                return Err(e);
            }
            *online = true;
        }
        Ok(())
    }

    fn bring_online(&self) -> Result<()> {
        self.power(true)?;
        if let Err(e) = self.platform.map_window(self.window_base, self.window_size) {
            if let Err(off) = self.power(false) {
                error!("power off after failed window map also failed: {off}");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Account a released non-linear buffer; takes the window offline on
    /// the 1->0 edge unless a newcomer aborts the sync.
    pub fn decrement(&self, state: &StateCell) -> Result<()> {
        self.non_linear.fetch_sub(1, Ordering::SeqCst);
        let mut online = lock_mutex(&self.mem);
        if self.non_linear.load(Ordering::SeqCst) == 0 {
            if let Err(e) = self.take_offline(&mut online) {
                drop(online);
                self.non_linear.fetch_add(1, Ordering::SeqCst);
                state.set_fault();
                return Err(e);
            }
        }
        Ok(())
    }

    fn take_offline(&self, online: &mut bool) -> Result<()> {
        if !*online {
            error!("offline requested but the window is not online");
            return Err(DriverError::Platform("window already offline"));
        }
        debug!("last non-linear buffer gone, taking the window offline");

        self.platform
            .set_window_uncached(self.window_base, self.window_size)?;

        let mut remain = self.window_size;
        let mut offset = 0u64;
        while remain > 0 {
            // A buffer that appeared since we started wins; leave the
            // window mapped and report success.
            if self.non_linear.load(Ordering::SeqCst) > 0 {
                debug!("window offline aborted by a new buffer");
                self.platform
                    .restore_window_caching(self.window_base, self.window_size)?;
                return Ok(());
            }
            let chunk = remain.min(self.sync_granule);
            self.platform.sync_for_cpu(
                self.window_base + offset,
                chunk,
                crate::buffer::AccessDir::ReadWrite,
            );
            offset += chunk;
            remain -= chunk;
        }

        self.platform.unmap_window(self.window_base, self.window_size);
        *online = false;
        self.power(false)
    }

    /// Raise or drop the power refcount; real rail transitions happen only
    /// on the 0<->1 edges.
    pub fn power(&self, enable: bool) -> Result<()> {
        let mut count = lock_mutex(&self.power);
        if enable {
            *count += 1;
            if *count != 1 {
                return Ok(());
            }
            self.broadcast_prefetch(false)?;
            self.platform.regulator_enable()?;
            if let Err(e) = self.platform.clocks_enable() {
                if let Err(reg) = self.platform.regulator_disable() {
                    error!("regulator disable during clock unwind failed: {reg}");
                }
                return Err(e);
            }
        } else {
            *count -= 1;
            if *count != 0 {
                return Ok(());
            }
            self.platform.regulator_disable()?;
            self.platform.clocks_disable();
            self.broadcast_prefetch(true)?;
        }
        Ok(())
    }

    /// Toggle the prefetch opcode on every CPU and wait for all of them.
    fn broadcast_prefetch(&self, enable: bool) -> Result<()> {
        let wg = WaitGroup::new();
        for cpu in 0..self.platform.cpu_count() {
            let wg = wg.clone();
            let platform = Arc::clone(&self.platform);
            self.platform.run_on_cpu(
                cpu,
                Box::new(move || {
                    if let Err(e) = platform.prefetch_opcode_ctrl(enable) {
                        // Tolerated; the firmware hook may be absent.
                        warn!("prefetch opcode ctrl failed on cpu {cpu}: {e}");
                    }
                    drop(wg);
                }),
            )?;
        }
        wg.wait();
        Ok(())
    }
}
