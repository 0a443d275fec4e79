//! Driver context and buffer lifecycle entry points
//!
//! Operation ordering rules:
//! - attribute changes commit only after every side effect (extent,
//!   device mapping, hotplug count, mmap configuration) has landed; any
//!   failure unwinds the buffer to linear
//! - the first lock claims a descriptor slot, programs the range, enables
//!   checking and runs the mandatory global flush before any cache
//!   maintenance
//! - unlock does its real work only when the outstanding-lock count hits
//!   zero; free forces that path first
//!
//! Lock hierarchy: registry lock only for map access, buffer lock for
//! per-buffer work, flush lock before the range-check lock, the hardware
//! mutex innermost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, warn};

use bwc_hw::{Hardware, IrqLine};

use crate::buffer::{AccessDir, BufferState, Configured, LockedState, Placement};
use crate::config::DriverConfig;
use crate::descriptor::{cache_addr, page_addr, DescriptorId, DescriptorTable, MetaRecord, RECORD_BYTES};
use crate::error::{DriverError, Result};
use crate::fault::{AccessKind, ErrorEvent, ErrorHandler, FaultNotifier, TranslationContext};
use crate::format::{BufferAttrs, ImageFormat, StdFormat};
use crate::geometry::{self, CACHE_LINE};
use crate::hotplug::HotplugController;
use crate::platform::PlatformOps;
use crate::registry::BufferRegistry;
use crate::ula::{UlaExtent, UlaPool};
use crate::{lock_mutex, BufferHandle, DriverState, StateCell};

struct DescriptorContext {
    table: DescriptorTable,
    device_base: u64,
}

/// The driver context, threaded through every entry point
pub struct BwcDriver {
    state: StateCell,
    hw: Mutex<Box<dyn Hardware>>,
    platform: Arc<dyn PlatformOps>,
    version: (u32, u32),
    registry: BufferRegistry,
    ula: Mutex<UlaPool>,
    descriptors: Mutex<Option<DescriptorContext>>,
    hotplug: HotplugController,
    notifier: FaultNotifier,
    buffer_context: AtomicBool,
    flush_lock: Mutex<()>,
    range_lock: Mutex<()>,
}

impl BwcDriver {
    /// Bring the block up: power on, latch defaults, mask interrupts and
    /// read the version. A zero major version fails bring-up.
    pub fn new(
        config: DriverConfig,
        mut hw: Box<dyn Hardware>,
        platform: Arc<dyn PlatformOps>,
    ) -> Result<Self> {
        config.validate()?;
        let hotplug = HotplugController::new(Arc::clone(&platform), &config);

        hotplug.power(true)?;
        hw.one_time_init();
        for line in IrqLine::ALL {
            hw.irq_enable(line, false);
        }
        let version = hw.version();
        let power_off = hotplug.power(false);
        if version.0 == 0 {
            return Err(DriverError::BringUp {
                reason: "hardware major version reads back as zero",
            });
        }
        power_off?;
        debug!("hardware version {}.{}", version.0, version.1);

        Ok(Self {
            state: StateCell::new(DriverState::Invalid),
            hw: Mutex::new(hw),
            platform,
            version,
            registry: BufferRegistry::new(),
            ula: Mutex::new(UlaPool::new(config.window_base, config.window_size)),
            descriptors: Mutex::new(None),
            hotplug,
            notifier: FaultNotifier::new(),
            buffer_context: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
            range_lock: Mutex::new(()),
        })
    }

    pub fn state(&self) -> DriverState {
        self.state.get()
    }

    pub fn non_linear_buffers(&self) -> u32 {
        self.hotplug.non_linear_count()
    }

    pub fn window_online(&self) -> bool {
        self.hotplug.is_online()
    }

    pub fn registered_buffers(&self) -> usize {
        self.registry.len()
    }

    pub fn descriptor_slots_in_use(&self) -> usize {
        lock_mutex(&self.descriptors)
            .as_ref()
            .map_or(0, |ctx| ctx.table.busy_count())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state.get() {
            DriverState::Ready => Ok(()),
            DriverState::Invalid => Err(DriverError::NotReady),
            DriverState::Fault => Err(DriverError::Faulted),
        }
    }

    fn update_ready(&self) {
        if self.buffer_context.load(Ordering::SeqCst) && lock_mutex(&self.descriptors).is_some() {
            self.state.set(DriverState::Ready);
        }
    }

    /// Attach the descriptor translation sub-context: allocate the
    /// device-visible record arena and point the hardware at it.
    pub fn attach_descriptor_context(&self) -> Result<()> {
        let mut descriptors = lock_mutex(&self.descriptors);
        if descriptors.is_some() {
            return Err(DriverError::InvalidState {
                reason: "descriptor context already attached",
            });
        }
        let device_base = self
            .platform
            .alloc_descriptor_arena(DescriptorTable::arena_len())?;
        self.hotplug.power(true)?;
        lock_mutex(&self.hw).set_descriptor_base(device_base, RECORD_BYTES as u32);
        self.hotplug.power(false)?;
        *descriptors = Some(DescriptorContext {
            table: DescriptorTable::new(),
            device_base,
        });
        drop(descriptors);
        self.update_ready();
        Ok(())
    }

    /// Attach the buffer translation sub-context. The driver is READY
    /// once both sub-contexts have reported in.
    pub fn attach_buffer_context(&self) -> Result<()> {
        if self.buffer_context.swap(true, Ordering::SeqCst) {
            return Err(DriverError::InvalidState {
                reason: "buffer context already attached",
            });
        }
        self.update_ready();
        Ok(())
    }

    /// Detach the descriptor sub-context, clearing the hardware's table
    /// base. Returns the driver to INVALID (FAULT stays latched).
    pub fn detach_descriptor_context(&self) -> Result<()> {
        let mut descriptors = lock_mutex(&self.descriptors);
        if descriptors.take().is_none() {
            return Err(DriverError::InvalidState {
                reason: "descriptor context not attached",
            });
        }
        self.state.set(DriverState::Invalid);
        self.hotplug.power(true)?;
        lock_mutex(&self.hw).set_descriptor_base(0, 0);
        self.hotplug.power(false)
    }

    /// Detach the buffer sub-context. Returns the driver to INVALID.
    pub fn detach_buffer_context(&self) -> Result<()> {
        if !self.buffer_context.swap(false, Ordering::SeqCst) {
            return Err(DriverError::InvalidState {
                reason: "buffer context not attached",
            });
        }
        self.state.set(DriverState::Invalid);
        Ok(())
    }

    /// Register a buffer. Fresh buffers are linear with no attributes.
    pub fn init_buffer(&self, handle: BufferHandle) -> Result<()> {
        self.ensure_ready()?;
        self.registry.insert(handle)
    }

    /// Hardware revision; available in every state except INVALID
    pub fn hw_version(&self) -> Result<(u32, u32)> {
        if self.state.get() == DriverState::Invalid {
            return Err(DriverError::NotReady);
        }
        Ok(self.version)
    }

    /// Required stride alignment of a non-linear format
    pub fn stride_alignment(&self, format: ImageFormat) -> Result<u32> {
        self.ensure_ready()?;
        let std = format
            .std_format()
            .ok_or(DriverError::InvalidAttributes {
                reason: "linear images have no stride alignment",
            })?;
        Ok(std.stride_alignment())
    }

    /// Standalone stride check for a non-linear format
    pub fn validate_stride(&self, format: ImageFormat, width: u32, stride: u32) -> Result<bool> {
        self.ensure_ready()?;
        let std = format
            .std_format()
            .ok_or(DriverError::InvalidAttributes {
                reason: "linear images have no stride rule",
            })?;
        Ok(geometry::stride_is_valid(std, width, stride))
    }

    /// Drop a buffer back to linear: free its extent, its device mapping
    /// and its attributes.
    fn reset_to_linear(&self, st: &mut BufferState, handle: BufferHandle) {
        if let Some(extent) = st.ula_extent() {
            lock_mutex(&self.ula).free(extent);
        }
        st.placement = Placement::Linear;
        if st.mapping.take().is_some() {
            self.platform.device_unmap(handle);
        }
        st.attrs = BufferAttrs::linear();
        st.attrs_set = false;
    }

    /// Failure unwind for a half-applied attribution. `extent` is an
    /// extent not yet recorded in the placement.
    fn unwind_attrs(
        &self,
        st: &mut BufferState,
        handle: BufferHandle,
        extent: Option<UlaExtent>,
        was_non_linear: bool,
    ) {
        if let Some(extent) = extent {
            lock_mutex(&self.ula).free(extent);
        }
        self.reset_to_linear(st, handle);
        if was_non_linear {
            if let Err(e) = self.hotplug.decrement(&self.state) {
                error!("hotplug decrement during unwind failed: {e}");
            }
        }
    }

    /// Set buffer attributes.
    ///
    /// On failure the buffer may be left linear rather than in its
    /// previous attributes; the caller must re-attribute it.
    pub fn set_buffer_attrs(&self, handle: BufferHandle, attrs: &BufferAttrs) -> Result<()> {
        self.ensure_ready()?;
        attrs.validate()?;
        let slot = self
            .registry
            .get(handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        let mut st = lock_mutex(&slot.state);
        if st.is_locked() {
            return Err(DriverError::Busy);
        }
        let was_non_linear = !st.attrs.format.is_linear();

        // Point the client's mmap view back at its own buffer before any
        // layout change.
        self.platform.configure_mmap(handle, true, 0, 0)?;

        if attrs.format.is_linear() {
            self.reset_to_linear(&mut st, handle);
            st.attrs = *attrs;
            st.attrs_set = true;
            if was_non_linear {
                return self.hotplug.decrement(&self.state);
            }
            return Ok(());
        }
        let std = attrs
            .format
            .std_format()
            .ok_or(DriverError::InvalidAttributes {
                reason: "unmapped image format",
            })?;

        let ula_layout = geometry::ula_layout(attrs)?;
        geometry::validate_uv_alignment(attrs, &ula_layout)?;
        let layout = geometry::compressed_layout(attrs)?;
        let min_mapping = layout.min_mapping_size();

        // Resize the extent; the old placement is consumed either way.
        let current = st.ula_extent();
        st.placement = Placement::Linear;
        let extent = match lock_mutex(&self.ula).realloc(current, ula_layout.total) {
            Some(extent) => extent,
            None => {
                error!("window exhausted for {} bytes", ula_layout.total);
                self.unwind_attrs(&mut st, handle, None, was_non_linear);
                return Err(DriverError::UlaExhausted {
                    requested: ula_layout.total,
                });
            }
        };

        // Device mapping is established once, on the first non-linear
        // attribution.
        let mapping = match st.mapping {
            Some(mapping) => mapping,
            None => match self.platform.device_map(handle) {
                Ok(mapping) => {
                    st.mapping = Some(mapping);
                    mapping
                }
                Err(e) => {
                    self.unwind_attrs(&mut st, handle, Some(extent), was_non_linear);
                    return Err(e);
                }
            },
        };
        if mapping.len < min_mapping {
            self.unwind_attrs(&mut st, handle, Some(extent), was_non_linear);
            return Err(DriverError::MappingTooSmall {
                have: mapping.len,
                need: min_mapping,
            });
        }

        let uv_start = extent.base + ula_layout.uv_start_offset;
        if uv_start % CACHE_LINE != 0 {
            self.unwind_attrs(&mut st, handle, Some(extent), was_non_linear);
            return Err(DriverError::InvalidAttributes {
                reason: "chroma start not cache-line aligned inside the window",
            });
        }

        let record = self.build_record(attrs, std, &layout, uv_start, mapping.base);

        if !was_non_linear {
            if let Err(e) = self.hotplug.increment(&self.state) {
                // The count was rolled back; unwind without a decrement.
                self.unwind_attrs(&mut st, handle, Some(extent), false);
                return Err(e);
            }
        }

        if let Err(e) = self
            .platform
            .configure_mmap(handle, false, extent.base, extent.size)
        {
            if !was_non_linear {
                if let Err(dec) = self.hotplug.decrement(&self.state) {
                    error!("hotplug decrement after mmap failure failed: {dec}");
                }
            }
            self.unwind_attrs(&mut st, handle, Some(extent), was_non_linear);
            return Err(e);
        }

        st.attrs = *attrs;
        st.attrs_set = true;
        st.placement = Placement::Configured(Configured {
            ula: extent,
            layout,
            record,
            uv_start,
        });
        Ok(())
    }

    fn build_record(
        &self,
        attrs: &BufferAttrs,
        std: StdFormat,
        layout: &geometry::CompressedLayout,
        uv_start: u64,
        mapping_base: u64,
    ) -> MetaRecord {
        // TP10 compression programs P010 width/height.
        let (width_b, height_b) = if std == StdFormat::Tp10 {
            geometry::pixel_to_bytes(StdFormat::P010, attrs.width, attrs.height)
        } else {
            geometry::pixel_to_bytes(std, attrs.width, attrs.height)
        };

        let mut record = MetaRecord {
            uv_start_addr: cache_addr(uv_start),
            format: std.hw_code(),
            metadata_base_y: page_addr(mapping_base),
            metadata_base_uv: page_addr(mapping_base + layout.metadata_p0 + layout.pixeldata_p0),
            buffer_y_offset: page_addr(layout.metadata_p0),
            buffer_uv_offset: page_addr(layout.metadata_p1),
            ..MetaRecord::default()
        };
        if std == StdFormat::Tp10 {
            record.stride = cache_addr(layout.tp10_stride) as u32;
            record.stride_uncompressed = cache_addr(attrs.stride as u64) as u32;
        } else {
            record.stride = cache_addr(attrs.stride as u64) as u32;
        }
        // v1.1 wants both halves in bytes; everything else takes the
        // height in pixels.
        record.width_height = if self.version == (1, 1) {
            (width_b << 16) | height_b
        } else {
            (width_b << 16) | attrs.height
        };
        record
    }

    /// Last-set attributes of a buffer
    pub fn get_buffer_attrs(&self, handle: BufferHandle) -> Result<BufferAttrs> {
        self.ensure_ready()?;
        let slot = self
            .registry
            .get(handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        let st = lock_mutex(&slot.state);
        if !st.attrs_set {
            return Err(DriverError::InvalidState {
                reason: "attributes never set",
            });
        }
        Ok(st.attrs)
    }

    fn flush_hw(&self) -> Result<()> {
        let _flush = lock_mutex(&self.flush_lock);
        Ok(lock_mutex(&self.hw).flush()?)
    }

    fn range_check_enable(&self, slot: DescriptorId) {
        let _range = lock_mutex(&self.range_lock);
        lock_mutex(&self.hw).enable_range_check(slot.index());
    }

    fn range_check_disable(&self, slot: DescriptorId) -> Result<()> {
        let _flush = lock_mutex(&self.flush_lock);
        let _range = lock_mutex(&self.range_lock);
        Ok(lock_mutex(&self.hw).disable_range_check(slot.index())?)
    }

    /// Lock a buffer for CPU access in the given direction.
    ///
    /// The first lock claims a descriptor slot, programs and enables the
    /// range check, flushes, and invalidates for CPU reads. Nested locks
    /// merge directions; a write-locked buffer cannot add read access
    /// because the required invalidation could drop live lines.
    pub fn lock(&self, handle: BufferHandle, dir: AccessDir) -> Result<()> {
        self.ensure_ready()?;
        let slot = self
            .registry
            .get(handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        let mut st = lock_mutex(&slot.state);
        if !st.attrs_set || st.attrs.format.is_linear() {
            return Err(DriverError::InvalidState {
                reason: "lock requires non-linear attributes",
            });
        }

        match std::mem::replace(&mut st.placement, Placement::Linear) {
            Placement::Linear => Err(DriverError::InvalidState {
                reason: "buffer has no configured placement",
            }),
            Placement::Locked(mut locked) => {
                if locked.dir == AccessDir::Write && dir != AccessDir::Write {
                    st.placement = Placement::Locked(locked);
                    return Err(DriverError::InvalidState {
                        reason: "write-locked buffer cannot be locked for read",
                    });
                }
                if locked.dir != dir {
                    locked.dir = AccessDir::ReadWrite;
                }
                locked.count += 1;
                debug!("nested lock, count {}", locked.count);
                st.placement = Placement::Locked(locked);
                Ok(())
            }
            Placement::Configured(cfg) => self.first_lock(&mut st, cfg, dir),
        }
    }

    fn first_lock(&self, st: &mut BufferState, cfg: Configured, dir: AccessDir) -> Result<()> {
        let mut descriptors = lock_mutex(&self.descriptors);
        let Some(ctx) = descriptors.as_mut() else {
            st.placement = Placement::Configured(cfg);
            return Err(DriverError::NotReady);
        };

        // A retained slot is already programmed from its previous use.
        let (slot, fresh) = match st.retained_slot.take() {
            Some(slot) => (slot, false),
            None => match ctx.table.allocate() {
                Some(slot) => (slot, true),
                None => {
                    st.placement = Placement::Configured(cfg);
                    return Err(DriverError::NoFreeDescriptor);
                }
            },
        };
        if fresh {
            ctx.table.write(slot, &cfg.record);
            lock_mutex(&self.hw).program_range(slot.index(), cfg.ula.base, cfg.ula.size);
        }
        drop(descriptors);

        self.range_check_enable(slot);

        // Mandatory: no translation through the slot is coherent until a
        // global flush completes.
        if let Err(e) = self.flush_hw() {
            self.state.set_fault();
            error!("flush after range enable failed, state set to fault");
            if let Err(dis) = self.range_check_disable(slot) {
                error!("range disable during lock unwind failed: {dis}");
            }
            if let Some(ctx) = lock_mutex(&self.descriptors).as_mut() {
                ctx.table.free(slot);
            }
            st.placement = Placement::Configured(cfg);
            return Err(e);
        }

        if dir.reads_device() {
            self.platform.sync_for_cpu(cfg.ula.base, cfg.ula.size, dir);
        }

        st.placement = Placement::Locked(LockedState {
            cfg,
            slot,
            dir,
            count: 1,
        });
        Ok(())
    }

    /// Unlock a buffer. Work happens only when the lock count reaches
    /// zero: flush CPU writes toward the device, disable the range check
    /// and release the slot.
    pub fn unlock(&self, handle: BufferHandle, dir: AccessDir) -> Result<()> {
        self.ensure_ready()?;
        let slot = self
            .registry
            .get(handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        let mut st = lock_mutex(&slot.state);
        if !st.is_locked() {
            return Err(DriverError::InvalidState {
                reason: "buffer is not locked",
            });
        }
        self.unlock_internal(&mut st, dir, false)
    }

    fn unlock_internal(&self, st: &mut BufferState, dir: AccessDir, force: bool) -> Result<()> {
        let mut locked = match std::mem::replace(&mut st.placement, Placement::Linear) {
            Placement::Locked(locked) => locked,
            other => {
                st.placement = other;
                return Ok(());
            }
        };

        if force {
            locked.count = 0;
        } else {
            // Remember a widened direction so the last unlock flushes.
            if locked.dir != dir {
                locked.dir = AccessDir::ReadWrite;
            }
            locked.count -= 1;
            if locked.count > 0 {
                debug!("nested unlock, count {}", locked.count);
                st.placement = Placement::Locked(locked);
                return Ok(());
            }
        }

        if locked.dir.writes_device() {
            self.platform
                .sync_for_device(locked.cfg.ula.base, locked.cfg.ula.size, locked.dir);
        }

        let result = self.range_check_disable(locked.slot);
        if result.is_err() {
            self.state.set_fault();
            error!("range check disable failed, state set to fault");
        }

        if st.permanent {
            st.retained_slot = Some(locked.slot);
        } else if let Some(ctx) = lock_mutex(&self.descriptors).as_mut() {
            ctx.table.free(locked.slot);
        }

        st.placement = Placement::Configured(locked.cfg);
        result
    }

    /// Unregister a buffer, forcing an unlock and a reset to linear
    /// first. Forced-unlock failures are logged, not fatal.
    pub fn free_buffer(&self, handle: BufferHandle) -> Result<()> {
        self.ensure_ready()?;
        let slot = self
            .registry
            .get(handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        let mut st = lock_mutex(&slot.state);
        let was_non_linear = !st.attrs.format.is_linear();

        if st.is_locked() {
            let dir = match &st.placement {
                Placement::Locked(locked) => locked.dir,
                _ => AccessDir::ReadWrite,
            };
            debug!("free before unlock, forcing unlock first");
            if let Err(e) = self.unlock_internal(&mut st, dir, true) {
                error!("forced unlock during free failed: {e}, continuing");
            }
        }

        // A slot surviving unlock is only legal for permanent buffers.
        if let Some(retained) = st.retained_slot.take() {
            if !st.permanent {
                self.state.set_fault();
                error!("descriptor retained without the permanent flag, state set to fault");
            }
            if let Some(ctx) = lock_mutex(&self.descriptors).as_mut() {
                ctx.table.free(retained);
            }
        }

        if st.attrs_set || st.ula_extent().is_some() {
            self.reset_to_linear(&mut st, handle);
        }
        drop(st);
        self.registry.remove(handle);

        if was_non_linear {
            if let Err(e) = self.hotplug.decrement(&self.state) {
                error!("hotplug decrement during free failed: {e}");
            }
        }
        Ok(())
    }

    /// Pin a buffer's descriptor across unlocks. Not offered on current
    /// hardware; always rejected.
    pub fn set_permanent_descriptor(&self, handle: BufferHandle, _enable: bool) -> Result<()> {
        self.ensure_ready()?;
        self.registry
            .get(handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        Err(DriverError::Unsupported)
    }

    /// Enable or disable one hardware error interrupt, powering the
    /// block around the register write.
    pub fn enable_fault_interrupt(&self, line: IrqLine, enable: bool) -> Result<()> {
        self.ensure_ready()?;
        self.hotplug.power(true)?;
        lock_mutex(&self.hw).irq_enable(line, enable);
        self.hotplug.power(false)
    }

    /// Subscribe to hardware error events; requires READY
    pub fn register_error_handler(&self, client_id: u32, handler: ErrorHandler) -> Result<()> {
        self.ensure_ready()?;
        self.notifier.register(client_id, handler);
        Ok(())
    }

    /// Remove a client's handlers; permitted only once the driver has
    /// left READY
    pub fn unregister_error_handler(&self, client_id: u32) -> Result<()> {
        if self.state.get() == DriverState::Ready {
            return Err(DriverError::InvalidState {
                reason: "handlers may be removed only after the driver leaves ready",
            });
        }
        self.notifier.unregister(client_id)
    }

    /// Service one error interrupt line: latch the fault address, clear
    /// the pending flag, resolve the owner and notify subscribers.
    pub fn handle_interrupt(&self, line: IrqLine) {
        let address = {
            let mut hw = lock_mutex(&self.hw);
            let latched = hw.fault_address(line) << 6;
            hw.irq_clear(line);
            latched
        };
        let handle = self.registry.find_by_ula(address);
        let event = match line {
            IrqLine::RangeRead => ErrorEvent::RangeTranslation {
                handle,
                address,
                access: AccessKind::Read,
            },
            IrqLine::RangeWrite => ErrorEvent::RangeTranslation {
                handle,
                address,
                access: AccessKind::Write,
            },
            IrqLine::Encode => ErrorEvent::Encode { handle, address },
            IrqLine::Decode => ErrorEvent::Decode { handle, address },
        };
        error!("hardware error: {event:?}");
        self.notifier.notify(&event);
    }

    /// Report a system translation fault against a driver mapping
    pub fn handle_translation_fault(&self, address: u64, flags: u32) {
        let handle = self.registry.find_by_device(address);
        let in_descriptor_arena = lock_mutex(&self.descriptors).as_ref().is_some_and(|ctx| {
            address >= ctx.device_base
                && address < ctx.device_base + DescriptorTable::arena_len() as u64
        });
        let context = if in_descriptor_arena {
            TranslationContext::Descriptor
        } else if handle.is_some() {
            TranslationContext::Buffer
        } else {
            TranslationContext::Unknown
        };
        let event = ErrorEvent::AddressTranslation {
            handle,
            context,
            address,
            flags,
        };
        error!("translation fault: {event:?}");
        self.notifier.notify(&event);
    }

    /// Quiesce the block: mask interrupts and drop to INVALID. The window
    /// cannot be reclaimed while extents are still handed out.
    pub fn shutdown(&self) -> Result<()> {
        let outstanding = lock_mutex(&self.ula).outstanding();
        if outstanding != 0 {
            warn!("{outstanding} window bytes still allocated, refusing shutdown");
            return Err(DriverError::Busy);
        }
        self.hotplug.power(true)?;
        {
            let mut hw = lock_mutex(&self.hw);
            for line in IrqLine::ALL {
                hw.irq_enable(line, false);
            }
        }
        self.hotplug.power(false)?;
        self.state.set(DriverState::Invalid);
        Ok(())
    }
}
