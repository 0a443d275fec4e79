//! Full lifecycle scenarios against the mock hardware and platform

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bwc_driver::fault::{ErrorEvent, TranslationContext};
use bwc_driver::platform::{MockPlatform, PlatformOps};
use bwc_driver::{
    AccessDir, BufferAttrs, BufferHandle, BwcDriver, DriverConfig, DriverError, DriverState,
    ImageFormat,
};
use bwc_hw::mock::MockHardware;
use bwc_hw::{Hardware, IrqLine};

/// Hardware mock behind a shared handle so a test can keep poking the
/// registers after the driver takes ownership.
#[derive(Clone)]
struct SharedHw(Arc<Mutex<MockHardware>>);

impl SharedHw {
    fn new(major: u32, minor: u32) -> Self {
        Self(Arc::new(Mutex::new(MockHardware::new(major, minor))))
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockHardware) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

impl Hardware for SharedHw {
    fn version(&mut self) -> (u32, u32) {
        self.with(|hw| hw.version())
    }
    fn one_time_init(&mut self) {
        self.with(|hw| hw.one_time_init());
    }
    fn set_descriptor_base(&mut self, base: u64, record_bytes: u32) {
        self.with(|hw| hw.set_descriptor_base(base, record_bytes));
    }
    fn program_range(&mut self, slot: usize, base: u64, size: u64) {
        self.with(|hw| hw.program_range(slot, base, size));
    }
    fn enable_range_check(&mut self, slot: usize) {
        self.with(|hw| hw.enable_range_check(slot));
    }
    fn disable_range_check(&mut self, slot: usize) -> bwc_hw::Result<()> {
        self.with(|hw| hw.disable_range_check(slot))
    }
    fn flush(&mut self) -> bwc_hw::Result<()> {
        self.with(|hw| hw.flush())
    }
    fn irq_enable(&mut self, line: IrqLine, enable: bool) {
        self.with(|hw| hw.irq_enable(line, enable));
    }
    fn irq_clear(&mut self, line: IrqLine) {
        self.with(|hw| hw.irq_clear(line));
    }
    fn fault_address(&mut self, line: IrqLine) -> u64 {
        self.with(|hw| hw.fault_address(line))
    }
}

const WINDOW_BASE: u64 = 0x9_0000_0000;

fn build(window_size: u64) -> (Arc<BwcDriver>, SharedHw, Arc<MockPlatform>) {
    build_with_granule(window_size, 64 * 1024 * 1024)
}

fn build_with_granule(
    window_size: u64,
    sync_granule: u64,
) -> (Arc<BwcDriver>, SharedHw, Arc<MockPlatform>) {
    let hw = SharedHw::new(2, 0);
    let platform = Arc::new(MockPlatform::new());
    let mut config = DriverConfig::new(WINDOW_BASE, window_size);
    config.sync_granule = sync_granule;
    let driver = BwcDriver::new(
        config,
        Box::new(hw.clone()),
        Arc::clone(&platform) as Arc<dyn PlatformOps>,
    )
    .unwrap();
    driver.attach_descriptor_context().unwrap();
    driver.attach_buffer_context().unwrap();
    (Arc::new(driver), hw, platform)
}

/// NV12 64x64: uncompressed view is 8192 luma + 4096 chroma = 12288
/// bytes, one window granule over the 4096 page.
fn nv12_attrs() -> BufferAttrs {
    BufferAttrs {
        format: ImageFormat::Nv12,
        width: 64,
        height: 64,
        stride: 128,
        scanlines: 64,
        ..BufferAttrs::linear()
    }
}

const NV12_ULA_SIZE: u64 = 12288;

#[test]
fn test_linear_buffer_lifecycle() {
    let (driver, _hw, platform) = build(1 << 20);
    let h = BufferHandle(1);

    driver.init_buffer(h).unwrap();
    assert!(matches!(
        driver.get_buffer_attrs(h),
        Err(DriverError::InvalidState { .. })
    ));

    driver.set_buffer_attrs(h, &BufferAttrs::linear()).unwrap();
    let attrs = driver.get_buffer_attrs(h).unwrap();
    assert!(attrs.format.is_linear());

    // A linear buffer never touches the window or the power rails.
    assert!(!driver.window_online());
    assert!(!platform.regulator_on());

    driver.free_buffer(h).unwrap();
    assert_eq!(driver.registered_buffers(), 0);
    assert!(matches!(
        driver.get_buffer_attrs(h),
        Err(DriverError::UnknownHandle(_))
    ));
}

#[test]
fn test_compressed_attribution_lock_and_unlock() {
    let (driver, hw, platform) = build(1 << 20);
    let h = BufferHandle(2);
    driver.init_buffer(h).unwrap();

    driver.set_buffer_attrs(h, &nv12_attrs()).unwrap();
    assert!(driver.window_online());
    assert_eq!(driver.non_linear_buffers(), 1);
    // The client's mmap now points into the window.
    let (linear, base, size) = platform.mmap_config(h).unwrap();
    assert!(!linear);
    assert_eq!(base, WINDOW_BASE);
    assert_eq!(size, NV12_ULA_SIZE);

    let flushes_before = hw.with(|hw| hw.flush_count);
    driver.lock(h, AccessDir::Write).unwrap();
    assert_eq!(driver.descriptor_slots_in_use(), 1);
    hw.with(|hw| {
        assert_eq!(hw.enabled_slots(), 1);
        assert_eq!(hw.range(0), (WINDOW_BASE, NV12_ULA_SIZE));
        assert!(hw.flush_count > flushes_before);
    });
    // A pure write lock needs no invalidate.
    assert_eq!(platform.synced_for_cpu(), 0);

    driver.unlock(h, AccessDir::Write).unwrap();
    assert_eq!(driver.descriptor_slots_in_use(), 0);
    hw.with(|hw| assert_eq!(hw.enabled_slots(), 0));
    // The write-back covered the whole extent.
    assert_eq!(platform.synced_for_device(), NV12_ULA_SIZE);

    driver.free_buffer(h).unwrap();
    assert!(!driver.window_online());
    assert!(!platform.regulator_on());
}

#[test]
fn test_nested_locks_merge_directions() {
    let (driver, _hw, platform) = build(1 << 20);
    let h = BufferHandle(3);
    driver.init_buffer(h).unwrap();
    driver.set_buffer_attrs(h, &nv12_attrs()).unwrap();

    driver.lock(h, AccessDir::Read).unwrap();
    // The read lock invalidated the extent for the CPU.
    assert_eq!(platform.synced_for_cpu(), NV12_ULA_SIZE);
    // Widening to write on a read-locked buffer is fine.
    driver.lock(h, AccessDir::Write).unwrap();
    assert_eq!(driver.descriptor_slots_in_use(), 1);

    driver.unlock(h, AccessDir::Write).unwrap();
    // Still locked; no write-back yet.
    assert_eq!(platform.synced_for_device(), 0);
    driver.unlock(h, AccessDir::Read).unwrap();
    // The merged direction is read-write, so the last unlock flushed.
    assert_eq!(platform.synced_for_device(), NV12_ULA_SIZE);
    assert_eq!(driver.descriptor_slots_in_use(), 0);

    driver.free_buffer(h).unwrap();
}

#[test]
fn test_write_locked_buffer_rejects_read() {
    let (driver, _hw, _platform) = build(1 << 20);
    let h = BufferHandle(4);
    driver.init_buffer(h).unwrap();
    driver.set_buffer_attrs(h, &nv12_attrs()).unwrap();

    driver.lock(h, AccessDir::Write).unwrap();
    // The invalidate a read needs would drop the CPU's pending writes.
    assert!(matches!(
        driver.lock(h, AccessDir::Read),
        Err(DriverError::InvalidState { .. })
    ));
    // The rejection left the lock intact.
    assert_eq!(driver.descriptor_slots_in_use(), 1);

    driver.unlock(h, AccessDir::Write).unwrap();
    driver.free_buffer(h).unwrap();
}

#[test]
fn test_free_while_locked_forces_unlock() {
    let (driver, hw, platform) = build(1 << 20);
    let h = BufferHandle(5);
    driver.init_buffer(h).unwrap();
    driver.set_buffer_attrs(h, &nv12_attrs()).unwrap();
    driver.lock(h, AccessDir::Write).unwrap();

    driver.free_buffer(h).unwrap();
    assert_eq!(driver.registered_buffers(), 0);
    assert_eq!(driver.descriptor_slots_in_use(), 0);
    hw.with(|hw| assert_eq!(hw.enabled_slots(), 0));
    // The forced unlock still wrote back, and the last buffer took the
    // window down.
    assert_eq!(platform.synced_for_device(), NV12_ULA_SIZE);
    assert!(!driver.window_online());
    assert_eq!(driver.state(), DriverState::Ready);
}

#[test]
fn test_window_exhaustion_leaves_other_buffers_intact() {
    // Room for exactly one NV12 64x64 view.
    let (driver, _hw, _platform) = build(NV12_ULA_SIZE);
    let h1 = BufferHandle(6);
    let h2 = BufferHandle(7);
    driver.init_buffer(h1).unwrap();
    driver.init_buffer(h2).unwrap();

    driver.set_buffer_attrs(h1, &nv12_attrs()).unwrap();
    assert!(matches!(
        driver.set_buffer_attrs(h2, &nv12_attrs()),
        Err(DriverError::UlaExhausted {
            requested: NV12_ULA_SIZE
        })
    ));

    // The first buffer is untouched and the second still works linear.
    driver.lock(h1, AccessDir::Read).unwrap();
    driver.unlock(h1, AccessDir::Read).unwrap();
    driver.set_buffer_attrs(h2, &BufferAttrs::linear()).unwrap();
    assert_eq!(driver.state(), DriverState::Ready);

    driver.free_buffer(h1).unwrap();
    driver.free_buffer(h2).unwrap();
}

#[test]
fn test_window_state_tracks_buffer_population() {
    let (driver, _hw, platform) = build(1 << 20);
    let h1 = BufferHandle(8);
    let h2 = BufferHandle(9);
    driver.init_buffer(h1).unwrap();
    driver.init_buffer(h2).unwrap();

    driver.set_buffer_attrs(h1, &nv12_attrs()).unwrap();
    driver.set_buffer_attrs(h2, &nv12_attrs()).unwrap();
    assert_eq!(driver.non_linear_buffers(), 2);
    assert!(driver.window_online());
    assert!(platform.regulator_on());

    driver.free_buffer(h1).unwrap();
    assert!(driver.window_online());

    // Re-attributing the survivor to linear is the other offline path.
    driver.set_buffer_attrs(h2, &BufferAttrs::linear()).unwrap();
    assert_eq!(driver.non_linear_buffers(), 0);
    assert!(!driver.window_online());
    assert!(!platform.regulator_on());
    driver.free_buffer(h2).unwrap();
}

#[test]
fn test_flush_timeout_faults_the_driver() {
    let (driver, hw, _platform) = build(1 << 20);
    let h = BufferHandle(10);
    driver.init_buffer(h).unwrap();
    driver.set_buffer_attrs(h, &nv12_attrs()).unwrap();

    hw.with(|hw| hw.fail_flush = true);
    assert!(matches!(
        driver.lock(h, AccessDir::Write),
        Err(DriverError::Hw(bwc_hw::HwError::FlushTimeout))
    ));
    assert_eq!(driver.state(), DriverState::Fault);
    // The failed lock released its slot.
    assert_eq!(driver.descriptor_slots_in_use(), 0);

    // Everything after a fault is refused, even after the flush path
    // recovers.
    hw.with(|hw| hw.fail_flush = false);
    assert!(matches!(
        driver.lock(h, AccessDir::Write),
        Err(DriverError::Faulted)
    ));
    assert!(matches!(
        driver.init_buffer(BufferHandle(11)),
        Err(DriverError::Faulted)
    ));
}

#[test]
fn test_descriptor_slots_exhaust_at_256() {
    // 256 NV12 views of 12288 bytes each.
    let (driver, _hw, _platform) = build(256 * NV12_ULA_SIZE + NV12_ULA_SIZE);
    let attrs = nv12_attrs();
    for i in 0..257u64 {
        let h = BufferHandle(i);
        driver.init_buffer(h).unwrap();
        driver.set_buffer_attrs(h, &attrs).unwrap();
    }
    for i in 0..256u64 {
        driver.lock(BufferHandle(i), AccessDir::Write).unwrap();
    }
    assert_eq!(driver.descriptor_slots_in_use(), 256);
    assert!(matches!(
        driver.lock(BufferHandle(256), AccessDir::Write),
        Err(DriverError::NoFreeDescriptor)
    ));

    // Releasing one lock frees a slot for the straggler.
    driver.unlock(BufferHandle(0), AccessDir::Write).unwrap();
    driver.lock(BufferHandle(256), AccessDir::Write).unwrap();
    assert_eq!(driver.descriptor_slots_in_use(), 256);
}

#[test]
fn test_interrupt_resolves_owning_buffer() {
    let (driver, hw, _platform) = build(1 << 20);
    let h = BufferHandle(12);
    driver.init_buffer(h).unwrap();
    driver.set_buffer_attrs(h, &nv12_attrs()).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    driver
        .register_error_handler(1, Box::new(move |e| sink.lock().unwrap().push(*e)))
        .unwrap();

    // Fault halfway into the buffer's extent; the latch is in
    // cache-line units.
    let fault_addr = WINDOW_BASE + 4096;
    hw.with(|hw| hw.raise(IrqLine::Encode, fault_addr >> 6));
    driver.handle_interrupt(IrqLine::Encode);
    hw.with(|hw| assert!(!hw.is_pending(IrqLine::Encode)));

    // An address outside every extent resolves to no owner.
    hw.with(|hw| hw.raise(IrqLine::RangeWrite, (WINDOW_BASE + (1 << 19)) >> 6));
    driver.handle_interrupt(IrqLine::RangeWrite);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        ErrorEvent::Encode {
            handle: Some(h),
            address: fault_addr,
        }
    );
    assert!(matches!(
        events[1],
        ErrorEvent::RangeTranslation { handle: None, .. }
    ));
}

#[test]
fn test_translation_fault_classifies_context() {
    let (driver, _hw, _platform) = build(1 << 20);
    let h = BufferHandle(13);
    driver.init_buffer(h).unwrap();
    driver.set_buffer_attrs(h, &nv12_attrs()).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    driver
        .register_error_handler(1, Box::new(move |e| sink.lock().unwrap().push(*e)))
        .unwrap();

    // Mock platform constants: buffers map from 0x4000_0000, the
    // descriptor arena at 0x8000_0000.
    driver.handle_translation_fault(0x4000_0100, 0x1);
    driver.handle_translation_fault(0x8000_0040, 0x1);
    driver.handle_translation_fault(0x1234, 0x1);

    let events = events.lock().unwrap();
    assert_eq!(
        events[0],
        ErrorEvent::AddressTranslation {
            handle: Some(h),
            context: TranslationContext::Buffer,
            address: 0x4000_0100,
            flags: 0x1,
        }
    );
    assert!(matches!(
        events[1],
        ErrorEvent::AddressTranslation {
            context: TranslationContext::Descriptor,
            ..
        }
    ));
    assert!(matches!(
        events[2],
        ErrorEvent::AddressTranslation {
            handle: None,
            context: TranslationContext::Unknown,
            ..
        }
    ));
}

#[test]
fn test_offline_sync_aborts_for_new_buffer() {
    // Eight 4096-byte sync chunks cover the window.
    let (driver, _hw, platform) = build_with_granule(32768, 4096);
    let h1 = BufferHandle(14);
    let h2 = BufferHandle(15);
    driver.init_buffer(h1).unwrap();
    driver.init_buffer(h2).unwrap();
    driver.set_buffer_attrs(h1, &nv12_attrs()).unwrap();

    // After the first offline chunk, attribute the second buffer from
    // another thread. Its population bump must abort the sync.
    let worker: Arc<Mutex<Option<thread::JoinHandle<()>>>> = Arc::new(Mutex::new(None));
    let spawned = Arc::new(AtomicBool::new(false));
    {
        let driver = Arc::clone(&driver);
        let worker = Arc::clone(&worker);
        let spawned = Arc::clone(&spawned);
        platform.set_sync_hook(Box::new(move |_| {
            if spawned.swap(true, Ordering::SeqCst) {
                return;
            }
            let driver = Arc::clone(&driver);
            *worker.lock().unwrap() = Some(thread::spawn(move || {
                driver
                    .set_buffer_attrs(BufferHandle(15), &nv12_attrs())
                    .unwrap();
            }));
            // Give the worker time to bump the population count before
            // the next chunk's check.
            thread::sleep(Duration::from_millis(200));
        }));
    }

    driver.free_buffer(h1).unwrap();
    worker.lock().unwrap().take().unwrap().join().unwrap();

    // The sync stopped after one chunk and the window never went down.
    assert!(driver.window_online());
    assert!(platform.window_mapped());
    assert!(!platform.window_uncached());
    assert_eq!(platform.synced_for_cpu(), 4096);
    assert_eq!(driver.non_linear_buffers(), 1);
    assert_eq!(driver.state(), DriverState::Ready);

    // The survivor's release then takes the window down for real.
    driver.free_buffer(h2).unwrap();
    assert!(!driver.window_online());
    assert_eq!(platform.synced_for_cpu(), 4096 + 32768);
}

#[test]
fn test_relock_after_unlock_reprograms_a_slot() {
    let (driver, hw, _platform) = build(1 << 20);
    let h = BufferHandle(16);
    driver.init_buffer(h).unwrap();
    driver.set_buffer_attrs(h, &nv12_attrs()).unwrap();

    driver.lock(h, AccessDir::Write).unwrap();
    driver.unlock(h, AccessDir::Write).unwrap();
    let flushes = hw.with(|hw| hw.flush_count);

    driver.lock(h, AccessDir::Write).unwrap();
    // Fresh slot, fresh enable, fresh flush.
    assert_eq!(driver.descriptor_slots_in_use(), 1);
    assert!(hw.with(|hw| hw.flush_count) > flushes);
    driver.unlock(h, AccessDir::Write).unwrap();
    driver.free_buffer(h).unwrap();
}

#[test]
fn test_reattribution_resizes_the_extent() {
    let (driver, _hw, platform) = build(1 << 20);
    let h = BufferHandle(17);
    driver.init_buffer(h).unwrap();
    driver.set_buffer_attrs(h, &nv12_attrs()).unwrap();
    assert_eq!(platform.mmap_config(h).unwrap().2, NV12_ULA_SIZE);

    // Re-attribute to a larger image while unlocked.
    let bigger = BufferAttrs {
        width: 128,
        height: 128,
        scanlines: 128,
        ..nv12_attrs()
    };
    driver.set_buffer_attrs(h, &bigger).unwrap();
    let (_, _, size) = platform.mmap_config(h).unwrap();
    assert!(size > NV12_ULA_SIZE);
    assert_eq!(driver.non_linear_buffers(), 1);

    // But not while locked.
    driver.lock(h, AccessDir::Write).unwrap();
    assert!(matches!(
        driver.set_buffer_attrs(h, &nv12_attrs()),
        Err(DriverError::Busy)
    ));
    driver.unlock(h, AccessDir::Write).unwrap();
    driver.free_buffer(h).unwrap();
}
