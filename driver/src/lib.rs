//! Buffer lifecycle and address-translation manager for the
//! bandwidth-compression block
//!
//! The block gives producers and consumers an uncompressed view of
//! compressed image buffers. This crate owns everything above the
//! registers: buffer registration and attributes, layout math, the
//! reserved-window extent allocator, the descriptor table, lock/unlock
//! cache bracketing, window hotplug and power, and error notification.
//!
//! # Architecture
//! [`BwcDriver`] is the context object threaded through every entry
//! point. It composes per-concern parts:
//! - [`format`] / [`geometry`]: attribute validation and layout math
//! - [`ula`]: extent allocator over the reserved window
//! - [`descriptor`]: the 256-slot record table
//! - [`registry`] / [`buffer`]: per-buffer state behind client handles
//! - [`hotplug`]: window online/offline and power refcounting
//! - [`fault`]: error events and subscriber delivery
//! - [`platform`]: the seam to cache maintenance, power rails and
//!   mappings; [`platform::MockPlatform`] backs the test suite together
//!   with `bwc_hw::mock::MockHardware`
//! - [`cmd`]: the byte-level request/response surface
//!
//! # Testing strategy
//! Every module carries colocated unit tests; `tests/` drives full
//! lifecycle scenarios against the mocks.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

pub mod buffer;
pub mod cmd;
pub mod config;
pub mod descriptor;
mod driver;
pub mod error;
pub mod fault;
pub mod format;
pub mod geometry;
mod hotplug;
pub mod platform;
pub mod registry;
pub mod ula;

pub use buffer::AccessDir;
pub use config::DriverConfig;
pub use driver::BwcDriver;
pub use error::{DriverError, Result};
pub use format::{BufferAttrs, ImageFormat};

/// Opaque client buffer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferHandle(pub u64);

/// Driver-wide state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Translation sub-contexts not yet attached
    Invalid,
    /// Fully operational
    Ready,
    /// Hardware consistency lost; terminal until reload
    Fault,
}

/// Shared driver-state cell. Fault is sticky.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: DriverState) -> Self {
        Self(AtomicU8::new(Self::encode(state)))
    }

    fn encode(state: DriverState) -> u8 {
        match state {
            DriverState::Invalid => 0,
            DriverState::Ready => 1,
            DriverState::Fault => 2,
        }
    }

    pub fn get(&self) -> DriverState {
        match self.0.load(Ordering::SeqCst) {
            0 => DriverState::Invalid,
            1 => DriverState::Ready,
            _ => DriverState::Fault,
        }
    }

    pub fn set_fault(&self) {
        self.0.store(Self::encode(DriverState::Fault), Ordering::SeqCst);
    }

    /// Apply a transition unless the cell is already faulted
    pub fn set(&self, state: DriverState) {
        let _ = self.0.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
            if cur == Self::encode(DriverState::Fault) {
                None
            } else {
                Some(Self::encode(state))
            }
        });
    }
}

/// Lock a mutex, continuing through poisoning. Driver state stays
/// consistent because every mutation either completes or latches FAULT.
pub(crate) fn lock_mutex<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_is_sticky() {
        let cell = StateCell::new(DriverState::Invalid);
        cell.set(DriverState::Ready);
        assert_eq!(cell.get(), DriverState::Ready);
        cell.set_fault();
        cell.set(DriverState::Ready);
        assert_eq!(cell.get(), DriverState::Fault);
        cell.set(DriverState::Invalid);
        assert_eq!(cell.get(), DriverState::Fault);
    }
}
