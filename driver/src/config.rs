//! Driver configuration

use crate::error::{DriverError, Result};
use crate::geometry::SIZE_ALIGN;

/// Bytes of window synced per chunk while taking the window offline
pub const SYNC_GRANULE: u64 = 64 * 1024 * 1024;

/// Platform-provided inputs, validated once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Base of the reserved uncompressed-view window
    pub window_base: u64,
    /// Size of the window in bytes
    pub window_size: u64,
    /// Offline cache-sync chunk size. Tests shrink this to exercise the
    /// abort path without a 64 MiB window.
    pub sync_granule: u64,
}

impl DriverConfig {
    pub fn new(window_base: u64, window_size: u64) -> Self {
        Self {
            window_base,
            window_size,
            sync_granule: SYNC_GRANULE,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(DriverError::InvalidConfig {
                reason: "window size is zero",
            });
        }
        if self.window_base % SIZE_ALIGN != 0 || self.window_size % SIZE_ALIGN != 0 {
            return Err(DriverError::InvalidConfig {
                reason: "window not page aligned",
            });
        }
        if self.sync_granule == 0 || self.sync_granule % SIZE_ALIGN != 0 {
            return Err(DriverError::InvalidConfig {
                reason: "sync granule not page aligned",
            });
        }
        Ok(())
    }
}
