//! Per-buffer state
//!
//! A buffer's placement is a tagged state machine so that illegal
//! combinations (a descriptor without an extent, a lock count without a
//! slot) cannot be represented:
//!
//! `Linear` -> `Configured` on a successful non-linear attribution,
//! `Configured` -> `Locked` on the first lock, back on the last unlock,
//! and any non-locked state -> `Linear` on a linear re-attribution.

use serde::{Deserialize, Serialize};

use crate::descriptor::{DescriptorId, MetaRecord};
use crate::format::BufferAttrs;
use crate::geometry::CompressedLayout;
use crate::ula::UlaExtent;

/// CPU access direction of a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessDir {
    Read,
    Write,
    ReadWrite,
}

impl AccessDir {
    /// The CPU will read data produced by the device
    pub fn reads_device(self) -> bool {
        matches!(self, AccessDir::Read | AccessDir::ReadWrite)
    }

    /// The device will read data produced by the CPU
    pub fn writes_device(self) -> bool {
        matches!(self, AccessDir::Write | AccessDir::ReadWrite)
    }
}

/// Device-visible mapping of the client's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMapping {
    pub base: u64,
    pub len: u64,
}

/// Results of a successful non-linear attribution
#[derive(Debug, Clone)]
pub struct Configured {
    pub ula: UlaExtent,
    pub layout: CompressedLayout,
    pub record: MetaRecord,
    /// Chroma plane start inside the extent
    pub uv_start: u64,
}

/// A configured buffer holding a descriptor slot
#[derive(Debug, Clone)]
pub struct LockedState {
    pub cfg: Configured,
    pub slot: DescriptorId,
    pub dir: AccessDir,
    /// Outstanding lock calls, `>= 1`
    pub count: u32,
}

#[derive(Debug, Clone)]
pub enum Placement {
    Linear,
    Configured(Configured),
    Locked(LockedState),
}

/// Everything the driver tracks per registered buffer
pub struct BufferState {
    pub attrs: BufferAttrs,
    /// Attributes were set at least once; `get` fails before that
    pub attrs_set: bool,
    pub placement: Placement,
    /// Established on the first non-linear attribution, dropped when the
    /// buffer reverts to linear
    pub mapping: Option<DeviceMapping>,
    /// Keep the descriptor slot across unlocks
    pub permanent: bool,
    /// Slot retained by a permanent buffer between locks
    pub retained_slot: Option<DescriptorId>,
}

impl BufferState {
    pub fn new() -> Self {
        Self {
            attrs: BufferAttrs::linear(),
            attrs_set: false,
            placement: Placement::Linear,
            mapping: None,
            permanent: false,
            retained_slot: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.placement, Placement::Locked(_))
    }

    /// Extent currently backing the buffer, if any
    pub fn ula_extent(&self) -> Option<UlaExtent> {
        match &self.placement {
            Placement::Linear => None,
            Placement::Configured(cfg) => Some(cfg.ula),
            Placement::Locked(locked) => Some(locked.cfg.ula),
        }
    }
}

impl Default for BufferState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_dir_sync_roles() {
        assert!(AccessDir::Read.reads_device());
        assert!(!AccessDir::Read.writes_device());
        assert!(AccessDir::Write.writes_device());
        assert!(!AccessDir::Write.reads_device());
        assert!(AccessDir::ReadWrite.reads_device());
        assert!(AccessDir::ReadWrite.writes_device());
    }

    #[test]
    fn test_fresh_state_is_linear() {
        let state = BufferState::new();
        assert!(!state.attrs_set);
        assert!(!state.is_locked());
        assert!(state.ula_extent().is_none());
        assert!(state.attrs.format.is_linear());
    }
}
