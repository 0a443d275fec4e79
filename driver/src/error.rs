//! Driver error taxonomy

use thiserror::Error;

use crate::BufferHandle;

pub type Result<T> = core::result::Result<T, DriverError>;

/// Errors surfaced by driver entry points
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid buffer attributes: {reason}")]
    InvalidAttributes { reason: &'static str },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: &'static str },

    #[error("unknown buffer handle {0:?}")]
    UnknownHandle(BufferHandle),

    #[error("buffer {0:?} is already registered")]
    AlreadyRegistered(BufferHandle),

    #[error("buffer is locked")]
    Busy,

    #[error("operation not valid in this buffer state: {reason}")]
    InvalidState { reason: &'static str },

    #[error("no free descriptor slot")]
    NoFreeDescriptor,

    #[error("address window exhausted (requested {requested} bytes)")]
    UlaExhausted { requested: u64 },

    #[error("device mapping too small: have {have}, need {need}")]
    MappingTooSmall { have: u64, need: u64 },

    #[error("driver is not ready")]
    NotReady,

    #[error("driver has faulted; a reload is required")]
    Faulted,

    #[error("bring-up failed: {reason}")]
    BringUp { reason: &'static str },

    #[error("no error handler registered for client {0}")]
    UnknownHandler(u32),

    #[error("not supported")]
    Unsupported,

    #[error("platform call failed: {0}")]
    Platform(&'static str),

    #[error(transparent)]
    Hw(#[from] bwc_hw::HwError),
}
