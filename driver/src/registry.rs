//! Registered-buffer table
//!
//! Maps client handles to shared per-buffer state. The table lock covers
//! only map operations; per-buffer work happens under the buffer's own
//! lock after the table lock is dropped, so no blocking call ever runs
//! with the table held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::buffer::BufferState;
use crate::error::{DriverError, Result};
use crate::lock_mutex;
use crate::BufferHandle;

/// One registered buffer
pub struct BufferSlot {
    pub handle: BufferHandle,
    pub state: Mutex<BufferState>,
}

/// Handle-to-state table
pub struct BufferRegistry {
    table: Mutex<HashMap<BufferHandle, Arc<BufferSlot>>>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, handle: BufferHandle) -> Result<()> {
        let mut table = lock_mutex(&self.table);
        if table.contains_key(&handle) {
            return Err(DriverError::AlreadyRegistered(handle));
        }
        table.insert(
            handle,
            Arc::new(BufferSlot {
                handle,
                state: Mutex::new(BufferState::new()),
            }),
        );
        Ok(())
    }

    pub fn get(&self, handle: BufferHandle) -> Option<Arc<BufferSlot>> {
        lock_mutex(&self.table).get(&handle).cloned()
    }

    pub fn remove(&self, handle: BufferHandle) -> Option<Arc<BufferSlot>> {
        lock_mutex(&self.table).remove(&handle)
    }

    pub fn len(&self) -> usize {
        lock_mutex(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<BufferSlot>> {
        lock_mutex(&self.table).values().cloned().collect()
    }

    /// Find the buffer whose extent contains an uncompressed-view address
    pub fn find_by_ula(&self, addr: u64) -> Option<BufferHandle> {
        // Buffer locks are taken after the snapshot drops the table lock.
        for slot in self.snapshot() {
            let state = lock_mutex(&slot.state);
            if let Some(extent) = state.ula_extent() {
                if extent.contains(addr) {
                    return Some(slot.handle);
                }
            }
        }
        None
    }

    /// Find the buffer whose device mapping contains an address
    pub fn find_by_device(&self, addr: u64) -> Option<BufferHandle> {
        for slot in self.snapshot() {
            let state = lock_mutex(&slot.state);
            if let Some(mapping) = state.mapping {
                if addr >= mapping.base && addr < mapping.base + mapping.len {
                    return Some(slot.handle);
                }
            }
        }
        None
    }
}

impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}
