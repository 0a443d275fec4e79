//! Extent allocator for the reserved uncompressed-view window
//!
//! First-fit over a sorted, coalesced free list. Sizes round up to the
//! 4096-byte granule. The pool tracks live extents so a free of an address
//! it never handed out is a logged no-op instead of corruption.

use log::{debug, error};

use crate::geometry::{align, SIZE_ALIGN};

/// One allocated range inside the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlaExtent {
    pub base: u64,
    pub size: u64,
}

impl UlaExtent {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }
}

/// First-fit extent allocator over one fixed window
pub struct UlaPool {
    base: u64,
    size: u64,
    /// Free extents sorted by base, no two adjacent
    free: Vec<(u64, u64)>,
    /// Live extents, exact (base, size) pairs
    allocated: Vec<(u64, u64)>,
}

impl UlaPool {
    pub fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            free: vec![(base, size)],
            allocated: Vec::new(),
        }
    }

    pub fn window_base(&self) -> u64 {
        self.base
    }

    pub fn window_size(&self) -> u64 {
        self.size
    }

    /// Bytes currently handed out
    pub fn outstanding(&self) -> u64 {
        self.allocated.iter().map(|(_, s)| s).sum()
    }

    /// Reserve `size` bytes, rounded up to the granule
    pub fn alloc(&mut self, size: u64) -> Option<UlaExtent> {
        if size == 0 {
            return None;
        }
        let size = align(size, SIZE_ALIGN);
        let idx = self.free.iter().position(|(_, s)| *s >= size)?;
        let (fbase, fsize) = self.free[idx];
        if fsize == size {
            self.free.remove(idx);
        } else {
            self.free[idx] = (fbase + size, fsize - size);
        }
        self.allocated.push((fbase, size));
        debug!("ula alloc {size:#x} -> {fbase:#x}");
        Some(UlaExtent { base: fbase, size })
    }

    /// Return an extent to the pool.
    ///
    /// An extent the pool did not hand out is logged and ignored.
    pub fn free(&mut self, extent: UlaExtent) {
        let Some(idx) = self
            .allocated
            .iter()
            .position(|(b, s)| *b == extent.base && *s == extent.size)
        else {
            error!(
                "free of untracked extent {:#x}+{:#x}, ignoring",
                extent.base, extent.size
            );
            return;
        };
        self.allocated.remove(idx);

        let at = self
            .free
            .iter()
            .position(|(b, _)| *b > extent.base)
            .unwrap_or(self.free.len());
        self.free.insert(at, (extent.base, extent.size));

        // Coalesce with the right then the left neighbor.
        if at + 1 < self.free.len() && self.free[at].0 + self.free[at].1 == self.free[at + 1].0 {
            self.free[at].1 += self.free[at + 1].1;
            self.free.remove(at + 1);
        }
        if at > 0 && self.free[at - 1].0 + self.free[at - 1].1 == self.free[at].0 {
            self.free[at - 1].1 += self.free[at].1;
            self.free.remove(at);
        }
        debug!("ula free {:#x}+{:#x}", extent.base, extent.size);
    }

    /// Resize an extent. Same rounded size keeps the extent; otherwise the
    /// old extent is freed first, so the replacement may land elsewhere.
    pub fn realloc(&mut self, current: Option<UlaExtent>, new_size: u64) -> Option<UlaExtent> {
        let new_size_aligned = align(new_size, SIZE_ALIGN);
        if let Some(cur) = current {
            if cur.size == new_size_aligned {
                return Some(cur);
            }
            self.free(cur);
        }
        self.alloc(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_rounds_to_granule() {
        let mut pool = UlaPool::new(0x10000, 0x10000);
        let e = pool.alloc(100).unwrap();
        assert_eq!(e.size, 4096);
        assert_eq!(pool.outstanding(), 4096);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let mut pool = UlaPool::new(0, 8192);
        let a = pool.alloc(4096).unwrap();
        let b = pool.alloc(4096).unwrap();
        assert!(pool.alloc(4096).is_none());
        pool.free(a);
        let c = pool.alloc(4096).unwrap();
        assert_eq!(c.base, a.base);
        pool.free(b);
        pool.free(c);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_coalescing_restores_large_extents() {
        let mut pool = UlaPool::new(0, 3 * 4096);
        let a = pool.alloc(4096).unwrap();
        let b = pool.alloc(4096).unwrap();
        let c = pool.alloc(4096).unwrap();
        // Free out of order; the window must come back whole.
        pool.free(a);
        pool.free(c);
        pool.free(b);
        let big = pool.alloc(3 * 4096).unwrap();
        assert_eq!(big.base, 0);
    }

    #[test]
    fn test_untracked_free_is_ignored() {
        let mut pool = UlaPool::new(0, 8192);
        let a = pool.alloc(4096).unwrap();
        pool.free(UlaExtent {
            base: 0x9999000,
            size: 4096,
        });
        // Double free of a live extent's base with the wrong size too.
        pool.free(UlaExtent {
            base: a.base,
            size: 8192,
        });
        assert_eq!(pool.outstanding(), 4096);
    }

    #[test]
    fn test_realloc_same_size_keeps_extent() {
        let mut pool = UlaPool::new(0, 0x10000);
        let a = pool.alloc(8192).unwrap();
        // 8000 rounds to the same 8192.
        let b = pool.realloc(Some(a), 8000).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.outstanding(), 8192);
    }

    #[test]
    fn test_realloc_resize_frees_old() {
        let mut pool = UlaPool::new(0, 0x10000);
        let a = pool.alloc(4096).unwrap();
        let b = pool.realloc(Some(a), 12288).unwrap();
        assert_eq!(b.size, 12288);
        assert_eq!(pool.outstanding(), 12288);
    }

    #[test]
    fn test_realloc_failure_leaves_old_freed() {
        let mut pool = UlaPool::new(0, 8192);
        let a = pool.alloc(8192).unwrap();
        assert!(pool.realloc(Some(a), 16384).is_none());
        // The old extent was released before the failed grow.
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.alloc(8192).is_some());
    }
}
