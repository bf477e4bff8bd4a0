// The process-owned arena: one contiguous anonymous mapping reserved up
// front and handed out by a monotonic bump pointer. The arena never shrinks
// and never returns memory to the OS; exhaustion surfaces as a refused
// extension.

use crate::mmap::{mmap_reserve, munmap_memory};
use crate::utils::SYS_PAGE_SIZE;
use crate::Ptr;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering::Relaxed;
use crossbeam::utils::Backoff;
use errno::Errno;
use std::fmt;

pub const HEAP_VIRT_SIZE: usize = 128 * 1024 * 1024; // 128MB

#[derive(Debug)]
pub enum InitError {
    Mmap(Errno),
    ArenaExhausted,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InitError::Mmap(err) => write!(f, "arena reservation failed: {}", err),
            InitError::ArenaExhausted => write!(f, "arena too small for heap descriptors"),
        }
    }
}

impl std::error::Error for InitError {}

pub struct Arena {
    base: usize,
    tail: AtomicUsize,
    limit: usize,
}

impl Arena {
    pub fn init() -> Result<Self, InitError> {
        let base = mmap_reserve(HEAP_VIRT_SIZE).map_err(InitError::Mmap)? as usize;
        debug_assert_eq!(base % *SYS_PAGE_SIZE, 0);
        Ok(Self {
            base,
            tail: AtomicUsize::new(base),
            limit: base + HEAP_VIRT_SIZE,
        })
    }

    /// Grows the arena by `bytes` and returns the base of the newly reserved
    /// range, or `None` once capacity is exhausted.
    pub fn extend(&self, bytes: usize) -> Option<usize> {
        let backoff = Backoff::new();
        loop {
            let current_tail = self.tail.load(Relaxed);
            let new_tail = current_tail + bytes;
            if new_tail > self.limit {
                return None;
            }
            if self
                .tail
                .compare_exchange(current_tail, new_tail, Relaxed, Relaxed)
                .is_ok()
            {
                return Some(current_tail);
            }
            backoff.spin();
        }
    }

    pub fn dseg_lo(&self) -> usize {
        self.base
    }

    pub fn dseg_hi(&self) -> usize {
        self.tail.load(Relaxed)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        munmap_memory(self.base as Ptr, HEAP_VIRT_SIZE);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn grows_monotonically() {
        let arena = Arena::init().unwrap();
        let a = arena.extend(8192).unwrap();
        let b = arena.extend(8192).unwrap();
        assert_eq!(b, a + 8192);
        assert_eq!(arena.dseg_hi(), b + 8192);
        assert!(arena.dseg_lo() <= a);
    }

    #[test]
    pub fn refuses_past_capacity() {
        let arena = Arena::init().unwrap();
        assert!(arena.extend(HEAP_VIRT_SIZE).is_some());
        assert!(arena.extend(1).is_none());
        assert_eq!(arena.dseg_hi() - arena.dseg_lo(), HEAP_VIRT_SIZE);
    }

    #[test]
    pub fn extension_is_usable_memory() {
        let arena = Arena::init().unwrap();
        let addr = arena.extend(4096).unwrap() as *mut usize;
        unsafe {
            addr.write(0xbeef);
            assert_eq!(addr.read(), 0xbeef);
        }
    }
}
