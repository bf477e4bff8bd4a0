// Per-CPU heaps, the shared global heap, and the allocator handle that
// routes between them. A process gets P + 1 heap descriptors: heap 0 is the
// shared pool of free superblocks, heaps 1..=P preferentially serve threads
// running on the matching CPU. The descriptors live at the front of the
// arena itself.

use crate::arena::{Arena, InitError};
use crate::spin::SpinLock;
use crate::superblock::{
    free_list_pop, free_list_push, pageref, pageref_addr, BLOCK_FREE, BLOCK_LARGE,
    LARGEST_BLOCK_SIZE, NSIZES, SUPERBLOCK_SIZE,
};
use crate::utils::{align_padding, current_cpu};
use crate::{Ptr, Size, NULL_PTR};
use core::mem;
use core::ptr;
use crossbeam::utils::CachePadded;

pub const GLOBAL_HEAP_ID: usize = 0;
pub const FREE_PAGE_THRESHOLD: usize = 2;

/// Free superblock pool of one heap. The head and its length share one lock
/// so the donation threshold check and the pop stay consistent.
pub struct FreePages {
    pub head: usize,
    pub n_free: usize,
}

impl FreePages {
    pub fn push(&mut self, pr_addr: usize) {
        unsafe { free_list_push(&mut self.head, pr_addr) };
        self.n_free += 1;
    }

    pub fn pop(&mut self) -> Option<usize> {
        let pr_addr = unsafe { free_list_pop(&mut self.head) }?;
        self.n_free -= 1;
        Some(pr_addr)
    }
}

/// One heap: four independent lists, each under its own spin lock. List
/// heads are superblock base addresses, zero for an empty list.
pub struct Heap {
    pub free: SpinLock<FreePages>,
    pub complete: SpinLock<usize>,
    pub large: SpinLock<usize>,
    pub size_class: [SpinLock<usize>; NSIZES],
}

impl Heap {
    fn new() -> Self {
        const EMPTY: SpinLock<usize> = SpinLock::new(0);
        Self {
            free: SpinLock::new(FreePages { head: 0, n_free: 0 }),
            complete: SpinLock::new(0),
            large: SpinLock::new(0),
            size_class: [EMPTY; NSIZES],
        }
    }
}

/// The allocator handle. Owns the arena and the heap descriptors; all three
/// public operations go through it.
pub struct Allocator {
    arena: Arena,
    heaps: usize,
    nheaps: usize,
    ncpus: usize,
    arena_lock: SpinLock<()>,
}

impl Allocator {
    /// Reserves the arena, advances it onto the superblock grid and lays out
    /// one heap descriptor per CPU plus the shared heap 0.
    pub fn init() -> Result<Self, InitError> {
        let arena = Arena::init()?;
        // Align the first superblock so header masking works for every
        // address handed out later; all further extensions are whole
        // superblocks and stay on the grid.
        let pad = align_padding(arena.dseg_lo(), SUPERBLOCK_SIZE);
        if pad > 0 {
            arena.extend(pad).ok_or(InitError::ArenaExhausted)?;
        }
        let ncpus = num_cpus::get();
        let nheaps = ncpus + 1;
        let slot = mem::size_of::<CachePadded<Heap>>();
        let npages = (nheaps * slot + SUPERBLOCK_SIZE - 1) / SUPERBLOCK_SIZE;
        let heaps = arena
            .extend(npages * SUPERBLOCK_SIZE)
            .ok_or(InitError::ArenaExhausted)?;
        for i in 0..nheaps {
            let descriptor = (heaps + i * slot) as *mut CachePadded<Heap>;
            unsafe { ptr::write(descriptor, CachePadded::new(Heap::new())) };
        }
        debug!("{} heaps laid out at {:x}", nheaps, heaps);
        Ok(Self {
            arena,
            heaps,
            nheaps,
            ncpus,
            arena_lock: SpinLock::new(()),
        })
    }

    /// Returns a region of at least `size` bytes, 8-byte aligned, or null
    /// once the arena is exhausted.
    pub fn allocate(&self, size: Size) -> Ptr {
        if size == 0 {
            return NULL_PTR;
        }
        let heap_id = self.route_heap();
        if size > LARGEST_BLOCK_SIZE {
            self.allocate_large(size, heap_id)
        } else {
            self.allocate_small(size, heap_id)
        }
    }

    /// Releases a region previously returned by `allocate`. Null is a no-op
    /// and a second release of the same block is silently ignored.
    pub fn release(&self, ptr: Ptr) {
        if ptr == NULL_PTR {
            return;
        }
        let pr_addr = pageref_addr(ptr as usize);
        let block_type = unsafe { pageref(pr_addr).block_type };
        if block_type == BLOCK_FREE {
            // the superblock already went back to a free list
            return;
        }
        if block_type == BLOCK_LARGE {
            self.release_large(ptr);
        } else {
            self.release_small(ptr);
        }
    }

    pub(crate) fn heap(&self, id: usize) -> &Heap {
        debug_assert!(id < self.nheaps);
        let descriptor = (self.heaps + id * mem::size_of::<CachePadded<Heap>>())
            as *const CachePadded<Heap>;
        unsafe { &*descriptor }
    }

    /// Heap preferred for a fresh allocation from the calling thread.
    pub(crate) fn route_heap(&self) -> usize {
        (current_cpu() % self.ncpus) + 1
    }

    pub(crate) fn ncpus(&self) -> usize {
        self.ncpus
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Grows the arena by whole superblocks. The arena lock is a leaf: no
    /// list lock is held while it is taken and nothing is taken under it.
    pub(crate) fn extend_pages(&self, npages: usize) -> Option<usize> {
        let _guard = self.arena_lock.lock();
        match self.arena.extend(npages * SUPERBLOCK_SIZE) {
            Some(addr) => {
                debug_assert_eq!(addr % SUPERBLOCK_SIZE, 0);
                Some(addr)
            }
            None => {
                warn!("arena exhausted extending by {} superblocks", npages);
                None
            }
        }
    }

    /// Parks a fully freed superblock on `heap_id`'s free list, then lets
    /// that heap donate its excess to the shared pool.
    pub(crate) fn move_page_free(&self, pr_addr: usize, heap_id: usize) {
        unsafe { pageref(pr_addr).block_type = BLOCK_FREE };
        {
            let mut free = self.heap(heap_id).free.lock();
            free.push(pr_addr);
        }
        self.move_page_global(heap_id);
    }

    /// Donates one free superblock to heap 0 once `heap_id`'s pool exceeds
    /// FREE_PAGE_THRESHOLD. With a single processor all threads already
    /// share heap 1 and nothing is donated. The donor lock is released
    /// before the recipient lock is taken; the two are never held together.
    pub(crate) fn move_page_global(&self, heap_id: usize) {
        if self.ncpus <= 1 {
            return;
        }
        debug_assert_ne!(heap_id, GLOBAL_HEAP_ID);
        let pr_addr = {
            let mut free = self.heap(heap_id).free.lock();
            if free.n_free <= FREE_PAGE_THRESHOLD {
                return;
            }
            free.pop().unwrap()
        };
        unsafe { pageref(pr_addr).heap_id = GLOBAL_HEAP_ID as u32 };
        let mut global = self.heap(GLOBAL_HEAP_ID).free.lock();
        global.push(pr_addr);
    }

    /// Takes a reusable free superblock for `heap_id`: its own pool first,
    /// the shared pool second.
    pub(crate) fn take_free_page(&self, heap_id: usize) -> Option<usize> {
        let local = { self.heap(heap_id).free.lock().pop() };
        local.or_else(|| self.heap(GLOBAL_HEAP_ID).free.lock().pop())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::pin_current_thread;
    use rand::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    pub fn init_lays_out_heaps() {
        let _ = env_logger::try_init();
        let alloc = Allocator::init().unwrap();
        assert!(alloc.ncpus() >= 1);
        for id in 0..=alloc.ncpus() {
            let h = alloc.heap(id);
            assert_eq!(h.free.lock().n_free, 0);
            assert_eq!(*h.complete.lock(), 0);
            assert_eq!(*h.large.lock(), 0);
            for c in 0..NSIZES {
                assert_eq!(*h.size_class[c].lock(), 0);
            }
        }
        // every extension after init lands on the superblock grid
        let page = alloc.extend_pages(1).unwrap();
        assert_eq!(page % SUPERBLOCK_SIZE, 0);
    }

    #[test]
    pub fn routed_heap_is_never_global() {
        let alloc = Allocator::init().unwrap();
        for _ in 0..64 {
            let hid = alloc.route_heap();
            assert!(hid >= 1 && hid <= alloc.ncpus());
        }
    }

    #[test]
    pub fn null_and_zero_are_noops() {
        let alloc = Allocator::init().unwrap();
        alloc.release(NULL_PTR);
        assert_eq!(alloc.allocate(0), NULL_PTR);
    }

    #[test]
    pub fn parallel_heaps_stay_disjoint() {
        let _ = env_logger::try_init();
        let alloc = Arc::new(Allocator::init().unwrap());
        let cpus = num_cpus::get();
        let mut threads = Vec::new();
        for t in 0..2usize {
            let alloc = alloc.clone();
            threads.push(thread::spawn(move || {
                pin_current_thread(t % cpus);
                let mut blocks = Vec::with_capacity(10_000);
                for i in 0..10_000usize {
                    let ptr = alloc.allocate(64);
                    assert_ne!(ptr, NULL_PTR);
                    unsafe { *(ptr as *mut usize) = t * 1_000_000 + i };
                    blocks.push(ptr);
                }
                for (i, ptr) in blocks.iter().enumerate() {
                    assert_eq!(unsafe { *(*ptr as *const usize) }, t * 1_000_000 + i);
                }
                for ptr in blocks.into_iter().rev() {
                    alloc.release(ptr);
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
    }

    #[test]
    pub fn randomized_mixed_sizes() {
        let alloc = Allocator::init().unwrap();
        let mut rng = rand::thread_rng();
        let mut live: Vec<(usize, usize, u8)> = Vec::new();
        for round in 0..2_000usize {
            if live.len() > 64 || (!live.is_empty() && rng.gen_bool(0.4)) {
                let idx = rng.gen_range(0..live.len());
                let (addr, size, fill) = live.swap_remove(idx);
                for off in 0..size {
                    assert_eq!(unsafe { *((addr + off) as *const u8) }, fill);
                }
                alloc.release(addr as crate::Ptr);
            } else {
                let size = rng.gen_range(1..=4096usize);
                let ptr = alloc.allocate(size);
                assert_ne!(ptr, NULL_PTR);
                let fill = (round & 0xff) as u8;
                unsafe { libc::memset(ptr, fill as i32, size) };
                live.push((ptr as usize, size, fill));
            }
        }
        for (addr, _, _) in live {
            alloc.release(addr as crate::Ptr);
        }
    }
}
