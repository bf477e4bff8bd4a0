// Large allocation path: requests above the largest size class get a run of
// contiguous superblocks straight from the arena. The leading header
// describes the whole run; on release the run is chopped back into
// standalone free superblocks so small allocations can reuse them.

use crate::heap::Allocator;
use crate::superblock::{
    first_block, large_page_count, list_push, list_unlink, pageref, pageref_addr, BLOCK_FREE,
    BLOCK_LARGE, SUPERBLOCK_SIZE,
};
use crate::{Ptr, NULL_PTR};

impl Allocator {
    pub(crate) fn allocate_large(&self, size: usize, heap_id: usize) -> Ptr {
        let npages = large_page_count(size);
        debug!("large allocation of {} over {} superblocks", size, npages);
        let pr_addr = match self.extend_pages(npages) {
            Some(addr) => addr,
            None => return NULL_PTR,
        };
        unsafe {
            let pr = pageref(pr_addr);
            pr.flist = 0;
            pr.block_type = BLOCK_LARGE;
            pr.count = npages as u32;
            pr.heap_id = heap_id as u32;
            let mut large = self.heap(heap_id).large.lock();
            list_push(&mut *large, pr_addr);
        }
        first_block(pr_addr) as Ptr
    }

    pub(crate) fn release_large(&self, ptr: Ptr) {
        let pr_addr = pageref_addr(ptr as usize);
        let (heap_id, npages) = unsafe {
            let pr = pageref(pr_addr);
            (pr.heap_id as usize, pr.count as usize)
        };
        let h = self.heap(heap_id);
        {
            let mut large = h.large.lock();
            unsafe { list_unlink(&mut *large, pr_addr) };
        }
        unsafe {
            // chop the run into standalone free superblocks, chained so the
            // whole batch splices onto the free list in one push
            for i in 0..npages {
                let page = pr_addr + i * SUPERBLOCK_SIZE;
                let pr = pageref(page);
                pr.block_type = BLOCK_FREE;
                pr.prev = 0;
                pr.flist = 0;
                pr.heap_id = heap_id as u32;
                pr.next = if i + 1 < npages {
                    page + SUPERBLOCK_SIZE
                } else {
                    0
                };
            }
            let tail = pr_addr + (npages - 1) * SUPERBLOCK_SIZE;
            let mut free = h.free.lock();
            pageref(tail).next = free.head;
            free.head = pr_addr;
            free.n_free += npages;
        }
        self.move_page_global(heap_id);
    }
}
