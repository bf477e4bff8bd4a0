// Small allocation path: requests up to 2048 bytes are rounded to one of
// the nine size classes and served from partially-full superblocks of the
// routed heap. A miss falls back to the heap's own free pages, then to the
// shared pool, and only then grows the arena by one superblock.

use crate::heap::Allocator;
use crate::superblock::{
    block_class, flist_pop, flist_push, format_small, list_push, list_unlink, max_count, pageref,
    pageref_addr,
};
use crate::{Ptr, NULL_PTR};

impl Allocator {
    /// Hands out one block of the class covering `size` from heap `heap_id`.
    pub(crate) fn allocate_small(&self, size: usize, heap_id: usize) -> Ptr {
        let class = block_class(size);
        let h = self.heap(heap_id);

        // A partially-full superblock of the right class serves the request
        // without touching any other list.
        {
            let mut head = h.size_class[class].lock();
            if *head != 0 {
                let pr_addr = *head;
                let block = unsafe {
                    let pr = pageref(pr_addr);
                    let block = flist_pop(pr);
                    pr.count -= 1;
                    if pr.count == 0 {
                        // no free blocks left, the page moves to the
                        // complete list (size-class lock before complete
                        // lock, always in that order)
                        list_unlink(&mut *head, pr_addr);
                        let mut complete = h.complete.lock();
                        list_push(&mut *complete, pr_addr);
                    }
                    block
                };
                return block as Ptr;
            }
        }

        // No partial page. Reuse a free superblock, local pool before the
        // shared one, before growing the arena.
        let pr_addr = match self.take_free_page(heap_id) {
            Some(addr) => addr,
            None => match self.extend_pages(1) {
                Some(addr) => addr,
                None => return NULL_PTR,
            },
        };

        // Carve the page for `class`, take the head block and publish the
        // rest on the size-class list.
        let block = unsafe {
            format_small(pr_addr, class, heap_id as u32);
            let pr = pageref(pr_addr);
            let block = flist_pop(pr);
            pr.count -= 1;
            let mut head = h.size_class[class].lock();
            list_push(&mut *head, pr_addr);
            block
        };
        block as Ptr
    }

    /// Returns `ptr`'s block to its superblock and walks the page through
    /// the complete / size-class / free transitions.
    pub(crate) fn release_small(&self, ptr: Ptr) {
        let addr = ptr as usize;
        let pr_addr = pageref_addr(addr);
        let (heap_id, class) = unsafe {
            let pr = pageref(pr_addr);
            (pr.heap_id as usize, pr.block_type as usize)
        };
        let h = self.heap(heap_id);

        // The page sits on either the size-class list or the complete list;
        // both locks are taken, size class first, so the transition below
        // can unlink from whichever list holds it.
        let mut class_head = h.size_class[class].lock();
        let mut complete = h.complete.lock();

        unsafe {
            let pr = pageref(pr_addr);
            flist_push(pr, addr);
            pr.count += 1;

            if pr.count == max_count(class) {
                // every block is free again; the page cannot be on the
                // complete list since count was nonzero before this release
                drop(complete);
                list_unlink(&mut *class_head, pr_addr);
                drop(class_head);
                self.move_page_free(pr_addr, heap_id);
            } else if pr.count == 1 {
                // came off the complete list, it has a free block again
                list_unlink(&mut *complete, pr_addr);
                drop(complete);
                list_push(&mut *class_head, pr_addr);
            }
        }
    }
}
