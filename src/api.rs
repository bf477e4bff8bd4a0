// Facade over one process-wide allocator instance, for callers that want
// malloc/free style entry points instead of carrying the handle around. The
// instance is created on first use; initialization failure here is fatal,
// callers that need to observe it use `Allocator::init` directly.

use crate::{Allocator, Ptr, Size};

lazy_static! {
    static ref INSTANCE: Allocator =
        Allocator::init().expect("shardheap: allocator initialization failed");
}

/// Allocates `size` bytes from the process-wide allocator.
pub fn shard_malloc(size: Size) -> Ptr {
    INSTANCE.allocate(size)
}

/// Releases a block previously returned by `shard_malloc`.
pub fn shard_free(ptr: Ptr) {
    INSTANCE.release(ptr)
}
