use crate::Ptr;
use core::ptr;
use errno::{errno, Errno};
use libc::*;

const MADV_NOHUGEPAGE: c_int = 14;

pub fn mmap_reserve(size: usize) -> Result<Ptr, Errno> {
    let ptr = unsafe {
        mmap(
            ptr::null_mut(),
            size as size_t,
            PROT_READ | PROT_WRITE,
            MAP_ANONYMOUS | MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == MAP_FAILED {
        return Err(errno());
    }
    no_huge_page(ptr, size);
    Ok(ptr)
}

pub fn munmap_memory(address: Ptr, size: usize) {
    unsafe {
        munmap(address, size as usize);
    }
}

#[cfg(target_os = "linux")]
#[inline]
fn no_huge_page(ptr: Ptr, size: usize) {
    unsafe {
        madvise(ptr, size, MADV_NOHUGEPAGE);
    }
}

#[cfg(not(target_os = "linux"))]
#[inline]
fn no_huge_page(_ptr: Ptr, _size: usize) {}
