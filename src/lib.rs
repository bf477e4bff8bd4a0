#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate libc;

use libc::c_void;

pub mod api;
mod arena;
mod heap;
mod large_heap;
mod mmap;
mod small_heap;
mod spin;
mod superblock;
mod utils;

pub use crate::arena::InitError;
pub use crate::heap::Allocator;

pub type Ptr = *mut c_void;
pub type Size = usize;
pub const NULL: usize = 0;
pub const NULL_PTR: *mut c_void = NULL as *mut c_void;
