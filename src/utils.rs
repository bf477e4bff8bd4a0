use libc::{sysconf, _SC_PAGESIZE};

lazy_static! {
    pub static ref SYS_PAGE_SIZE: usize = unsafe { sysconf(_SC_PAGESIZE) as usize };
}

pub fn align_padding(len: usize, align: usize) -> usize {
    let len_rounded_up = len.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1);
    len_rounded_up.wrapping_sub(len)
}

/// CPU the calling thread is running on right now. Queried on every
/// allocation rather than cached; the OS may migrate threads between calls.
#[cfg(target_os = "linux")]
pub fn current_cpu() -> usize {
    unsafe { libc::sched_getcpu() as usize }
}

#[cfg(not(target_os = "linux"))]
pub fn current_cpu() -> usize {
    0
}

#[cfg(all(test, target_os = "linux"))]
pub fn pin_current_thread(cpu: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
    }
}

#[cfg(all(test, not(target_os = "linux")))]
pub fn pin_current_thread(_cpu: usize) {}
