//! The allocator's boundary with the operating system. This is the only place where
//! platform-dependent memory requests are made.
//!
//! The arena needs one mapping for its whole lifetime, so all we ask of the kernel is to
//! hand out an anonymous read-write region, take it back, and tell us its page size.

use std::{io, ptr::NonNull};

pub(crate) use os::page_size;

/// Requests a zeroed read-write region of `len` bytes. Returns `None` if the underlying
/// syscall fails.
#[inline]
pub(crate) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
    if injected_failure() {
        return None;
    }

    unsafe { os::request_memory(len) }
}

/// Returns the region of `len` bytes starting at `addr` to the kernel.
#[inline]
pub(crate) unsafe fn return_memory(addr: *mut u8, len: usize) -> io::Result<()> {
    unsafe { os::return_memory(addr, len) }
}

#[cfg(test)]
thread_local! {
    static FAIL_NEXT_REQUEST: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Makes the next [`request_memory`] on this thread fail.
#[cfg(test)]
pub(crate) fn fail_next_request() {
    FAIL_NEXT_REQUEST.set(true);
}

#[cfg(test)]
fn injected_failure() -> bool {
    FAIL_NEXT_REQUEST.replace(false)
}

#[cfg(not(test))]
#[inline(always)]
fn injected_failure() -> bool {
    false
}

#[cfg(unix)]
mod os {
    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        io,
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    pub unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // mmap parameters.
        const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
        // Read-Write only memory.
        const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
        const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        const FD: c_int = -1;
        const OFFSET: off_t = 0;

        unsafe {
            match mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                libc::MAP_FAILED => None,
                addr => NonNull::new(addr.cast::<u8>()),
            }
        }
    }

    pub unsafe fn return_memory(addr: *mut u8, len: usize) -> io::Result<()> {
        match unsafe { munmap(addr.cast::<c_void>(), len as size_t) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// Virtual memory page size of the computer in bytes. This is usually 4096.
    pub fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
    }
}

#[cfg(windows)]
mod os {
    use std::{io, mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    pub unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // Read-Write only.
        let protection = Memory::PAGE_READWRITE;

        let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

        unsafe {
            let addr = Memory::VirtualAlloc(None, len, flags, protection);

            NonNull::new(addr.cast())
        }
    }

    pub unsafe fn return_memory(addr: *mut u8, _len: usize) -> io::Result<()> {
        unsafe { Memory::VirtualFree(addr.cast::<c_void>(), 0, Memory::MEM_RELEASE) }
            .map_err(|_| io::Error::last_os_error())
    }

    /// Virtual memory page size of the computer in bytes. This is usually 4096.
    pub fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}
