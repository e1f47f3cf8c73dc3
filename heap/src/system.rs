use std::ptr::NonNull;

#[cfg(unix)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;

    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_ANON: i32 = 0x1000;

    pub const MAP_FAILED: isize = -1;

    /// posix mmap and munmap
    /// # Safety
    /// see valid mmap and munmap usage online
    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// Zero-filled, private read/write mapping.
    /// # Safety
    /// null must be checked
    #[inline]
    pub unsafe fn anonymous_mmap(len: usize) -> *mut u8 {
        // SAFETY: no fixed address is requested, the kernel picks the range
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// # Safety
    /// `ptr`/`len` must describe a live mapping from [`anonymous_mmap`]
    #[inline]
    pub unsafe fn anonymous_munmap(ptr: *mut u8, len: usize) {
        // SAFETY: guaranteed by the caller
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

pub const OS_PAGE_SIZE: usize = 4096;

/// An anonymous memory reservation, unmapped on drop.
///
/// The memory starts zeroed, which the heap relies on: a zero word is an
/// unpublished block header.
#[derive(Debug)]
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain memory owned by this value; all shared access
// to its contents goes through atomics or `&mut` borrows of the owner.
unsafe impl Send for Mapping {}
// SAFETY: see above
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Maps `len` bytes, `None` when the kernel refuses.
    #[must_use]
    pub fn new(len: usize) -> Option<Self> {
        debug_assert!(len.is_multiple_of(OS_PAGE_SIZE));
        // SAFETY: the result is null-checked below
        let ptr = unsafe { unix::anonymous_mmap(len) };
        NonNull::new(ptr).map(|ptr| Self { ptr, len })
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr and len come from a successful mmap
        unsafe { unix::anonymous_munmap(self.ptr.as_ptr(), self.len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_page_aligned_and_zeroed() {
        let mapping = Mapping::new(4 * OS_PAGE_SIZE).unwrap();
        assert_eq!(mapping.start() % OS_PAGE_SIZE, 0);
        assert_eq!(mapping.len(), 4 * OS_PAGE_SIZE);
        // SAFETY: the range is mapped read/write for the mapping's lifetime
        let bytes = unsafe {
            std::slice::from_raw_parts(mapping.start() as *const u8, mapping.len())
        };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
