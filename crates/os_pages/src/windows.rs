use std::io::{self, Error};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

/// Returns the system page size, cached after the first query.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe {
                let mut info: SYSTEM_INFO = mem::zeroed();
                GetSystemInfo(&mut info);
                info.dwPageSize as usize
            };
            let size = if size == 0 { 4096 } else { size };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

pub struct RegionInner {
    ptr: *mut std::ffi::c_void,
    len: usize,
}

impl RegionInner {
    /// Reserves and commits `len` bytes. Committed pages are zero-filled.
    ///
    /// # Safety
    ///
    /// `len` must be a non-zero multiple of the page size.
    pub unsafe fn map(len: usize) -> io::Result<Self> {
        let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
        if ptr.is_null() {
            return Err(Error::last_os_error());
        }
        Ok(Self { ptr, len })
    }

    pub const fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for RegionInner {
    fn drop(&mut self) {
        if self.len > 0 {
            // MEM_RELEASE requires dwSize to be 0
            unsafe {
                VirtualFree(self.ptr, 0, MEM_RELEASE);
            }
        }
    }
}

unsafe impl Send for RegionInner {}
unsafe impl Sync for RegionInner {}
