use std::io::{self, Error};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the system page size, cached after the first query.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            // SAFETY: sysconf has no preconditions.
            let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let page_size = if raw <= 0 { 4096 } else { raw as usize };
            PAGE_SIZE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

pub struct RegionInner {
    ptr: *mut libc::c_void,
    len: usize,
}

impl RegionInner {
    /// Maps `len` bytes of anonymous memory. The kernel hands out zeroed pages.
    ///
    /// # Safety
    ///
    /// `len` must be a non-zero multiple of the page size.
    #[cfg(not(miri))]
    pub unsafe fn map(len: usize) -> io::Result<Self> {
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;
        let prot = libc::PROT_READ | libc::PROT_WRITE;

        let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };
        if ptr == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }
        Ok(Self { ptr, len })
    }

    /// Miri cannot model `mmap`; fall back to a zeroed, page-aligned allocation.
    #[cfg(miri)]
    pub unsafe fn map(len: usize) -> io::Result<Self> {
        use std::alloc::{alloc_zeroed, Layout};
        let layout = Layout::from_size_align(len, page_size())
            .map_err(|_| Error::from(io::ErrorKind::InvalidInput))?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Error::from(io::ErrorKind::OutOfMemory));
        }
        Ok(Self {
            ptr: ptr.cast(),
            len,
        })
    }

    pub fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for RegionInner {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        #[cfg(not(miri))]
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
        #[cfg(miri)]
        unsafe {
            use std::alloc::{dealloc, Layout};
            let layout = Layout::from_size_align_unchecked(self.len, page_size());
            dealloc(self.ptr.cast(), layout);
        }
    }
}

unsafe impl Send for RegionInner {}
unsafe impl Sync for RegionInner {}
