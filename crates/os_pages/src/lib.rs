//! Page-granular memory regions for heap chunks.
//!
//! A [`PageRegion`] is an anonymous, private, read-write mapping whose
//! contents start out zeroed. The region is returned to the operating system
//! when the handle is dropped.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Rounds `len` up to a whole number of OS pages.
///
/// A zero length rounds up to one page.
#[must_use]
pub fn round_to_pages(len: usize) -> usize {
    let page = page_size();
    len.max(1).div_ceil(page) * page
}

/// An owned region of zeroed pages.
pub struct PageRegion {
    inner: os::RegionInner,
}

impl PageRegion {
    /// Maps `len` bytes of fresh zeroed memory, rounded up to the page size.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the mapping could not be established, and
    /// `InvalidInput` for a zero length.
    pub fn map_zeroed(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "region length must be greater than 0",
            ));
        }
        let len = round_to_pages(len);
        // SAFETY: an anonymous mapping without an address hint cannot alias
        // any existing allocation.
        let inner = unsafe { os::RegionInner::map(len)? };
        Ok(Self { inner })
    }

    /// Start of the region. Always page aligned.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Length of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Regions are never empty; provided for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Returns `true` if `addr` falls inside this region.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.as_ptr() as usize;
        addr >= start && addr < start + self.len()
    }
}

impl std::fmt::Debug for PageRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRegion")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0, "Page size should be power of 2");
    }

    #[test]
    fn test_round_to_pages() {
        let ps = page_size();
        assert_eq!(round_to_pages(0), ps);
        assert_eq!(round_to_pages(1), ps);
        assert_eq!(round_to_pages(ps), ps);
        assert_eq!(round_to_pages(ps + 1), 2 * ps);
    }

    #[test]
    fn test_region_is_zeroed_and_aligned() {
        let region = PageRegion::map_zeroed(3 * page_size() + 10).expect("failed to map");
        assert_eq!(region.len(), 4 * page_size());
        assert_eq!(region.as_ptr() as usize % page_size(), 0);

        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_region_is_writable() {
        let region = PageRegion::map_zeroed(page_size()).expect("failed to map");
        let ptr = region.as_ptr();
        unsafe {
            std::ptr::write_volatile(ptr.add(17), 42);
            assert_eq!(std::ptr::read_volatile(ptr.add(17)), 42);
        }
        assert!(region.contains(ptr as usize + 17));
        assert!(!region.contains(ptr as usize + region.len()));
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = PageRegion::map_zeroed(0).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
