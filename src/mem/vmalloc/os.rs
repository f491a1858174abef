//! Thin wrapper over the POSIX virtual-memory calls the allocator needs: reserve an address
//! range without backing it by physical pages, then commit pages into that range on demand.

use std::io;
use std::ptr;

#[cfg(target_os = "linux")]
const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
#[cfg(not(target_os = "linux"))]
const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

/// Returns the platform's page size, the granularity at which `commit` operates.
pub(crate) fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Reserves `size` bytes of virtual address space with no access permissions and no physical
/// backing. The returned pointer is valid for `munmap`/`mmap(MAP_FIXED)` calls of up to `size`
/// bytes, but must not be read or written until committed.
///
/// # Safety
///
/// The caller owns the returned mapping and is responsible for eventually releasing it with
/// [`release`].
pub(crate) unsafe fn reserve(size: usize) -> io::Result<*mut u8> {
    let addr = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_NONE,
        RESERVE_FLAGS,
        -1,
        0,
    );
    if addr == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(addr as *mut u8)
    }
}

/// Commits `size` bytes at `addr`, which must fall inside a range previously returned by
/// [`reserve`], making them readable and writable.
///
/// # Safety
///
/// `addr` must point into a live reservation obtained from [`reserve`], with at least `size`
/// bytes remaining between `addr` and the end of that reservation.
pub(crate) unsafe fn commit(addr: *mut u8, size: usize) -> io::Result<()> {
    let mapped = libc::mmap(
        addr as *mut libc::c_void,
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_FIXED | libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if mapped == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Releases a reservation previously obtained from [`reserve`], including any pages committed
/// inside it.
///
/// # Safety
///
/// `addr` and `size` must exactly match a prior call to [`reserve`], and no pointer derived from
/// that reservation may be used afterwards.
pub(crate) unsafe fn release(addr: *mut u8, size: usize) {
    libc::munmap(addr as *mut libc::c_void, size);
}
