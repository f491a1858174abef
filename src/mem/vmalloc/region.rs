//! Boundary-tag region layout.
//!
//! Every committed byte in the allocator's arena belongs to exactly one region:
//! `Head { payload_size, is_free } | payload bytes | Tail { payload_size }`. Walking
//! head → tail → previous head requires byte-granular pointer arithmetic; this module is the
//! single place that does it, so the unsafe surface stays auditable.

use core::mem::size_of;

/// Header placed at the start of every region, used or free.
#[repr(C)]
pub(crate) struct Head {
    pub(crate) payload_size: usize,
    pub(crate) is_free: bool,
}

/// Footer placed at the end of every region's payload, mirroring `Head::payload_size` so a
/// region's predecessor can be found by walking backwards from its tail.
#[repr(C)]
pub(crate) struct Tail {
    pub(crate) payload_size: usize,
}

pub(crate) const HEAD_SIZE: usize = size_of::<Head>();
pub(crate) const TAIL_SIZE: usize = size_of::<Tail>();

/// Combined size of a region's head and tail; the bookkeeping overhead of every allocation.
pub(crate) const NODE_MARGIN: usize = HEAD_SIZE + TAIL_SIZE;

/// Returns the payload pointer for a region, i.e. the pointer handed back to callers of
/// `allocate` (or, for a free region, the start of the intrusive free-list link).
///
/// # Safety
///
/// `head` must point to a valid, initialised region.
pub(crate) unsafe fn payload_ptr(head: *mut Head) -> *mut u8 {
    (head as *mut u8).add(HEAD_SIZE)
}

/// Recovers a region's head from a payload pointer previously returned by [`payload_ptr`].
///
/// # Safety
///
/// `ptr` must have been produced by a prior call to [`payload_ptr`] on a region still owned by
/// this allocator.
pub(crate) unsafe fn head_from_payload(ptr: *mut u8) -> *mut Head {
    ptr.sub(HEAD_SIZE) as *mut Head
}

/// Returns the tail belonging to `head`, computed from its current `payload_size`.
///
/// # Safety
///
/// `head` must point to a valid, initialised region.
pub(crate) unsafe fn tail_of(head: *mut Head) -> *mut Tail {
    (head as *mut u8)
        .add(HEAD_SIZE)
        .add((*head).payload_size) as *mut Tail
}

/// Returns the head of the region immediately following `head` in address order, or `None` if
/// `head` is the last region committed (its end is at or past `end`, the current end of the
/// committed range).
///
/// # Safety
///
/// `head` must point to a valid, initialised region inside `[base, end)`.
pub(crate) unsafe fn next_head(head: *mut Head, end: *mut u8) -> Option<*mut Head> {
    let next = (head as *mut u8)
        .add(HEAD_SIZE)
        .add((*head).payload_size)
        .add(TAIL_SIZE);
    if next >= end {
        None
    } else {
        Some(next as *mut Head)
    }
}

/// Returns the head of the region immediately preceding `head` in address order, or `None` if
/// `head` is the first region in the arena (its preceding tail would fall before `base`).
///
/// # Safety
///
/// `head` must point to a valid, initialised region inside `[base, end)`.
pub(crate) unsafe fn prev_head(head: *mut Head, base: *mut u8) -> Option<*mut Head> {
    let prev_tail_addr = (head as *mut u8).sub(TAIL_SIZE);
    if prev_tail_addr < base {
        return None;
    }
    let prev_tail = prev_tail_addr as *mut Tail;
    let prev_head_addr = prev_tail_addr.sub(HEAD_SIZE).sub((*prev_tail).payload_size);
    debug_assert!(prev_head_addr >= base);
    Some(prev_head_addr as *mut Head)
}

/// Writes a fresh head/tail pair at `start`, with the given payload size and free flag. Does
/// *not* touch the free list; callers insert or remove the region themselves.
///
/// # Safety
///
/// `[start, start + NODE_MARGIN + payload_size)` must be valid, owned, writable memory.
pub(crate) unsafe fn init_region(start: *mut u8, payload_size: usize, is_free: bool) -> *mut Head {
    let head = start as *mut Head;
    (*head).payload_size = payload_size;
    (*head).is_free = is_free;
    let tail = tail_of(head);
    (*tail).payload_size = payload_size;
    head
}
