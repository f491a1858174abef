//! Intrusive, doubly linked free list.
//!
//! Free regions cost no extra bookkeeping space: the link pointers live in the region's own
//! payload bytes, starting right after its [`Head`]. A region must therefore be at least
//! [`MIN_ALLOCATION`] bytes before it can ever be free.

use core::mem::size_of;
use core::ptr;

use super::region::{payload_ptr, Head};

/// Link stored in the payload of a free region. Never present in a used region.
#[repr(C)]
pub(crate) struct FreeLink {
    prev: *mut Head,
    next: *mut Head,
}

/// Smallest payload a region can have and still be linkable into the free list.
pub(crate) const MIN_ALLOCATION: usize = size_of::<FreeLink>();

unsafe fn link_of(head: *mut Head) -> *mut FreeLink {
    payload_ptr(head) as *mut FreeLink
}

/// A LIFO-ordered doubly linked list of free regions, threaded through their own payload bytes.
pub(crate) struct FreeList {
    first: *mut Head,
    last: *mut Head,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self {
            first: ptr::null_mut(),
            last: ptr::null_mut(),
        }
    }

    /// Links `head` in at the front of the list. `head` must already be marked free and have a
    /// payload of at least [`MIN_ALLOCATION`] bytes.
    ///
    /// # Safety
    ///
    /// `head` must point to a valid, initialised, free region not already linked into this list.
    pub(crate) unsafe fn insert(&mut self, head: *mut Head) {
        debug_assert!((*head).is_free);
        debug_assert!((*head).payload_size >= MIN_ALLOCATION);

        let link = link_of(head);
        (*link).prev = ptr::null_mut();
        (*link).next = self.first;

        if !self.first.is_null() {
            (*link_of(self.first)).prev = head;
        }
        self.first = head;
        if self.last.is_null() {
            self.last = head;
        }
    }

    /// Unlinks `head` from the list. `head` must currently be linked into this list.
    ///
    /// # Safety
    ///
    /// `head` must point to a region currently linked into this exact list.
    pub(crate) unsafe fn remove(&mut self, head: *mut Head) {
        let link = link_of(head);
        let prev = (*link).prev;
        let next = (*link).next;

        if prev.is_null() {
            debug_assert_eq!(self.first, head);
            self.first = next;
        } else {
            (*link_of(prev)).next = next;
        }

        if next.is_null() {
            debug_assert_eq!(self.last, head);
            self.last = prev;
        } else {
            (*link_of(next)).prev = prev;
        }
    }

    /// Returns the smallest free region whose payload is at least `size` bytes (true best fit),
    /// or the exact match immediately if one is found first.
    ///
    /// # Safety
    ///
    /// Every region currently linked into this list must be valid and marked free.
    pub(crate) unsafe fn find_at_least_best_fit(&self, size: usize) -> Option<*mut Head> {
        let mut current = self.first;
        let mut best: Option<*mut Head> = None;

        while !current.is_null() {
            let region_size = (*current).payload_size;
            if region_size == size {
                return Some(current);
            }
            if region_size > size {
                let is_better = match best {
                    None => true,
                    Some(candidate) => region_size < (*candidate).payload_size,
                };
                if is_better {
                    best = Some(current);
                }
            }
            current = (*link_of(current)).next;
        }

        best
    }

    /// Returns the free-list successor of `head`, for diagnostics only.
    ///
    /// # Safety
    ///
    /// `head` must point to a region currently linked into this list.
    pub(crate) unsafe fn next_in_list(head: *mut Head) -> Option<*mut Head> {
        let next = (*link_of(head)).next;
        if next.is_null() {
            None
        } else {
            Some(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::region::{init_region, NODE_MARGIN};

    #[test]
    fn insert_then_find_returns_the_region() {
        let mut buf = [0u8; 256];
        unsafe {
            let head = init_region(buf.as_mut_ptr(), 64, true);
            let mut list = FreeList::new();
            list.insert(head);
            assert_eq!(list.find_at_least_best_fit(32), Some(head));
            assert_eq!(list.find_at_least_best_fit(128), None);
        }
    }

    #[test]
    fn best_fit_prefers_the_smallest_qualifying_region() {
        let mut buf = [0u8; 512];
        unsafe {
            let small = init_region(buf.as_mut_ptr(), 64, true);
            let large = init_region(buf.as_mut_ptr().add(64 + NODE_MARGIN), 128, true);
            let mut list = FreeList::new();
            list.insert(large);
            list.insert(small);
            assert_eq!(list.find_at_least_best_fit(40), Some(small));
        }
    }

    #[test]
    fn remove_unlinks_from_either_end() {
        let mut buf = [0u8; 512];
        unsafe {
            let a = init_region(buf.as_mut_ptr(), 32, true);
            let b = init_region(buf.as_mut_ptr().add(32 + NODE_MARGIN), 32, true);
            let mut list = FreeList::new();
            list.insert(a);
            list.insert(b);
            list.remove(b);
            assert_eq!(list.first, a);
            assert_eq!(list.last, a);
            list.remove(a);
            assert!(list.first.is_null());
            assert!(list.last.is_null());
        }
    }
}
