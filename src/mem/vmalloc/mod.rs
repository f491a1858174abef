//! Coalescing free-list allocator over lazily committed virtual memory.
//!
//! [`FreeListAllocator`] reserves a virtual address range up front but only commits operating
//! system pages into it as allocations demand them, up to a caller-chosen ceiling. Every region,
//! used or free, carries a [`Head`]/[`Tail`] boundary-tag pair so neighbours can be found and
//! merged without any side index; free regions are additionally threaded through an intrusive
//! doubly linked list for fast placement search.
//!
//! Placement is true best fit: the smallest free region that still satisfies the request is
//! chosen, an exact match short-circuits the search. When no free region qualifies, the
//! allocator commits more pages, extending the final region in place if it happens to be free.

mod list;
mod os;
mod region;

use std::fmt;
use std::io;

use list::{FreeList, MIN_ALLOCATION};
use region::{head_from_payload, init_region, next_head, payload_ptr, prev_head, tail_of, Head};
use region::{HEAD_SIZE, NODE_MARGIN, TAIL_SIZE};

/// Failure modes for the one fallible operation in this module: asking the operating system for
/// address space.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// Reserving the initial virtual address range failed.
    #[error("failed to reserve {size} bytes of virtual address space: {source}")]
    Reserve {
        size: usize,
        #[source]
        source: io::Error,
    },
    /// Committing pages into an already-reserved range failed.
    #[error("failed to commit {size} bytes at {addr:#x}: {source}")]
    Commit {
        addr: usize,
        size: usize,
        #[source]
        source: io::Error,
    },
}

/// Least common alignment of `Head`, `Tail` and the free list's `FreeLink`: all three are built
/// exclusively from `usize`/pointer fields, so their alignment is that of a machine word.
const MIN_ALIGN: usize = core::mem::align_of::<usize>();

const fn round_up_to(num: usize, to: usize) -> usize {
    debug_assert!(to.is_power_of_two());
    (num + to - 1) & !(to - 1)
}

/// A coalescing allocator over a reserved, lazily committed virtual address range.
///
/// Not reentrant: callers must serialise `allocate`/`free`/`dump_nodes` calls externally. The
/// allocator owns an OS-level mapping and is [`Send`] but not [`Sync`] (see the crate's
/// concurrency notes).
pub struct FreeListAllocator {
    memory: *mut u8,
    max_size: usize,
    page_size: usize,
    committed: usize,
    free_list: FreeList,
}

// SAFETY: the allocator's state is a self-contained OS mapping plus pointers derived from it;
// nothing aliases it from another thread while it is being moved, so transferring ownership
// across a thread boundary is sound. It is not `Sync`: concurrent `&self` access would race on
// the free list without external synchronisation.
unsafe impl Send for FreeListAllocator {}

impl FreeListAllocator {
    /// Reserves `max_size` bytes of virtual address space without committing any of it.
    /// `max_size` is the hard ceiling this allocator will ever grow to; nothing is mapped until
    /// the first `allocate` call.
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is zero.
    pub fn create(max_size: usize) -> Result<Self, MapError> {
        assert!(max_size > 0, "max_size must be non-zero");

        let page_size = os::page_size();
        let memory =
            unsafe { os::reserve(max_size) }.map_err(|source| MapError::Reserve {
                size: max_size,
                source,
            })?;

        log::debug!("vmalloc: reserved {max_size} bytes at {:p}", memory);

        Ok(Self {
            memory,
            max_size,
            page_size,
            committed: 0,
            free_list: FreeList::new(),
        })
    }

    fn committed_end(&self) -> *mut u8 {
        unsafe { self.memory.add(self.committed) }
    }

    fn first_head(&self) -> Option<*mut Head> {
        if self.committed == 0 {
            None
        } else {
            Some(self.memory as *mut Head)
        }
    }

    /// Finds the last region in address order in O(1) by reading the boundary tag at the end of
    /// the committed range, without walking the free list.
    fn last_head(&self) -> Option<*mut Head> {
        if self.committed == 0 {
            return None;
        }
        unsafe {
            let tail_addr = self.committed_end().sub(TAIL_SIZE);
            let tail = tail_addr as *mut region::Tail;
            let head_addr = tail_addr.sub(HEAD_SIZE).sub((*tail).payload_size);
            Some(head_addr as *mut Head)
        }
    }

    /// Reserves and allocates a region of at least `size` bytes, rounding up to the allocator's
    /// minimum alignment and minimum region size. Returns `None` if satisfying the request would
    /// exceed `max_size`.
    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        if size == 0 {
            return None;
        }
        let size = round_up_to(size, MIN_ALIGN).max(MIN_ALLOCATION);

        let head = match unsafe { self.free_list.find_at_least_best_fit(size) } {
            Some(head) => head,
            None => self.request_more_memory(size)?,
        };

        unsafe {
            debug_assert!((*head).payload_size >= size);
            self.free_list.remove(head);

            let available = (*head).payload_size;
            let can_split = available >= size + NODE_MARGIN + MIN_ALLOCATION;

            let ptr = if can_split {
                init_region(head as *mut u8, size, false);
                let remainder_head = next_head(head, self.committed_end())
                    .expect("a split region always leaves a trailing region");
                let remainder_size = available - size - NODE_MARGIN;
                let remainder = init_region(remainder_head as *mut u8, remainder_size, true);
                self.free_list.insert(remainder);
                payload_ptr(head)
            } else {
                (*head).is_free = false;
                payload_ptr(head)
            };

            log::trace!("vmalloc: allocated {size} byte(s) at {:p}", ptr);
            Some(ptr)
        }
    }

    /// Commits enough additional pages to satisfy an allocation of `size` bytes that the free
    /// list could not serve, extending the last committed region in place if it is free.
    /// Returns `None` if doing so would exceed `max_size`.
    fn request_more_memory(&mut self, size: usize) -> Option<*mut Head> {
        let last = self.last_head();
        let last_is_free = last.map_or(false, |h| unsafe { (*h).is_free });

        let needed = if last_is_free {
            let last = last.unwrap();
            size - unsafe { (*last).payload_size }
        } else {
            size + NODE_MARGIN
        };

        let mut to_commit = round_up_to(needed, self.page_size);
        let slack = to_commit - needed;
        let min_new_node = NODE_MARGIN + MIN_ALLOCATION;
        if slack != 0 && slack < min_new_node {
            to_commit += self.page_size;
        }

        if self.committed + to_commit > self.max_size {
            log::warn!(
                "vmalloc: refusing to grow past max_size ({} + {to_commit} > {})",
                self.committed,
                self.max_size
            );
            return None;
        }

        let commit_addr = self.committed_end();
        if let Err(source) = unsafe { os::commit(commit_addr, to_commit) } {
            let err = MapError::Commit {
                addr: commit_addr as usize,
                size: to_commit,
                source,
            };
            log::warn!("vmalloc: {err}");
            return None;
        }
        self.committed += to_commit;

        log::debug!("vmalloc: committed {to_commit} byte(s), total now {}", self.committed);

        unsafe {
            if let Some(last) = last.filter(|_| last_is_free) {
                let new_size = (*last).payload_size + to_commit;
                (*last).payload_size = new_size;
                (*tail_of(last)).payload_size = new_size;
                Some(last)
            } else {
                let head = init_region(commit_addr, to_commit - NODE_MARGIN, true);
                self.free_list.insert(head);
                Some(head)
            }
        }
    }

    /// Returns a region previously handed out by [`Self::allocate`], merging it with either
    /// neighbour that is also free.
    pub fn free(&mut self, ptr: *mut u8) {
        unsafe {
            let head = head_from_payload(ptr);
            debug_assert!(!(*head).is_free, "double free");
            debug_assert_eq!(
                (*head).payload_size,
                (*tail_of(head)).payload_size,
                "corrupted boundary tags"
            );

            let mut start = head;
            let mut size = (*head).payload_size;

            if let Some(prev) = prev_head(head, self.memory) {
                if (*prev).is_free {
                    self.free_list.remove(prev);
                    size += (*prev).payload_size + NODE_MARGIN;
                    start = prev;
                }
            }

            if let Some(next) = next_head(head, self.committed_end()) {
                if (*next).is_free {
                    self.free_list.remove(next);
                    size += (*next).payload_size + NODE_MARGIN;
                }
            }

            let merged = init_region(start as *mut u8, size, true);
            self.free_list.insert(merged);

            log::trace!("vmalloc: freed region at {:p}, merged payload {size}", ptr);
        }
    }

    /// Walks every region in address order, for diagnostics and tests.
    pub fn dump_nodes(&self) -> NodeIter<'_> {
        NodeIter {
            alloc: self,
            current: self.first_head(),
        }
    }
}

impl Drop for FreeListAllocator {
    fn drop(&mut self) {
        unsafe { os::release(self.memory, self.max_size) };
    }
}

impl fmt::Display for FreeListAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.dump_nodes() {
            write!(
                f,
                "{:p}: size: {}, total size: {}, free: {}",
                node.address as *const u8,
                node.payload_size,
                node.total_size,
                node.is_free as u8
            )?;
            if let Some(next) = node.next_free {
                write!(f, " (next: {:p})", next as *const u8)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A snapshot of one region, used by [`FreeListAllocator::dump_nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Address of the region's head.
    pub address: usize,
    /// Size of the region's payload, excluding its head and tail.
    pub payload_size: usize,
    /// Size of the region including its head and tail.
    pub total_size: usize,
    /// Whether the region is currently free.
    pub is_free: bool,
    /// Address of the next free region in free-list order, if any and if this region is free.
    pub next_free: Option<usize>,
}

/// Iterator over every region in address order, yielded by [`FreeListAllocator::dump_nodes`].
pub struct NodeIter<'a> {
    alloc: &'a FreeListAllocator,
    current: Option<*mut Head>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = NodeInfo;

    fn next(&mut self) -> Option<NodeInfo> {
        let head = self.current?;
        unsafe {
            let payload_size = (*head).payload_size;
            let is_free = (*head).is_free;
            let next_free = if is_free {
                FreeList::next_in_list(head).map(|h| h as usize)
            } else {
                None
            };

            self.current = next_head(head, self.alloc.committed_end());

            Some(NodeInfo {
                address: head as usize,
                payload_size,
                total_size: payload_size + NODE_MARGIN,
                is_free,
                next_free,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_allocator_has_no_committed_nodes() {
        let alloc = FreeListAllocator::create(4096).unwrap();
        assert_eq!(alloc.dump_nodes().count(), 0);
    }

    #[test]
    fn first_allocation_commits_at_least_one_page() {
        let mut alloc = FreeListAllocator::create(1 << 20).unwrap();
        let ptr = alloc.allocate(64).unwrap();
        assert!(!ptr.is_null());
        assert!(alloc.committed >= alloc.page_size);
    }

    #[test]
    fn free_coalesces_with_both_neighbours() {
        let mut alloc = FreeListAllocator::create(1 << 20).unwrap();
        let a = alloc.allocate(64).unwrap();
        let b = alloc.allocate(64).unwrap();
        let c = alloc.allocate(64).unwrap();

        alloc.free(a);
        alloc.free(c);
        assert_eq!(alloc.dump_nodes().filter(|n| n.is_free).count(), 2);

        alloc.free(b);
        assert_eq!(alloc.dump_nodes().filter(|n| n.is_free).count(), 1);
        let merged = alloc.dump_nodes().next().unwrap();
        assert!(merged.is_free);
    }

    #[test]
    fn allocation_past_max_size_fails() {
        let mut alloc = FreeListAllocator::create(os::page_size()).unwrap();
        assert!(alloc.allocate(os::page_size() * 4).is_none());
    }

    #[test]
    fn reused_freed_region_is_exact_match_before_splitting() {
        let mut alloc = FreeListAllocator::create(1 << 20).unwrap();
        let a = alloc.allocate(256).unwrap();
        alloc.free(a);
        let b = alloc.allocate(256).unwrap();
        assert_eq!(a, b);
    }
}
