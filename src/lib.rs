//! Two standalone heap-memory allocators for embedding in low-level software that needs
//! deterministic, bookkeeping-efficient placement of variably-sized byte regions inside a
//! contiguous address range.
//!
//! - [`mem::bmalloc`] carves a single, statically sized arena into power-of-two multiples of a
//!   fixed block size, tracking occupancy inside a single machine word.
//! - [`mem::vmalloc`] grows lazily by committing operating-system pages inside a reserved virtual
//!   range, placing header/footer metadata inline with each region and threading free regions
//!   through a doubly linked list.
//!
//! Both allocators are single-threaded and non-reentrant; callers must serialise access
//! externally. See each module's documentation for its full contract.

#![allow(clippy::missing_safety_doc)]

pub mod mem;

pub use mem::bmalloc::FixedBuddyAllocator;
pub use mem::vmalloc::{FreeListAllocator, MapError, NodeInfo};
