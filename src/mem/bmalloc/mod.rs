//! Fixed-capacity buddy allocator.
//!
//! [`FixedBuddyAllocator`] carves a single, caller-owned buffer of exactly `BLOCK_SIZE * 32`
//! bytes into power-of-two runs of `BLOCK_SIZE`-byte blocks, tracking which blocks are free in a
//! single `u32` bitmask (bit *i* set means block *i* is free). It never grows, never shrinks, and
//! never touches anything outside the buffer it was given.
//!
//! Placement search always looks for a buddy-aligned run sized to the next power of two above
//! the request, but only clears the blocks actually needed (see [`FixedBuddyAllocator::allocate`]
//! for why that asymmetry exists).

mod bitops;

#[cfg(feature = "debug")]
use core::ptr;

use bitops::{ceil_divide, find_optimal_space};

/// Number of blocks tracked by the allocator; fixed to the bit width of the occupancy mask.
const BLOCK_COUNT: usize = 32;

/// A buddy allocator over a fixed-size, caller-owned buffer.
///
/// `BLOCK_SIZE` is the quantum of allocation, in bytes. `POISON_BYTE` is the fill value used to
/// paint freed and leftover memory when the `debug` feature is enabled. The buffer borrowed by
/// the allocator must be exactly `BLOCK_SIZE * 32` bytes long.
pub struct FixedBuddyAllocator<'a, const BLOCK_SIZE: usize = 16, const POISON_BYTE: u8 = 0xCD> {
    /// Bit *i* set means block *i* is free.
    blocks: u32,
    buffer: &'a mut [u8],
}

impl<'a, const BLOCK_SIZE: usize, const POISON_BYTE: u8>
    FixedBuddyAllocator<'a, BLOCK_SIZE, POISON_BYTE>
{
    /// Total number of bytes this allocator manages.
    pub const CAPACITY: usize = BLOCK_SIZE * BLOCK_COUNT;

    /// Binds the allocator to `buffer`, marking every block free.
    ///
    /// # Panics
    ///
    /// Panics if `buffer.len() != Self::CAPACITY`.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        debug_assert_eq!(
            buffer.len(),
            Self::CAPACITY,
            "buffer must be exactly BLOCK_SIZE * 32 bytes"
        );
        Self {
            blocks: u32::MAX,
            buffer,
        }
    }

    /// Reserves a contiguous, buddy-aligned run of blocks large enough to hold `size` bytes.
    ///
    /// Returns a pointer to the first byte of the run, or `None` if no placement exists.
    ///
    /// Internally, the request is rounded up to `min_blocks = ceil(size / BLOCK_SIZE)`, and
    /// placement is searched for at `min_blocks.next_power_of_two()` blocks so the run lands on
    /// a buddy-aligned boundary. Only `min_blocks` bits are actually cleared: the trailing blocks
    /// inside the rounded-up footprint stay marked free, to be reused by smaller requests later.
    /// The original `size` passed here must be passed back unchanged to [`Self::free`], since the
    /// allocator does not itself remember how large any allocation was.
    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        let min_blocks = ceil_divide(size, BLOCK_SIZE);
        let order_blocks = min_blocks.next_power_of_two();
        let levels = order_blocks.trailing_zeros() as usize;

        let index = find_optimal_space(self.blocks, levels)? as usize;

        let mask = run_mask(min_blocks, index);
        debug_assert_eq!(
            self.blocks & mask,
            mask,
            "find_optimal_space returned a non-free run"
        );
        self.blocks &= !mask;

        log::trace!(
            "bmalloc: allocated {min_blocks} block(s) at index {index} (size {size})"
        );

        let ptr = unsafe { self.buffer.as_mut_ptr().add(index * BLOCK_SIZE) };

        #[cfg(feature = "debug")]
        unsafe {
            ptr::write_bytes(ptr, POISON_BYTE, min_blocks * BLOCK_SIZE);
        }

        Some(ptr)
    }

    /// Releases the run previously returned by [`Self::allocate`] for this exact `(ptr, size)`
    /// pair. The caller must pass the same `size` used at allocation time; this allocator does
    /// not record allocation sizes itself.
    ///
    /// With the `debug` feature enabled, this additionally checks that the leftover bytes between
    /// `size` and the rounded-up block footprint are still poisoned (catching out-of-bounds
    /// writes) and that the blocks being freed are not already free (catching double frees or a
    /// mismatched `size`), before poisoning the payload itself.
    pub fn free(&mut self, ptr: *mut u8, size: usize) {
        let min_blocks = ceil_divide(size, BLOCK_SIZE);
        let index = unsafe { ptr.offset_from(self.buffer.as_ptr()) } as usize / BLOCK_SIZE;
        let mask = run_mask(min_blocks, index);

        #[cfg(feature = "debug")]
        {
            assert_eq!(
                self.blocks & mask,
                0,
                "memory with this size isn't allocated at this address"
            );
            let remaining = min_blocks * BLOCK_SIZE - size;
            for i in 0..remaining {
                assert_eq!(
                    unsafe { *ptr.add(size + i) },
                    POISON_BYTE,
                    "used invalid (out-of-bounds) memory"
                );
            }
            unsafe { ptr::write_bytes(ptr, POISON_BYTE, size) };
        }

        log::trace!("bmalloc: freed {min_blocks} block(s) at index {index} (size {size})");
        self.blocks |= mask;
    }
}

/// Builds the `min_blocks`-wide bitmask starting at `index`, handling the case where the whole
/// 32-block arena is requested (`1u32 << 32` would overflow).
fn run_mask(min_blocks: usize, index: usize) -> u32 {
    let ones = if min_blocks >= 32 {
        u32::MAX
    } else {
        (1u32 << min_blocks) - 1
    };
    ones << index
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_SIZE: usize = 16;

    fn new_buffer() -> [u8; BLOCK_SIZE * BLOCK_COUNT] {
        [0u8; BLOCK_SIZE * BLOCK_COUNT]
    }

    #[test]
    fn fresh_allocator_is_all_free() {
        let mut buf = new_buffer();
        let fba = FixedBuddyAllocator::<BLOCK_SIZE>::new(&mut buf);
        assert_eq!(fba.blocks, u32::MAX);
    }

    #[test]
    fn allocate_on_fresh_allocator_returns_base_pointer() {
        let mut buf = new_buffer();
        let mut fba = FixedBuddyAllocator::<BLOCK_SIZE>::new(&mut buf);
        let base = fba.buffer.as_ptr();
        let ptr = fba.allocate(BLOCK_SIZE * BLOCK_COUNT).unwrap();
        assert_eq!(ptr, base as *mut u8);
    }

    /// Replays the sequential-exhaustion scenario, including the final "most cramped" placement,
    /// against the numeric traces produced by the original C implementation.
    #[test]
    fn sequential_exhaustion_matches_reference_trace() {
        let mut buf = new_buffer();
        let mut fba = FixedBuddyAllocator::<BLOCK_SIZE>::new(&mut buf);
        let base = fba.buffer.as_ptr() as usize;
        let index_of = |ptr: *mut u8| (ptr as usize - base) / BLOCK_SIZE;

        let a = fba.allocate(88).unwrap();
        assert_eq!(index_of(a), 0);
        assert_eq!(fba.blocks, 0xFFFF_FFC0);

        let b = fba.allocate(124).unwrap();
        assert_eq!(index_of(b), 8);
        assert_eq!(fba.blocks, 0xFFFF_00C0);

        let c = fba.allocate(56).unwrap();
        assert_eq!(index_of(c), 16);
        assert_eq!(fba.blocks, 0xFFF0_00C0);

        let d = fba.allocate(104).unwrap();
        assert_eq!(index_of(d), 24);
        assert_eq!(fba.blocks, 0x80F0_00C0);

        assert!(fba.allocate(102).is_none());

        fba.free(a, 88);
        assert_eq!(fba.blocks, 0x80F0_00FF);

        let e = fba.allocate(8).unwrap();
        assert_eq!(index_of(e), 31);
        assert_eq!(fba.blocks, 0x00F0_00FF);
    }

    #[test]
    fn free_restores_bitmask_to_all_free() {
        let mut buf = new_buffer();
        let mut fba = FixedBuddyAllocator::<BLOCK_SIZE>::new(&mut buf);
        let ptr = fba.allocate(88).unwrap();
        fba.free(ptr, 88);
        assert_eq!(fba.blocks, u32::MAX);
    }

    #[cfg(feature = "debug")]
    #[test]
    fn debug_poisons_unused_tail_of_rounded_run() {
        let mut buf = new_buffer();
        let mut fba = FixedBuddyAllocator::<BLOCK_SIZE>::new(&mut buf);
        let ptr = fba.allocate(10).unwrap();
        for i in 10..16 {
            assert_eq!(unsafe { *ptr.add(i) }, 0xCD);
        }
    }

    #[cfg(feature = "debug")]
    #[test]
    #[should_panic(expected = "used invalid")]
    fn debug_detects_out_of_bounds_write_on_free() {
        let mut buf = new_buffer();
        let mut fba = FixedBuddyAllocator::<BLOCK_SIZE>::new(&mut buf);
        let ptr = fba.allocate(10).unwrap();
        unsafe { *ptr.add(10) = 0x00 };
        fba.free(ptr, 10);
    }
}
