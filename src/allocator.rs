//! # Allocator core
//!
//! Ties the arena, block primitives and segregated free lists together
//! into the four operations the crate exists to provide: `mm_init`,
//! `mm_deinit`, `mm_malloc`, `mm_free`.
//!
//! ```text
//!   mm_malloc(n)
//!     │
//!     ├─ adjusted = max(32, round_up(n + WORD, 16))
//!     ├─ first-fit scan, class(adjusted) .. 7
//!     │     found?  ──yes──►  place (split or consume)
//!     │      │no
//!     │      ▼
//!     │  extend_heap(max(adjusted, PAGE_SIZE))
//!     │      │
//!     │      ▼
//!     │   place (split or consume)
//!     ▼
//!   payload pointer
//! ```

use crate::align::{DOUBLE_WORD, PAGE_SIZE, WORD};
use crate::align_to;
use crate::block::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, Payload};
use crate::error::AllocError;
use crate::list::{FreeLists, NUM_CLASSES, size_class};
use crate::arena::Arena;

/// Bytes reserved at the base of the arena for the alignment pad, the
/// eight prologue blocks, and the epilogue header: `(2 + 4*NUM_CLASSES)`
/// words.
const RESERVED_WORDS: usize = 2 + 4 * NUM_CLASSES;

pub struct Allocator {
  arena: Arena,
  lists: Option<FreeLists>,
}

impl Allocator {
  pub const fn new() -> Self {
    Self { arena: Arena::uninit(), lists: None }
  }

  pub fn is_initialized(&self) -> bool {
    self.lists.is_some()
  }

  fn lists(&self) -> &FreeLists {
    self.lists.as_ref().expect("allocator not initialized")
  }

  fn lists_mut(&mut self) -> &mut FreeLists {
    self.lists.as_mut().expect("allocator not initialized")
  }

  // ---------------------------------------------------------------- init

  pub fn init(&mut self, size: usize) -> Result<(), AllocError> {
    if self.is_initialized() {
      return Err(AllocError::Internal);
    }

    self.arena.init(size)?;

    // One pad word, eight 32-byte prologues, one epilogue header word.
    let base = self.arena.sbrk((RESERVED_WORDS * WORD) as isize)?;

    let mut prologues = [Payload::from_addr(0); NUM_CLASSES];
    let mut header_addr = base + WORD; // skip the alignment pad
    for slot in prologues.iter_mut() {
      let payload = Payload::from_addr(header_addr + WORD);
      payload.write_header(MIN_BLOCK_SIZE as u64, true, false);
      payload.write_footer(MIN_BLOCK_SIZE as u64, true);
      payload.set_fnext(payload);
      payload.set_fprev(payload);
      *slot = payload;
      header_addr += MIN_BLOCK_SIZE;
    }

    // `header_addr` now sits exactly at `brk - WORD`: the epilogue slot.
    let epilogue = Payload::from_addr(header_addr + WORD);
    epilogue.write_header(0, true, false);

    self.lists = Some(FreeLists::new(prologues));

    if let Err(err) = self.extend_heap(PAGE_SIZE / WORD) {
      self.lists = None;
      let _ = self.arena.deinit();
      return Err(err);
    }

    log::debug!("mm_init: arena ready at [{:#x}, {:#x})", self.arena.heap_start(), self.arena.heap_end());
    Ok(())
  }

  pub fn deinit(&mut self) -> Result<(), AllocError> {
    self.arena.deinit()?;
    self.lists = None;
    Ok(())
  }

  // ------------------------------------------------------------- malloc

  pub fn malloc(&mut self, size: usize) -> Result<Payload, AllocError> {
    if !self.is_initialized() {
      return Err(AllocError::Internal);
    }

    let requested = (size as u64).checked_add(WORD as u64).ok_or(AllocError::InvalidArgument)?;
    if requested > MAX_BLOCK_SIZE {
      return Err(AllocError::InvalidArgument);
    }
    let rounded = align_to!(requested, DOUBLE_WORD as u64);
    let adjusted = rounded.max(MIN_BLOCK_SIZE as u64);
    if adjusted > MAX_BLOCK_SIZE {
      return Err(AllocError::InvalidArgument);
    }

    let start_class = size_class(adjusted);
    let fit = match self.lists().first_fit(start_class, adjusted) {
      Some(block) => block,
      None => {
        let want_words = (adjusted.max(PAGE_SIZE as u64) as usize).div_ceil(WORD);
        self.extend_heap(want_words)?
      }
    };

    let block = self.place(fit, adjusted);
    log::trace!("mm_malloc({size}): adjusted={adjusted}, class={start_class}, block={:#x}", block.addr());
    Ok(block)
  }

  /// Splits `fit` if the remainder would itself be a legal block, otherwise
  /// consumes it whole. Either way, removes `fit` from its free list first
  /// and returns the now-allocated payload.
  fn place(&mut self, fit: Payload, adjusted: u64) -> Payload {
    let fit_size = fit.size();
    let prev_free = fit.is_prev_free();
    self.lists_mut().remove(fit);

    let remainder = fit_size - adjusted;
    if remainder >= MIN_BLOCK_SIZE as u64 {
      fit.write_header(adjusted, true, prev_free);

      let rest = fit.next_phys();
      rest.write_header(remainder, false, false);
      rest.write_footer(remainder, false);
      // `rest`'s successor already has prev-free=true: it was true while
      // `fit` (now split into `fit`+`rest`) was one free block, and `rest`
      // is still free, so nothing downstream needs updating.

      let class = size_class(remainder);
      self.lists_mut().insert_front(class, rest);
    } else {
      fit.write_header(fit_size, true, prev_free);
      fit.next_phys().set_prev_free(false);
    }

    fit
  }

  // --------------------------------------------------------------- free

  pub fn free(&mut self, ptr: Payload) -> Result<(), AllocError> {
    if !self.is_initialized() {
      return Err(AllocError::Internal);
    }

    debug_assert!(
      ptr.addr() >= self.arena.heap_start() && ptr.addr() < self.arena.heap_end(),
      "mm_free called with a pointer outside the arena"
    );
    debug_assert!(ptr.is_allocated(), "mm_free called on a block that is already free (double free)");

    let size = ptr.size();
    let prev_free = ptr.is_prev_free();
    ptr.write_header(size, false, prev_free);
    ptr.write_footer(size, false);

    let merged = self.coalesce(ptr);
    log::trace!("mm_free: merged block {:#x} size={}", merged.addr(), merged.size());
    Ok(())
  }

  // ---------------------------------------------------------- coalescing

  /// Merges `b` (already marked free, header+footer written) with zero,
  /// one or two physically-adjacent free neighbors, and inserts the
  /// resulting block at the head of its size-class list.
  fn coalesce(&mut self, b: Payload) -> Payload {
    let prev_free = b.is_prev_free();
    let next = b.next_phys();
    let next_alloc = next.is_allocated();

    let (merged, successor) = match (prev_free, next_alloc) {
      // Case A: both neighbors allocated. `b` stands alone.
      (false, true) => (b, next),

      // Case B: predecessor allocated, successor free. Absorb `next`.
      (false, false) => {
        let after_next = next.next_phys();
        self.lists_mut().remove(next);
        let new_size = b.size() + next.size();
        b.write_header(new_size, false, prev_free);
        b.write_footer(new_size, false);
        (b, after_next)
      }

      // Case C: predecessor free, successor allocated. Absorb into `p`.
      (true, true) => {
        let p = b.prev_phys();
        self.lists_mut().remove(p);
        let p_prev_free = p.is_prev_free();
        let new_size = p.size() + b.size();
        p.write_header(new_size, false, p_prev_free);
        p.write_footer(new_size, false);
        (p, next)
      }

      // Case D: both neighbors free. Absorb both into `p`.
      (true, false) => {
        let p = b.prev_phys();
        let after_next = next.next_phys();
        self.lists_mut().remove(p);
        self.lists_mut().remove(next);
        let p_prev_free = p.is_prev_free();
        let new_size = p.size() + b.size() + next.size();
        p.write_header(new_size, false, p_prev_free);
        p.write_footer(new_size, false);
        (p, after_next)
      }
    };

    // Whatever shape the merge took, `merged` now ends at `successor`'s
    // start and is free, so `successor` must know its predecessor is free.
    successor.set_prev_free(true);

    let class = size_class(merged.size());
    self.lists_mut().insert_front(class, merged);
    merged
  }

  // ------------------------------------------------------------ extend

  /// Grows the heap by `words` (rounded up to even), installs a free block
  /// over the new bytes, advances the epilogue, and coalesces the new
  /// block with a free predecessor if one exists.
  fn extend_heap(&mut self, words: usize) -> Result<Payload, AllocError> {
    let words = if words % 2 == 1 { words + 1 } else { words };
    let bytes = words * WORD;

    let old_epilogue = Payload::from_addr(self.arena.brk());
    let prev_free = old_epilogue.is_prev_free();

    let old_brk = self.arena.sbrk(bytes as isize)?;

    let block = Payload::from_addr(old_brk);
    block.write_header(bytes as u64, false, prev_free);
    block.write_footer(bytes as u64, false);

    let new_epilogue = Payload::from_addr(self.arena.brk());
    new_epilogue.write_header(0, true, true);

    log::trace!("extend_heap: +{bytes} bytes, new block at {:#x}", block.addr());
    Ok(self.coalesce(block))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn init(size: usize) -> Allocator {
    let mut alloc = Allocator::new();
    alloc.init(size).unwrap();
    alloc
  }

  #[test]
  fn init_installs_one_4096_byte_free_block_in_class_7() {
    let mut alloc = init(8192);
    assert_eq!(alloc.lists().first_fit(7, 1).unwrap().size(), 4096);
    alloc.deinit().unwrap();
  }

  #[test]
  fn init_rejects_an_arena_too_small_to_hold_metadata_and_one_page() {
    let mut alloc = Allocator::new();
    assert_eq!(alloc.init(4096), Err(AllocError::NoMemory));
    assert!(!alloc.is_initialized());
  }

  #[test]
  fn scenario_1_first_malloc() {
    let mut alloc = init(8192);
    let p = alloc.malloc(1).unwrap();
    assert_eq!(p.addr() % 16, 0);
    assert_eq!(p.size(), 32);
    assert!(p.is_allocated());

    let free = alloc.lists().first_fit(7, 1).unwrap();
    assert_eq!(free.size(), 4096 - 32);
    alloc.deinit().unwrap();
  }

  #[test]
  fn scenario_2_second_malloc_follows_first() {
    let mut alloc = init(8192);
    let p = alloc.malloc(1).unwrap();
    let q = alloc.malloc(24).unwrap();
    assert_eq!(q.addr() - p.addr(), 32);
    assert_eq!(q.size(), 32);

    let free = alloc.lists().first_fit(7, 1).unwrap();
    assert_eq!(free.size(), 4096 - 64);
    alloc.deinit().unwrap();
  }

  #[test]
  fn scenario_3_free_middle_block_no_coalesce() {
    let mut alloc = init(8192);
    let a = alloc.malloc(40).unwrap();
    let b = alloc.malloc(40).unwrap();
    let c = alloc.malloc(40).unwrap();
    alloc.free(b).unwrap();

    assert!(!b.is_allocated());
    assert_eq!(b.size(), 48);
    assert!(a.is_allocated());
    assert!(c.is_allocated());

    let found = alloc.lists().first_fit(0, 1).unwrap();
    assert_eq!(found, b);
    alloc.deinit().unwrap();
  }

  #[test]
  fn scenario_4_free_predecessor_coalesces() {
    let mut alloc = init(8192);
    let a = alloc.malloc(40).unwrap();
    let b = alloc.malloc(40).unwrap();
    let c = alloc.malloc(40).unwrap();
    alloc.free(b).unwrap();
    alloc.free(a).unwrap();

    assert!(!a.is_allocated());
    assert_eq!(a.size(), 96);
    assert!(c.is_allocated());

    let found = alloc.lists().first_fit(1, 1).unwrap();
    assert_eq!(found, a);
    alloc.deinit().unwrap();
  }

  #[test]
  fn scenario_5_free_everything_merges_to_epilogue() {
    let mut alloc = init(8192);
    let a = alloc.malloc(40).unwrap();
    let b = alloc.malloc(40).unwrap();
    let c = alloc.malloc(40).unwrap();
    alloc.free(b).unwrap();
    alloc.free(a).unwrap();
    alloc.free(c).unwrap();

    assert!(!a.is_allocated());
    let expected_size = (4096 - 144) + 48 + 48 + 48;
    assert_eq!(a.size(), expected_size);
    // The merged block should now run all the way up to the epilogue.
    let epilogue = a.next_phys();
    assert_eq!(epilogue.addr(), alloc.arena.brk());
    assert_eq!(epilogue.size(), 0);
    assert!(epilogue.is_allocated());
    alloc.deinit().unwrap();
  }

  #[test]
  fn scenario_6_exhaustion_then_recovery() {
    let mut alloc = init(8192);
    let mut blocks = Vec::new();
    loop {
      match alloc.malloc(32) {
        Ok(p) => blocks.push(p),
        Err(AllocError::NoMemory) => break,
        Err(other) => panic!("unexpected error: {other:?}"),
      }
    }
    assert!(!blocks.is_empty());

    let last = blocks.pop().unwrap();
    alloc.free(last).unwrap();
    assert!(alloc.malloc(32).is_ok());
    alloc.deinit().unwrap();
  }

  #[test]
  fn zero_fill_arena_never_leaves_two_adjacent_free_blocks() {
    let mut alloc = init(4096 * 4);
    let sizes = [16usize, 40, 100, 8, 500, 1, 2000, 64];
    let mut live = Vec::new();
    for s in sizes {
      if let Ok(p) = alloc.malloc(s) {
        live.push(p);
      }
    }
    for (i, p) in live.iter().enumerate() {
      if i % 2 == 0 {
        alloc.free(*p).unwrap();
      }
    }
    // Walk the whole heap physically and check no two adjacent blocks are
    // both free (I4), skipping the prologue region and stopping at the
    // epilogue (I6).
    let mut cursor = Payload::from_addr(alloc.lists().prologue(0).addr());
    let mut prev_was_free: Option<bool> = None;
    loop {
      let is_epilogue = cursor.size() == 0 && cursor.is_allocated();
      if is_epilogue {
        break;
      }
      let free = !cursor.is_allocated();
      if let Some(prev_free) = prev_was_free {
        assert!(!(prev_free && free), "two adjacent free blocks at {:#x}", cursor.addr());
      }
      prev_was_free = Some(free);
      cursor = cursor.next_phys();
    }
    alloc.deinit().unwrap();
  }
}
