//! # Block primitives
//!
//! Pure address-arithmetic operations over the header/footer metadata
//! encoding described in the data model. Every block (prologue, epilogue,
//! free, or allocated) shares the same single-word header layout:
//!
//! ```text
//!   63           60   59                                          0
//!   ┌─┬──┬───────┬──────────────────────────────────────────────────┐
//!   │A│rr│  P     │                     size                        │
//!   └─┴──┴───────┴──────────────────────────────────────────────────┘
//!    │  │   │
//!    │  │   └── bit 60: prev-free bookkeeping bit (internal only, see
//!    │  │       DESIGN.md): is the physical predecessor of this block
//!    │  │       currently free?
//!    │  └────── bits 61-62: reserved, always zero
//!    └───────── bit 63: allocated flag
//! ```
//!
//! A free block additionally carries a footer word (same encoding) at its
//! last word, and stores its free-list links in the first two words of its
//! payload. Allocated blocks have no footer; those bytes belong to the
//! caller.
//!
//! All pointer arithmetic is confined to this module behind the [`Payload`]
//! newtype, per the "well-audited module" design note.

use std::mem;

const SIZE_MASK: u64 = (1u64 << 60) - 1;
const PREV_FREE_BIT: u64 = 1u64 << 60;
const ALLOC_BIT: u64 = 1u64 << 63;
const DOUBLE_WORD_MASK: u64 = 0xF;

/// Largest block size that fits in the 60-bit size field.
pub const MAX_BLOCK_SIZE: u64 = SIZE_MASK & !DOUBLE_WORD_MASK;

/// Minimum legal block size: header + two link words + footer.
pub const MIN_BLOCK_SIZE: usize = 32;

/// A payload address within the arena. Zero-cost, `Copy`, and deliberately
/// opaque outside this module: every operation on it is one of the pure
/// address-arithmetic primitives below.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Payload(pub(crate) *mut u8);

impl Payload {
  pub fn addr(self) -> usize {
    self.0 as usize
  }

  pub fn from_addr(addr: usize) -> Self {
    Payload(addr as *mut u8)
  }

  fn as_ptr(self) -> *mut u8 {
    self.0
  }

  fn header_ptr(self) -> *mut u64 {
    // SAFETY: every payload is preceded by a header word written by this
    // crate's own block-construction code.
    unsafe { self.as_ptr().sub(mem::size_of::<u64>()) as *mut u64 }
  }

  fn header_word(self) -> u64 {
    unsafe { self.header_ptr().read() }
  }

  fn write_header_word(self, word: u64) {
    unsafe { self.header_ptr().write(word) }
  }

  /// The block's size in bytes (header, payload, optional footer and
  /// alignment padding all included).
  pub fn size(self) -> u64 {
    self.header_word() & SIZE_MASK & !DOUBLE_WORD_MASK
  }

  /// Whether this block is currently allocated.
  pub fn is_allocated(self) -> bool {
    self.header_word() & ALLOC_BIT != 0
  }

  /// Whether the block immediately preceding this one, physically, is
  /// currently free. Internal bookkeeping bit; see the module doc comment.
  pub fn is_prev_free(self) -> bool {
    self.header_word() & PREV_FREE_BIT != 0
  }

  /// Sets only the prev-free bit, leaving size and the allocated flag
  /// untouched. Used to keep a successor's bookkeeping in sync whenever a
  /// block's own free/allocated state changes.
  pub fn set_prev_free(self, prev_free: bool) {
    let word = self.header_word();
    let word = if prev_free { word | PREV_FREE_BIT } else { word & !PREV_FREE_BIT };
    self.write_header_word(word);
  }

  /// Writes the header word only, preserving no prior state.
  pub fn write_header(self, size: u64, allocated: bool, prev_free: bool) {
    self.write_header_word(pack(size, allocated, prev_free));
  }

  /// Pointer to this block's footer word (`payload + size - 2*WORD`).
  /// Only meaningful for free blocks and prologue sentinels.
  fn footer_ptr(self) -> *mut u64 {
    let offset = self.size() as usize - 2 * mem::size_of::<u64>();
    unsafe { self.as_ptr().add(offset) as *mut u64 }
  }

  /// Writes the footer word. Callers must only do this for blocks that are
  /// free (or prologue sentinels), matching invariant I3.
  pub fn write_footer(self, size: u64, allocated: bool) {
    unsafe { self.footer_ptr().write(pack(size, allocated, false)) }
  }

  pub fn footer_size(self) -> u64 {
    unsafe { self.footer_ptr().read() & SIZE_MASK & !DOUBLE_WORD_MASK }
  }

  pub fn footer_allocated(self) -> bool {
    unsafe { self.footer_ptr().read() & ALLOC_BIT != 0 }
  }

  /// Steps to the next block physically adjacent to this one. Always
  /// valid: every block carries a header, including the epilogue.
  pub fn next_phys(self) -> Payload {
    Payload::from_addr(self.addr() + self.size() as usize)
  }

  /// Steps to the block physically preceding this one. Only valid to call
  /// when `self.is_prev_free()` is true: the predecessor's footer is only
  /// maintained while it is free.
  pub fn prev_phys(self) -> Payload {
    debug_assert!(self.is_prev_free(), "prev_phys called on a block whose predecessor is not free");
    let prev_footer = unsafe { (self.as_ptr() as *mut u64).sub(2).read() };
    let prev_size = prev_footer & SIZE_MASK & !DOUBLE_WORD_MASK;
    Payload::from_addr(self.addr() - prev_size as usize)
  }

  /// Free-list "previous" link, stored at payload offset 0.
  pub fn fprev(self) -> Payload {
    let raw = unsafe { (self.as_ptr() as *mut usize).read() };
    Payload::from_addr(raw)
  }

  pub fn set_fprev(self, other: Payload) {
    unsafe { (self.as_ptr() as *mut usize).write(other.addr()) }
  }

  /// Free-list "next" link, stored at payload offset `+WORD`.
  pub fn fnext(self) -> Payload {
    let raw = unsafe { (self.as_ptr() as *mut usize).add(1).read() };
    Payload::from_addr(raw)
  }

  pub fn set_fnext(self, other: Payload) {
    unsafe { (self.as_ptr() as *mut usize).add(1).write(other.addr()) }
  }
}

/// Packs a header/footer word from its constituent fields, clearing the
/// low double-word bits of `size` (structurally always zero, but cleared
/// defensively on every write per the data model).
fn pack(size: u64, allocated: bool, prev_free: bool) -> u64 {
  let mut word = size & SIZE_MASK & !DOUBLE_WORD_MASK;
  if prev_free {
    word |= PREV_FREE_BIT;
  }
  if allocated {
    word |= ALLOC_BIT;
  }
  word
}

#[cfg(test)]
mod tests {
  use super::*;

  // A standalone byte buffer big enough to host a couple of synthetic
  // blocks, used to exercise the pure address-arithmetic primitives
  // without going through the arena/allocator layers.
  fn buffer(words: usize) -> Vec<u64> {
    vec![0u64; words]
  }

  fn payload_at(buf: &mut [u64], word_index: usize) -> Payload {
    Payload(unsafe { (buf.as_mut_ptr().add(word_index)) as *mut u8 })
  }

  #[test]
  fn pack_unpack_round_trip() {
    let mut buf = buffer(4);
    let p = payload_at(&mut buf, 1);
    p.write_header(64, true, false);
    assert_eq!(p.size(), 64);
    assert!(p.is_allocated());
    assert!(!p.is_prev_free());

    p.write_header(48, false, true);
    assert_eq!(p.size(), 48);
    assert!(!p.is_allocated());
    assert!(p.is_prev_free());
  }

  #[test]
  fn size_field_clears_low_double_word_bits() {
    let mut buf = buffer(4);
    let p = payload_at(&mut buf, 1);
    p.write_header(0x33, false, false);
    assert_eq!(p.size() % 16, 0);
  }

  #[test]
  fn footer_round_trips_independently_of_header() {
    let mut buf = buffer(8);
    // Block at word index 1, size 48 bytes (6 words): header at word 1,
    // footer at word 1 + 48/8 - 2 = word 5.
    let p = payload_at(&mut buf, 1);
    p.write_header(48, false, false);
    p.write_footer(48, false);
    assert_eq!(p.footer_size(), 48);
    assert!(!p.footer_allocated());
  }

  #[test]
  fn next_phys_steps_by_size() {
    let mut buf = buffer(16);
    let a = payload_at(&mut buf, 1);
    a.write_header(32, true, false);
    let b = a.next_phys();
    assert_eq!(b.addr(), a.addr() + 32);
  }

  #[test]
  fn prev_phys_reads_predecessor_footer() {
    let mut buf = buffer(16);
    let a = payload_at(&mut buf, 1);
    a.write_header(48, false, false);
    a.write_footer(48, false);
    let b = a.next_phys();
    b.write_header(32, true, true);
    assert_eq!(b.prev_phys().addr(), a.addr());
  }

  #[test]
  fn free_list_links_round_trip() {
    let mut buf = buffer(16);
    let a = payload_at(&mut buf, 1);
    let b = payload_at(&mut buf, 9);
    a.set_fnext(b);
    a.set_fprev(b);
    assert_eq!(a.fnext(), b);
    assert_eq!(a.fprev(), b);
  }

  #[test]
  fn set_prev_free_preserves_size_and_allocated() {
    let mut buf = buffer(4);
    let p = payload_at(&mut buf, 1);
    p.write_header(128, true, false);
    p.set_prev_free(true);
    assert_eq!(p.size(), 128);
    assert!(p.is_allocated());
    assert!(p.is_prev_free());
    p.set_prev_free(false);
    assert_eq!(p.size(), 128);
    assert!(p.is_allocated());
    assert!(!p.is_prev_free());
  }
}
