//! # seglist-alloc - A Segregated Free-List Memory Allocator
//!
//! This crate provides a **segregated free-list allocator** over a single
//! privately-mapped arena. Unlike a bump allocator, freed memory is tracked
//! and reused: each block carries a boundary-tag header/footer pair, and
//! free blocks are threaded onto one of eight size-class lists.
//!
//! ## Overview
//!
//! ```text
//!   Arena layout after mm_init:
//!
//!   ┌──────┬──────────────────────────┬───────────────────┬───────────┐
//!   │ pad  │ 8 prologue sentinels     │   one free block   │ epilogue  │
//!   │ 8B   │ (32B each, class 0..7)   │   (one page)       │  (0B)     │
//!   └──────┴──────────────────────────┴───────────────────┴───────────┘
//!   heap_start                                                    brk
//!
//!   Each allocated/free block:
//!   ┌────────┬─────────────────────────────┬────────┐
//!   │ header │      payload / fprev,fnext  │ footer │  (footer only on free blocks)
//!   └────────┴─────────────────────────────┴────────┘
//! ```
//!
//! `mm_malloc` does a first-fit scan starting at the requested size's class
//! and walking up through class 7; if nothing fits, the arena's reserved
//! (but not yet carved) address space is extended by `extend_heap` and the
//! new block is coalesced with whatever free block preceded it. `mm_free`
//! clears the allocated bit and immediately attempts to coalesce with both
//! physical neighbors before reinserting into the appropriate list.
//!
//! ## Crate Structure
//!
//! ```text
//!   seglist_alloc
//!   ├── align      - Alignment macros and word-size constants
//!   ├── error      - errno channel + internal AllocError/ErrorCode types
//!   ├── arena      - mmap/munmap-backed [heap_start, brk, heap_end) region
//!   ├── block      - Payload: bit-packed header/footer primitives (internal)
//!   ├── list       - Segregated free lists, size-class routing (internal)
//!   └── allocator  - mm_init/mm_malloc/mm_free/mm_deinit core (internal)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use seglist_alloc::{mm_init, mm_malloc, mm_free, mm_deinit, get_errno};
//!
//! unsafe {
//!     assert_eq!(mm_init(1 << 20), 0);
//!
//!     let ptr = mm_malloc(64) as *mut u64;
//!     assert!(!ptr.is_null());
//!     *ptr = 42;
//!
//!     mm_free(ptr as *mut u8);
//!     mm_deinit();
//!     let _ = get_errno();
//! }
//! ```
//!
//! ## Features
//!
//! - **Block reuse**: freed blocks are coalesced with free neighbors and
//!   reused by later allocations, unlike a bump allocator.
//! - **Segregated free lists**: eight size classes keep first-fit scans
//!   short once the heap has been used for a while.
//! - **errno-style error reporting**: every `mm_*` call sets a process-wide
//!   error code, readable via [`get_errno`], matching the conventions of
//!   the C allocator API this crate's surface mirrors.
//!
//! ## Limitations
//!
//! - **Single arena, fixed upper bound**: `mm_init` maps one region up
//!   front; the allocator never grows beyond it.
//! - **Single-threaded contract**: the global allocator instance is a bare
//!   `static mut`, not guarded by a lock. Every `mm_*` entry point is
//!   `unsafe` and it is the caller's job to never have two such calls
//!   in flight at once.
//! - **Unix-only**: requires `libc`'s `mmap`/`munmap` (POSIX systems).
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! `mm_malloc`/`mm_free` operate on raw pointers with no compiler-checked
//! ownership; callers must uphold the usual C allocator contract (free
//! exactly once, only pointers this crate returned, never after `mm_deinit`).

use std::ptr;

pub mod align;
mod allocator;
mod arena;
mod block;
pub mod error;
mod list;

use allocator::Allocator;
use block::Payload;
use error::ErrorCode;

pub use error::{AllocError, get_errno, set_errno};

/// The single process-wide allocator instance. Not behind a lock: the
/// allocator's contract is single-threaded (see the crate docs'
/// Limitations section), so every `mm_*` entry point is itself `unsafe`
/// and callers are responsible for not overlapping calls across threads.
static mut ALLOCATOR: Allocator = Allocator::new();

/// Borrows the single global allocator instance.
///
/// # Safety
///
/// Caller must not hold another live borrow of `ALLOCATOR` and must not
/// call this from more than one thread concurrently.
unsafe fn allocator() -> &'static mut Allocator {
  unsafe { &mut *ptr::addr_of_mut!(ALLOCATOR) }
}

/// Maps a `size`-byte (rounded up to a page) arena and installs the initial
/// free-list bookkeeping. Returns `0` on success, `-1` on failure with the
/// reason available via [`get_errno`].
///
/// # Safety
///
/// Must not be called while the allocator is already initialized from
/// another thread without first calling [`mm_deinit`]; doing so is
/// reported as an error rather than undefined behavior, but concurrent
/// `mm_init`/`mm_deinit` pairs on the same process are the caller's to
/// serialize sensibly.
pub unsafe fn mm_init(size: usize) -> i32 {
  match unsafe { allocator() }.init(size) {
    Ok(()) => {
      error::set_errno_code(ErrorCode::None);
      0
    }
    Err(err) => {
      error::set_errno_code(err.code());
      -1
    }
  }
}

/// Unmaps the arena. A no-op, returning `0`, if the allocator was never
/// initialized.
///
/// # Safety
///
/// Any pointer previously returned by [`mm_malloc`] is invalid after this
/// call returns; dereferencing one is undefined behavior.
pub unsafe fn mm_deinit() -> i32 {
  match unsafe { allocator() }.deinit() {
    Ok(()) => {
      error::set_errno_code(ErrorCode::None);
      0
    }
    Err(err) => {
      error::set_errno_code(err.code());
      -1
    }
  }
}

/// Returns a payload pointer of at least `size` usable bytes, or null on
/// failure (including `size == 0`, which is not an error). The reason for
/// a null return is available via [`get_errno`].
///
/// # Safety
///
/// The allocator must have been initialized with [`mm_init`] first; calling
/// this beforehand returns null with an internal error code rather than
/// dereferencing unmapped memory, but relying on that is not recommended.
pub unsafe fn mm_malloc(size: usize) -> *mut u8 {
  if size == 0 {
    error::set_errno_code(ErrorCode::None);
    return ptr::null_mut();
  }

  match unsafe { allocator() }.malloc(size) {
    Ok(payload) => {
      error::set_errno_code(ErrorCode::None);
      payload.addr() as *mut u8
    }
    Err(err) => {
      error::set_errno_code(err.code());
      ptr::null_mut()
    }
  }
}

/// Frees a pointer previously returned by [`mm_malloc`]. A null pointer is
/// a no-op.
///
/// # Safety
///
/// `ptr` must be either null or a pointer this allocator's current arena
/// handed out via `mm_malloc` and not already freed. Passing any other
/// pointer is undefined behavior.
pub unsafe fn mm_free(ptr_in: *mut u8) {
  if ptr_in.is_null() {
    return;
  }

  let payload = Payload::from_addr(ptr_in as usize);
  match unsafe { allocator() }.free(payload) {
    Ok(()) => error::set_errno_code(ErrorCode::None),
    Err(err) => error::set_errno_code(err.code()),
  }
}
