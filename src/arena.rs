//! # Arena
//!
//! Owns a single contiguous region of anonymous virtual memory, obtained
//! once from the OS via `mmap` and released via `munmap`. The region is
//! `[heap_start, heap_end)`; `brk` is a movable cursor inside it marking
//! the boundary between the owned prefix `[heap_start, brk)` and the
//! unused reserve `[brk, heap_end)`.
//!
//! ```text
//!   heap_start                         brk                    heap_end
//!       │                               │                         │
//!       ▼                               ▼                         ▼
//!       ┌───────────────────────────────┬─────────────────────────┐
//!       │      owned [heap_start, brk)  │   reserve [brk, heap_end)│
//!       └───────────────────────────────┴─────────────────────────┘
//! ```
//!
//! This module is the only place in the crate that talks to the OS
//! directly; everything above it manipulates offsets within the mapping.

use std::ffi::c_void;
use std::ptr;

use crate::align::PAGE_SIZE;
use crate::error::AllocError;

/// The three boundary addresses of the arena, plus whatever bookkeeping is
/// needed to hand the mapping back to the OS at teardown.
pub struct Arena {
  heap_start: usize,
  brk: usize,
  heap_end: usize,
}

impl Arena {
  /// An arena that has not yet been mapped.
  pub const fn uninit() -> Self {
    Self { heap_start: 0, brk: 0, heap_end: 0 }
  }

  pub fn heap_start(&self) -> usize {
    self.heap_start
  }

  pub fn brk(&self) -> usize {
    self.brk
  }

  pub fn heap_end(&self) -> usize {
    self.heap_end
  }

  pub fn is_initialized(&self) -> bool {
    self.heap_start != 0
  }

  /// Maps `ceil(size, PAGE_SIZE)` bytes of private anonymous memory.
  pub fn init(&mut self, size: usize) -> Result<(), AllocError> {
    if size == 0 {
      return Err(AllocError::InvalidArgument);
    }
    if self.is_initialized() {
      return Err(AllocError::Internal);
    }

    let rounded = round_up_to_page(size);

    // SAFETY: requesting a fresh, unbacked private anonymous mapping; no
    // file descriptor is involved and the returned pointer is not aliased
    // by anything else in the process.
    let addr = unsafe {
      libc::mmap(
        ptr::null_mut(),
        rounded,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if addr == libc::MAP_FAILED {
      return Err(AllocError::NoMemory);
    }

    let base = addr as usize;
    self.heap_start = base;
    self.brk = base;
    self.heap_end = base + rounded;

    log::debug!(
      "arena_init: mapped {} bytes (requested {size}) at [{:#x}, {:#x})",
      rounded,
      self.heap_start,
      self.heap_end
    );

    Ok(())
  }

  /// Unmaps the arena. A no-op if the arena was never initialized.
  pub fn deinit(&mut self) -> Result<(), AllocError> {
    if !self.is_initialized() {
      return Ok(());
    }
    if self.heap_start > self.heap_end {
      return Err(AllocError::Corruption);
    }

    let len = self.heap_end - self.heap_start;
    // SAFETY: `heap_start` is the base address returned by the `mmap` call
    // in `init`, and `len` is exactly the length that call mapped.
    let rc = unsafe { libc::munmap(self.heap_start as *mut c_void, len) };
    if rc != 0 {
      return Err(AllocError::Internal);
    }

    log::debug!("arena_deinit: unmapped [{:#x}, {:#x})", self.heap_start, self.heap_end);

    self.heap_start = 0;
    self.brk = 0;
    self.heap_end = 0;
    Ok(())
  }

  /// Moves `brk` by the signed `delta` bytes, returning the *previous*
  /// `brk` value on success. `heap_end` is treated as exclusive: a `delta`
  /// that would make `brk` land exactly on `heap_end` is rejected (see
  /// DESIGN.md for the rationale pinning this choice).
  pub fn sbrk(&mut self, delta: isize) -> Result<usize, AllocError> {
    if !self.is_initialized() {
      return Err(AllocError::Internal);
    }

    let old_brk = self.brk;
    let new_brk = if delta >= 0 {
      old_brk.checked_add(delta as usize).ok_or(AllocError::NoMemory)?
    } else {
      old_brk.checked_sub(delta.unsigned_abs()).ok_or(AllocError::InvalidArgument)?
    };

    if new_brk < self.heap_start {
      return Err(AllocError::InvalidArgument);
    }
    if new_brk >= self.heap_end {
      return Err(AllocError::NoMemory);
    }

    self.brk = new_brk;
    log::trace!("arena_sbrk({delta}): brk {:#x} -> {:#x}", old_brk, new_brk);
    Ok(old_brk)
  }
}

fn round_up_to_page(size: usize) -> usize {
  size.div_ceil(PAGE_SIZE) * PAGE_SIZE
}
