//! # Error channel
//!
//! A process-wide integer slot mirroring the conventional `errno` pattern,
//! plus a small internal error type so that arena and allocator-core code
//! can propagate failures with `?` instead of threading raw numeric codes
//! through every call site.
//!
//! ```text
//!   Internal callers            Public mm_*/arena_* surface
//!   ─────────────────           ───────────────────────────
//!   Result<T, AllocError>  ──►  set_errno(code); return sentinel
//! ```

use std::sync::atomic::{AtomicI32, Ordering};

/// Stable numeric error codes, matching the external interface exactly.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
  None = 0,
  NoMemory = 1,
  InvalidArgument = 2,
  Alignment = 3,
  Corruption = 4,
  Internal = 5,
}

impl From<ErrorCode> for i32 {
  fn from(code: ErrorCode) -> i32 {
    code as i32
  }
}

impl TryFrom<i32> for ErrorCode {
  type Error = ();

  fn try_from(value: i32) -> Result<Self, Self::Error> {
    match value {
      0 => Ok(ErrorCode::None),
      1 => Ok(ErrorCode::NoMemory),
      2 => Ok(ErrorCode::InvalidArgument),
      3 => Ok(ErrorCode::Alignment),
      4 => Ok(ErrorCode::Corruption),
      5 => Ok(ErrorCode::Internal),
      _ => Err(()),
    }
  }
}

/// Internal error type used by every fallible function below the `mm_*`
/// boundary. Each variant maps onto exactly one [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  NoMemory,
  InvalidArgument,
  Alignment,
  Corruption,
  Internal,
}

impl std::fmt::Display for AllocError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::NoMemory => write!(f, "arena is out of reserved address space"),
      Self::InvalidArgument => write!(f, "invalid argument"),
      Self::Alignment => write!(f, "misaligned address"),
      Self::Corruption => write!(f, "heap metadata is corrupt"),
      Self::Internal => write!(f, "internal allocator error"),
    }
  }
}

impl std::error::Error for AllocError {}

impl AllocError {
  pub fn code(self) -> ErrorCode {
    match self {
      AllocError::NoMemory => ErrorCode::NoMemory,
      AllocError::InvalidArgument => ErrorCode::InvalidArgument,
      AllocError::Alignment => ErrorCode::Alignment,
      AllocError::Corruption => ErrorCode::Corruption,
      AllocError::Internal => ErrorCode::Internal,
    }
  }
}

/// The process-wide error slot. `AtomicI32` gives us interior mutability
/// without a lock; the allocator is single-threaded by contract (see the
/// Non-goals), so ordering beyond "some total order" is not meaningful here.
static ERRNO: AtomicI32 = AtomicI32::new(ErrorCode::None as i32);

/// Reads the last error code set by any `mm_*`/`arena_*` call.
pub fn get_errno() -> i32 {
  ERRNO.load(Ordering::Relaxed)
}

/// Sets the process-wide error slot to the given raw code.
///
/// Unrecognized codes are stored verbatim; callers reading them back via
/// [`get_errno`] get the same value out.
pub fn set_errno(code: i32) {
  ERRNO.store(code, Ordering::Relaxed);
}

/// Sets the error slot from a typed [`ErrorCode`]; used internally instead
/// of `set_errno(code as i32)` to keep call sites readable.
pub(crate) fn set_errno_code(code: ErrorCode) {
  ERRNO.store(code as i32, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_raw_codes() {
    set_errno_code(ErrorCode::Corruption);
    assert_eq!(get_errno(), 4);

    set_errno(0);
    assert_eq!(get_errno(), ErrorCode::None as i32);
  }

  #[test]
  fn error_code_conversions() {
    for (code, expected) in [
      (ErrorCode::None, 0),
      (ErrorCode::NoMemory, 1),
      (ErrorCode::InvalidArgument, 2),
      (ErrorCode::Alignment, 3),
      (ErrorCode::Corruption, 4),
      (ErrorCode::Internal, 5),
    ] {
      assert_eq!(i32::from(code), expected);
      assert_eq!(ErrorCode::try_from(expected), Ok(code));
    }
    assert_eq!(ErrorCode::try_from(99), Err(()));
  }

  #[test]
  fn alloc_error_maps_onto_error_code() {
    assert_eq!(AllocError::NoMemory.code(), ErrorCode::NoMemory);
    assert_eq!(AllocError::InvalidArgument.code(), ErrorCode::InvalidArgument);
    assert_eq!(AllocError::Alignment.code(), ErrorCode::Alignment);
    assert_eq!(AllocError::Corruption.code(), ErrorCode::Corruption);
    assert_eq!(AllocError::Internal.code(), ErrorCode::Internal);
  }
}
