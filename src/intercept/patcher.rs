//! The page-protection / byte-patch primitive [`intercept::engine`](super::engine) builds on:
//! toggle a text page writable, overwrite one byte, and restore protection, with a guard that
//! always restores protection even if the write step is skipped.

use crate::error::{InterceptError, InterceptErrorKind};
use crate::platform::Platform;

/// Overwrites the byte at `addr` with `new_byte`, returning the byte that was there before.
///
/// Toggles `[addr, addr+1)` writable for the duration of the write and restores protection
/// unconditionally on the way out, even if the write itself is skipped by an early return — the
/// restore runs via an RAII guard rather than a second call site, so there is exactly one place
/// that can forget it.
pub fn patch_byte(
    platform: &dyn Platform,
    addr: usize,
    new_byte: u8,
) -> Result<u8, InterceptError> {
    let _guard = ProtectionGuard::acquire(platform, addr, 1)?;
    // SAFETY: `addr` is page-writable for the lifetime of `_guard`, and points at an instruction
    // byte this process has mapped executable (checked by the caller before patching).
    let original = unsafe {
        let ptr = addr as *mut u8;
        let original = *ptr;
        *ptr = new_byte;
        original
    };
    Ok(original)
}

/// Writes `expected_current` back if the byte at `addr` still equals `expected_current`;
/// otherwise returns [`InterceptErrorKind::Mismatch`] without touching memory — something else
/// modified the target concurrently.
pub fn restore_byte(
    platform: &dyn Platform,
    addr: usize,
    expected_current: u8,
    original: u8,
) -> Result<(), InterceptError> {
    let _guard = ProtectionGuard::acquire(platform, addr, 1)?;
    // SAFETY: see `patch_byte`; the page is writable for `_guard`'s lifetime.
    unsafe {
        let ptr = addr as *mut u8;
        if *ptr != expected_current {
            return Err(InterceptError::new(InterceptErrorKind::Mismatch));
        }
        *ptr = original;
    }
    Ok(())
}

/// Reads the byte currently at `addr` without altering protection (the page is already
/// executable/readable, which is all a plain load needs).
pub fn read_byte(addr: usize) -> u8 {
    // SAFETY: caller guarantees `addr` is a readable, mapped instruction byte.
    unsafe { *(addr as *const u8) }
}

/// Holds a `[addr, addr+len)` range writable for its lifetime, restoring the original (read,
/// execute) protection on drop regardless of how the scope is exited.
struct ProtectionGuard<'p> {
    platform: &'p dyn Platform,
    addr: usize,
    len: usize,
}

impl<'p> ProtectionGuard<'p> {
    fn acquire(platform: &'p dyn Platform, addr: usize, len: usize) -> Result<Self, InterceptError> {
        platform.mprotect_writable(addr, len)?;
        Ok(Self { platform, addr, len })
    }
}

impl Drop for ProtectionGuard<'_> {
    fn drop(&mut self) {
        // Best-effort: a `Drop` impl cannot propagate this failure, and the protection is already
        // set to something (writable); leaving it there is safer than panicking.
        let _ = self.platform.mprotect_restore(self.addr, self.len);
    }
}
