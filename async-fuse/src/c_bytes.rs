//! Nul-terminated byte strings borrowed from a request buffer

use std::fmt::{self, Debug};

use memchr::memchr;

/// Bytes which end with exactly one NUL
pub struct CBytes<'b>(&'b [u8]);

impl Debug for CBytes<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl<'b> CBytes<'b> {
    /// # Safety
    /// The bytes must end with a NUL and must not contain any interior NUL
    #[inline]
    #[must_use]
    pub const unsafe fn new_unchecked(bytes: &'b [u8]) -> Self {
        Self(bytes)
    }

    /// Returns the bytes without the trailing NUL
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &'b [u8] {
        debug_assert!(!self.0.is_empty());
        debug_assert!(self.0[self.0.len().wrapping_sub(1)] == 0);
        unsafe { self.0.get_unchecked(..self.0.len().wrapping_sub(1)) }
    }
}

/// Checks that `bytes` has no NUL
#[inline]
pub fn check_bytes(bytes: &[u8]) -> Result<(), NulError> {
    match memchr(0, bytes) {
        None => Ok(()),
        Some(pos) => Err(NulError { pos }),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("NulError: nul position = {}", .pos)]
pub struct NulError {
    pos: usize,
}

impl NulError {
    #[inline]
    #[must_use]
    pub const fn nul_position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_nul() {
        assert!(check_bytes(b"hello").is_ok());
        let err = check_bytes(b"he\0llo").unwrap_err();
        assert_eq!(err.nul_position(), 2);
    }

    #[test]
    fn strip_nul() {
        let bytes = unsafe { CBytes::new_unchecked(b"name\0") };
        assert_eq!(bytes.as_bytes(), b"name");
    }
}
