//! Decode FUSE ABI types from bytes

use crate::abi_marker::FuseAbiData;
use crate::c_bytes::CBytes;

use std::mem;
use std::slice;

use memchr::memchr;

/// Decode FUSE ABI types from bytes
#[derive(Debug)]
pub struct Decoder<'b> {
    /// buffer
    bytes: &'b [u8],
}

/// The error returned by [`Decoder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Expected more data
    #[error("NotEnough")]
    NotEnough,

    /// Data is more than expected
    #[error("TooMuchData")]
    TooMuchData,

    /// Pointer's alignment mismatched with the target type
    #[error("AlignMismatch")]
    AlignMismatch,

    /// Number overflow during decoding
    #[error("NumOverflow")]
    NumOverflow,

    /// The value of the target type is invalid
    #[error("InvalidValue")]
    InvalidValue,
}

/// Types which can be decoded from bytes
pub trait Decode<'b>: Sized {
    /// Decode Self from bytes
    /// # Errors
    /// Returns [`DecodeError`]
    fn decode(de: &mut Decoder<'b>) -> Result<Self, DecodeError>;
}

#[allow(clippy::as_conversions)]
fn to_address<T: ?Sized>(ptr: *const T) -> usize {
    ptr as *const () as usize
}

impl<'b> Decoder<'b> {
    /// Creates a [`Decoder`]
    #[inline]
    #[must_use]
    pub const fn new(bytes: &'b [u8]) -> Self {
        Self { bytes }
    }

    /// Returns true if the decoder has no data
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes a value of `T`
    /// # Errors
    /// Returns [`DecodeError`]
    #[inline]
    pub fn decode<T: Decode<'b>>(&mut self) -> Result<T, DecodeError> {
        T::decode(self)
    }

    /// pop some bytes without length checking
    unsafe fn pop_bytes_unchecked(&mut self, len: usize) -> &'b [u8] {
        let bytes = self.bytes.get_unchecked(..len);
        self.bytes = self.bytes.get_unchecked(len..);
        bytes
    }

    /// Fetches a reference to T
    pub(crate) fn fetch<T: FuseAbiData + Sized>(&mut self) -> Result<&'b T, DecodeError> {
        let ty_size: usize = mem::size_of::<T>();
        let ty_align: usize = mem::align_of::<T>();
        debug_assert!(ty_size > 0 && ty_size.wrapping_rem(ty_align) == 0);

        if self.bytes.len() < ty_size {
            return Err(DecodeError::NotEnough);
        }

        let addr = to_address(self.bytes);
        if addr.wrapping_rem(ty_align) != 0 {
            return Err(DecodeError::AlignMismatch);
        }

        unsafe {
            let bytes = self.pop_bytes_unchecked(ty_size);
            let ret = &*(bytes.as_ptr().cast());
            Ok(ret)
        }
    }

    /// Fetches a slice of T
    pub(crate) fn fetch_slice<T: FuseAbiData + Sized>(
        &mut self,
        len: usize,
    ) -> Result<&'b [T], DecodeError> {
        let ty_size: usize = mem::size_of::<T>();
        let ty_align: usize = mem::align_of::<T>();
        debug_assert!(ty_size > 0 && ty_size.wrapping_rem(ty_align) == 0);

        let slice_size = ty_size.checked_mul(len).ok_or(DecodeError::NumOverflow)?;

        if self.bytes.len() < slice_size {
            return Err(DecodeError::NotEnough);
        }

        let addr = to_address(self.bytes);
        if addr.wrapping_rem(ty_align) != 0 {
            return Err(DecodeError::AlignMismatch);
        }

        unsafe {
            let bytes = self.pop_bytes_unchecked(slice_size);
            let ret = slice::from_raw_parts(bytes.as_ptr().cast(), len);
            Ok(ret)
        }
    }

    /// Fetches exactly `len` bytes
    pub(crate) fn fetch_bytes(&mut self, len: usize) -> Result<&'b [u8], DecodeError> {
        if self.bytes.len() < len {
            return Err(DecodeError::NotEnough);
        }
        unsafe { Ok(self.pop_bytes_unchecked(len)) }
    }

    /// Fetches all remaining bytes
    pub(crate) fn fetch_all_bytes(&mut self) -> &'b [u8] {
        let len = self.bytes.len();
        unsafe { self.pop_bytes_unchecked(len) }
    }

    /// Fetches nul-terminated bytes
    pub(crate) fn fetch_c_bytes(&mut self) -> Result<CBytes<'b>, DecodeError> {
        let idx = memchr(0, self.bytes).ok_or(DecodeError::NotEnough)?;
        let len = idx.wrapping_add(1);
        assert!(len <= self.bytes.len());

        unsafe {
            let bytes = self.pop_bytes_unchecked(len);
            Ok(CBytes::new_unchecked(bytes))
        }
    }

    /// # Errors
    /// Returns `DecodeError::TooMuchData` if the data is not completely consumed
    #[inline]
    pub fn all_consuming<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<T, DecodeError> {
        let ret = f(self)?;
        if !self.is_empty() {
            return Err(DecodeError::TooMuchData);
        }
        Ok(ret)
    }
}
