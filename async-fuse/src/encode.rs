//! Encode FUSE replies into io slices

use crate::abi_marker::FuseAbiData;

use std::io::IoSlice;
use std::mem;
use std::slice;

/// Types which can be written to the FUSE connection as a reply body
pub trait Encode {
    /// Appends the byte slices of `self` to `container`
    fn collect_bytes<'c, C>(&'c self, container: &mut C)
    where
        C: Extend<IoSlice<'c>>;
}

impl Encode for () {
    #[inline]
    fn collect_bytes<'c, C>(&'c self, container: &mut C)
    where
        C: Extend<IoSlice<'c>>,
    {
        let _ = container;
    }
}

/// Transmutes `&T` to `&[u8]` where `T: FuseAbiData + Sized`
#[inline]
pub(crate) fn as_abi_bytes<T: FuseAbiData + Sized>(raw: &T) -> &[u8] {
    let ty_size = mem::size_of::<T>();
    let base: *const u8 = <*const T>::cast(raw);
    unsafe { slice::from_raw_parts(base, ty_size) }
}

/// Appends `bytes` unless it is empty
#[inline]
pub(crate) fn add_bytes<'c, C>(container: &mut C, bytes: &'c [u8])
where
    C: Extend<IoSlice<'c>>,
{
    if !bytes.is_empty() {
        container.extend(Some(IoSlice::new(bytes)));
    }
}
