use std::convert::TryFrom;
use std::ffi::CStr;
use std::mem::MaybeUninit;
use std::os::raw::{c_int, c_void};
use std::os::unix::io::RawFd;
use std::io;

/// Converts a non-negative `ssize_t` into `usize`
fn ssize_to_usize(ret: isize) -> io::Result<usize> {
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    // a non-negative `ssize_t` value can not overflow `usize`
    Ok(ret.unsigned_abs())
}

/// Calls `read(2)`
pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    unsafe {
        let buf_ptr: *mut c_void = buf.as_mut_ptr().cast();
        ssize_to_usize(libc::read(fd, buf_ptr, buf.len()))
    }
}

/// Calls `writev(2)`
pub fn write_vectored(fd: RawFd, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
    let iovcnt = c_int::try_from(bufs.len())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    unsafe {
        // IoSlice is guaranteed to be ABI compatible with `iovec`
        let iov: *const libc::iovec = bufs.as_ptr().cast();
        ssize_to_usize(libc::writev(fd, iov, iovcnt))
    }
}

/// Calls `stat(2)`
pub fn stat(path: &CStr) -> io::Result<libc::stat> {
    let mut stat: MaybeUninit<libc::stat> = MaybeUninit::zeroed();
    unsafe {
        let ret = libc::stat(path.as_ptr(), stat.as_mut_ptr());
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        debug_assert_eq!(ret, 0);
        Ok(stat.assume_init())
    }
}

/// Calls `umount2(2)` with `MNT_DETACH`
pub fn umount_lazy(path: &CStr) -> io::Result<()> {
    unsafe {
        let ret = libc::umount2(path.as_ptr(), libc::MNT_DETACH);
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
