//! The file desciptor of `/dev/fuse`

use crate::syscall;

use std::io;
use std::os::raw::{c_char, c_int};
use std::os::unix::io::{AsRawFd, RawFd};

/// The file desciptor of `/dev/fuse`
#[derive(Debug)]
pub struct FuseDesc(RawFd);

impl FuseDesc {
    /// Opens the connection to `/dev/fuse`
    /// # Errors
    /// Returns an error if the underlying syscalls failed
    #[inline]
    pub fn open() -> io::Result<Self> {
        unsafe {
            let dev_path = b"/dev/fuse\0";
            let pathname: *const c_char = dev_path.as_ptr().cast();

            let oflag: c_int = libc::O_RDWR | libc::O_CLOEXEC;
            let ret: c_int = libc::open(pathname, oflag);
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
            debug_assert!(ret > 0);
            Ok(Self(ret))
        }
    }
}

impl Drop for FuseDesc {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            let ret = libc::close(self.0);
            debug_assert_eq!(ret, 0);
        }
    }
}

impl AsRawFd for FuseDesc {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl io::Read for &'_ FuseDesc {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        syscall::read(self.0, buf)
    }
}

impl io::Write for &'_ FuseDesc {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        syscall::write_vectored(self.0, &[io::IoSlice::new(buf)])
    }

    #[inline]
    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        syscall::write_vectored(self.0, bufs)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
