//! Error numbers sent back to the kernel

use std::fmt;
use std::io;

/// A positive `errno` value
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Errno(i32);

impl Errno {
    /// Wraps a raw errno
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Takes the raw errno of an io error, falling back to `EIO`
    #[inline]
    #[must_use]
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(raw) if raw > 0 => Self(raw),
            _ => Self::from_io_kind(err.kind()),
        }
    }

    fn from_io_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => Self::ENOENT,
            io::ErrorKind::PermissionDenied => Self::EACCES,
            io::ErrorKind::AlreadyExists => Self::EEXIST,
            io::ErrorKind::InvalidInput => Self::EINVAL,
            _ => Self::EIO,
        }
    }
}

impl Errno {
    pub const EACCES: Self = Self(libc::EACCES);
    pub const EEXIST: Self = Self(libc::EEXIST);
    pub const EINVAL: Self = Self(libc::EINVAL);
    pub const EIO: Self = Self(libc::EIO);
    pub const EISDIR: Self = Self(libc::EISDIR);
    pub const ENOENT: Self = Self(libc::ENOENT);
    pub const ENOSYS: Self = Self(libc::ENOSYS);
    pub const ENOTCONN: Self = Self(libc::ENOTCONN);
    pub const ENOTDIR: Self = Self(libc::ENOTDIR);
    pub const ENOTSUP: Self = Self(libc::ENOTSUP);
    pub const ERANGE: Self = Self(libc::ERANGE);
}

impl fmt::Debug for Errno {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno({}: {})", self.0, io::Error::from_raw_os_error(self.0))
    }
}

impl From<io::Error> for Errno {
    #[inline]
    fn from(err: io::Error) -> Self {
        Self::from_io_error(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_io_error() {
        let err = io::Error::from_raw_os_error(libc::ENOTEMPTY);
        assert_eq!(Errno::from_io_error(&err).as_raw(), libc::ENOTEMPTY);

        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(Errno::from_io_error(&err), Errno::ENOENT);

        let err = io::Error::new(io::ErrorKind::Other, "who knows");
        assert_eq!(Errno::from_io_error(&err), Errno::EIO);
    }
}
