//! Errors of the file system service and their errno mapping

use crate::bus::BusError;
use crate::resolver::ResolveError;

use std::io;
use std::path::PathBuf;

use async_fuse::Errno;

/// The error of a file system operation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The mount point does not exist when the mount starts
    #[error("mount root {} does not exist", .0.display())]
    RootMissing(PathBuf),

    /// `access` refused the request
    #[error("permission denied")]
    PermissionDenied,

    /// Extended attributes are not supported
    #[error("operation not supported")]
    Unsupported,

    /// The virtual path can not be mapped into the user's subtree
    #[error(transparent)]
    InvalidPath(#[from] ResolveError),

    /// An entry name sent by the kernel is not a usable name
    #[error("invalid entry name {0:?}")]
    InvalidName(String),

    /// The backing store failed
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// The notification could not be published, so the operation was not performed
    #[error("notification failed: {0}")]
    Transport(#[from] BusError),

    /// A request arrived while the mount is not serving
    #[error("file system is not mounted")]
    NotMounted,

    /// The kernel referred to a node id we do not know
    #[error("unknown node id {0}")]
    StaleNode(u64),
}

impl Error {
    /// The errno reported to the kernel
    #[must_use]
    pub fn errno(&self) -> Errno {
        match *self {
            Self::RootMissing(_) | Self::StaleNode(_) => Errno::ENOENT,
            Self::PermissionDenied | Self::InvalidPath(_) => Errno::EACCES,
            Self::Unsupported => Errno::ENOTSUP,
            Self::InvalidName(_) => Errno::EINVAL,
            Self::Storage(ref err) => Errno::from_io_error(err),
            Self::Transport(_) => Errno::EIO,
            Self::NotMounted => Errno::ENOTCONN,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Storage(err) => err,
            err => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

/// `Result` with [`Error`] as the default error
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(Error::PermissionDenied.errno(), Errno::EACCES);
        assert_eq!(Error::Unsupported.errno(), Errno::ENOTSUP);
        assert_eq!(Error::NotMounted.errno(), Errno::ENOTCONN);
        assert_eq!(Error::StaleNode(9).errno(), Errno::ENOENT);
        assert_eq!(Error::InvalidName("a/b".into()).errno(), Errno::EINVAL);
        assert_eq!(Error::Transport(BusError::NotBound).errno(), Errno::EIO);

        let err = ResolveError::ParentComponent("/../x".into());
        assert_eq!(Error::from(err).errno(), Errno::EACCES);

        let err = io::Error::from_raw_os_error(libc::ENOTEMPTY);
        assert_eq!(Error::from(err).errno().as_raw(), libc::ENOTEMPTY);

        let err = io::Error::new(io::ErrorKind::Other, "install failed");
        assert_eq!(Error::from(err).errno(), Errno::EIO);
    }
}
