//! mount

use crate::c_str;
use crate::fd::FuseDesc;
use crate::syscall;

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use tracing::debug;

/// Options passed to `mount(2)`
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// let users other than the mounter access the file system
    pub allow_other: bool,
    /// let the kernel check permissions against the returned attributes
    pub default_permissions: bool,
    /// the `source` shown in `/proc/mounts`
    pub fs_name: String,
}

impl Default for MountOptions {
    #[inline]
    fn default() -> Self {
        Self {
            allow_other: false,
            default_permissions: false,
            fs_name: "fuse".to_owned(),
        }
    }
}

impl MountOptions {
    /// Renders the fuse-specific data string
    fn data(&self, fd: i32, rootmode: u32, user_id: u32, group_id: u32) -> String {
        let mut data = format!(
            "fd={},rootmode={:o},user_id={},group_id={}",
            fd, rootmode, user_id, group_id
        );
        if self.allow_other {
            data.push_str(",allow_other");
        }
        if self.default_permissions {
            data.push_str(",default_permissions");
        }
        data
    }
}

/// Mounts a FUSE fd to the given mount point
pub fn mount(fd: &FuseDesc, mount_point: &Path, options: &MountOptions) -> io::Result<()> {
    c_str::with(mount_point.as_os_str().as_bytes(), |target| {
        let stat = syscall::stat(target)?;
        let rootmode = stat.st_mode & libc::S_IFMT;
        let user_id = unsafe { libc::getuid() };
        let group_id = unsafe { libc::getgid() };

        let data = options.data(fd.as_raw_fd(), rootmode, user_id, group_id);
        debug!(%data, "mount options");

        let to_cstring = |s: &str| {
            CString::new(s).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
        };
        let data = to_cstring(&data)?;
        let source = to_cstring(&options.fs_name)?;
        let fstype = b"fuse\0";

        unsafe {
            let ret = libc::mount(
                source.as_ptr(),
                target.as_ptr(),
                fstype.as_ptr().cast(),
                libc::MS_NOSUID | libc::MS_NODEV,
                data.as_ptr().cast(),
            );
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    })
}

/// Detaches the file system mounted at the given mount point
pub fn umount(mount_point: &Path) -> io::Result<()> {
    c_str::with(mount_point.as_os_str().as_bytes(), syscall::umount_lazy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_string() {
        let opts = MountOptions::default();
        assert_eq!(
            opts.data(5, 0o040_000, 1000, 100),
            "fd=5,rootmode=40000,user_id=1000,group_id=100"
        );

        let opts = MountOptions {
            allow_other: true,
            ..MountOptions::default()
        };
        assert!(opts.data(5, 0o040_000, 0, 0).ends_with(",allow_other"));
    }
}
