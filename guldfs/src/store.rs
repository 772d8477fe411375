//! POSIX calls against the backing store.
//!
//! File handles are raw descriptors: they are handed to the kernel as-is and
//! come back on read, write, flush, fsync and release.

use std::convert::TryFrom;
use std::ffi::CString;
use std::fs::{self, File, Metadata, OpenOptions, Permissions};
use std::io;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::path::Path;

/// The permission bits of a mode
pub const PERMISSION_BITS: u32 = 0o7777;

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Borrows a raw handle as a `File` without taking ownership
fn borrow_fd(fh: u64) -> io::Result<ManuallyDrop<File>> {
    let fd = RawFd::try_from(fh).map_err(|_| io::Error::from_raw_os_error(libc::EBADF))?;
    Ok(ManuallyDrop::new(unsafe { File::from_raw_fd(fd) }))
}

/// Converts a raw descriptor into a file handle
fn into_fh(fd: RawFd) -> u64 {
    // descriptors are never negative
    u64::from(fd.unsigned_abs())
}

/// `lstat(2)`
pub fn lstat(path: &Path) -> io::Result<Metadata> {
    fs::symlink_metadata(path)
}

/// Opens `path` with raw `open(2)` flags; `mode` applies only when the file is created
pub fn open(path: &Path, flags: i32, mode: Option<u32>) -> io::Result<u64> {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_RDONLY => options.read(true),
        libc::O_WRONLY => options.write(true),
        _ => options.read(true).write(true),
    };
    let _ = options.custom_flags(flags & !libc::O_ACCMODE);
    if let Some(mode) = mode {
        let _ = options.mode(mode & PERMISSION_BITS);
    }
    let file = options.open(path)?;
    Ok(into_fh(file.into_raw_fd()))
}

/// Closes a handle returned by [`open`]
pub fn close(fh: u64) -> io::Result<()> {
    let fd = RawFd::try_from(fh).map_err(|_| io::Error::from_raw_os_error(libc::EBADF))?;
    check(unsafe { libc::close(fd) })
}

/// Reads up to `size` bytes at `offset`, stopping early only at end of file
pub fn read_at(fh: u64, size: usize, offset: u64) -> io::Result<Vec<u8>> {
    let file = borrow_fd(fh)?;
    let mut buf = vec![0; size];
    let mut filled = 0;
    while filled < size {
        let pos = offset.saturating_add(filled as u64);
        match file.read_at(&mut buf[filled..], pos) {
            Ok(0) => break,
            Ok(n) => filled = filled.wrapping_add(n),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Writes all of `data` at `offset`
pub fn write_at(fh: u64, data: &[u8], offset: u64) -> io::Result<usize> {
    let file = borrow_fd(fh)?;
    file.write_all_at(data, offset)?;
    Ok(data.len())
}

pub fn fsync(fh: u64, datasync: bool) -> io::Result<()> {
    let file = borrow_fd(fh)?;
    if datasync {
        file.sync_data()
    } else {
        file.sync_all()
    }
}

pub fn fchown(fh: u64, uid: u32, gid: u32) -> io::Result<()> {
    let fd = RawFd::try_from(fh).map_err(|_| io::Error::from_raw_os_error(libc::EBADF))?;
    check(unsafe { libc::fchown(fd, uid, gid) })
}

pub fn fchmod(fh: u64, mode: u32) -> io::Result<()> {
    let file = borrow_fd(fh)?;
    file.set_permissions(Permissions::from_mode(mode & PERMISSION_BITS))
}

/// Fails with the raw error `errno` when `path` is a symlink
fn refuse_symlink(path: &Path, errno: libc::c_int) -> io::Result<()> {
    if lstat(path)?.file_type().is_symlink() {
        return Err(io::Error::from_raw_os_error(errno));
    }
    Ok(())
}

/// Symlinks have no mode of their own, so they are refused with `EOPNOTSUPP`
pub fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    refuse_symlink(path, libc::EOPNOTSUPP)?;
    fs::set_permissions(path, Permissions::from_mode(mode & PERMISSION_BITS))
}

/// `lchown(2)`; `None` leaves the id unchanged
pub fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    let path = c_path(path)?;
    // (uid_t)-1 means "unchanged"
    let uid = uid.unwrap_or(u32::MAX);
    let gid = gid.unwrap_or(u32::MAX);
    check(unsafe { libc::lchown(path.as_ptr(), uid, gid) })
}

/// Truncates through the open handle when there is one
pub fn truncate(path: &Path, length: u64, fh: Option<u64>) -> io::Result<()> {
    match fh {
        Some(fh) => borrow_fd(fh)?.set_len(length),
        None => OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NOFOLLOW)
            .open(path)?
            .set_len(length),
    }
}

/// Creates a directory with exactly the permission bits of `mode`
pub fn mkdir(path: &Path, mode: u32) -> io::Result<()> {
    fs::create_dir(path)?;
    chmod(path, mode)
}

pub fn mknod(path: &Path, mode: u32, rdev: u32) -> io::Result<()> {
    let path = c_path(path)?;
    check(unsafe { libc::mknod(path.as_ptr(), mode, libc::dev_t::from(rdev)) })
}

pub fn access(path: &Path, mask: u32) -> io::Result<()> {
    let path = c_path(path)?;
    let mask = libc::c_int::try_from(mask).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    check(unsafe { libc::access(path.as_ptr(), mask) })
}

/// A time to set on a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    Now,
    Omit,
    /// Seconds and nanoseconds since the epoch; `secs` is negative before it
    At { secs: i64, nsecs: u32 },
}

impl TimeSpec {
    fn to_timespec(self) -> libc::timespec {
        match self {
            Self::Now => libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_NOW,
            },
            Self::Omit => libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_OMIT,
            },
            Self::At { secs, nsecs } => libc::timespec {
                tv_sec: secs,
                tv_nsec: libc::c_long::from(nsecs),
            },
        }
    }
}

/// `utimensat(2)` on the link itself when `path` is a symlink
pub fn utimens(path: &Path, atime: TimeSpec, mtime: TimeSpec) -> io::Result<()> {
    let path = c_path(path)?;
    let times = [atime.to_timespec(), mtime.to_timespec()];
    check(unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            path.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    })
}

/// The fields of `statvfs(3)`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatVfs {
    pub bavail: u64,
    pub bfree: u64,
    pub blocks: u64,
    pub bsize: u64,
    pub favail: u64,
    pub ffree: u64,
    pub files: u64,
    pub flag: u64,
    pub frsize: u64,
    pub namemax: u64,
}

#[allow(clippy::useless_conversion)]
pub fn statvfs(path: &Path) -> io::Result<StatVfs> {
    let path = c_path(path)?;
    let mut st: MaybeUninit<libc::statvfs> = MaybeUninit::zeroed();
    check(unsafe { libc::statvfs(path.as_ptr(), st.as_mut_ptr()) })?;
    let st = unsafe { st.assume_init() };
    Ok(StatVfs {
        bavail: u64::from(st.f_bavail),
        bfree: u64::from(st.f_bfree),
        blocks: u64::from(st.f_blocks),
        bsize: u64::from(st.f_bsize),
        favail: u64::from(st.f_favail),
        ffree: u64::from(st.f_ffree),
        files: u64::from(st.f_files),
        flag: u64::from(st.f_flag),
        frsize: u64::from(st.f_frsize),
        namemax: u64::from(st.f_namemax),
    })
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub ino: u64,
    /// `DT_*`
    pub kind: u8,
}

impl DirEntry {
    pub(crate) fn dot(name: &[u8]) -> Self {
        Self {
            name: name.to_vec(),
            ino: 0,
            kind: libc::DT_DIR,
        }
    }
}

fn dirent_kind(file_type: fs::FileType) -> u8 {
    use std::os::unix::fs::FileTypeExt;

    if file_type.is_dir() {
        libc::DT_DIR
    } else if file_type.is_symlink() {
        libc::DT_LNK
    } else if file_type.is_file() {
        libc::DT_REG
    } else if file_type.is_fifo() {
        libc::DT_FIFO
    } else if file_type.is_socket() {
        libc::DT_SOCK
    } else if file_type.is_block_device() {
        libc::DT_BLK
    } else if file_type.is_char_device() {
        libc::DT_CHR
    } else {
        libc::DT_UNKNOWN
    }
}

/// Lists a directory in backing-store order
pub fn list_dir(path: &Path) -> io::Result<Vec<DirEntry>> {
    use std::os::unix::fs::DirEntryExt;

    let mut entries = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let kind = entry.file_type().map_or(libc::DT_UNKNOWN, dirent_kind);
        entries.push(DirEntry {
            name: entry.file_name().as_bytes().to_vec(),
            ino: entry.ino(),
            kind,
        });
    }
    Ok(entries)
}
