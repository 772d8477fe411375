//! One method per file system verb.
//!
//! Every notified verb runs the same four steps: resolve the virtual path,
//! publish the event, perform the storage call, translate the result. An
//! event that fails to publish aborts the verb before the store is touched.

use crate::bus::NotificationBus;
use crate::config::{Identity, MountConfig};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::resolver::{sanitize_link_target, PathResolver, PhysicalPath, VirtualPath};
use crate::store::{self, DirEntry, StatVfs, TimeSpec};

use std::convert::TryFrom;
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::symlink;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error};

pub struct Dispatcher {
    resolver: PathResolver,
    bus: Arc<NotificationBus>,
    mount_root: PathBuf,
    admin: Identity,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("user_root", &self.resolver.user_root())
            .field("mount_root", &self.mount_root)
            .field("admin", &self.admin)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(config: &MountConfig, bus: Arc<NotificationBus>) -> Self {
        Self {
            resolver: PathResolver::new(&config.blocktree, &config.user),
            bus,
            mount_root: config.root.clone(),
            admin: config.admin.clone(),
        }
    }

    fn resolve(&self, path: &VirtualPath) -> Result<PhysicalPath> {
        Ok(self.resolver.resolve(path)?)
    }

    async fn notify(&self, event: Event) -> Result<()> {
        Ok(self.bus.publish(&event).await?)
    }

    pub async fn access(&self, path: &VirtualPath, mask: u32) -> Result<()> {
        let physical = self.resolve(path).map_err(|_| Error::PermissionDenied)?;
        store::access(physical.as_path(), mask).map_err(|err| {
            debug!(%path, %err, "access refused");
            Error::PermissionDenied
        })
    }

    pub async fn getattr(&self, path: &VirtualPath) -> Result<Metadata> {
        let physical = self.resolve(path)?;
        Ok(store::lstat(physical.as_path())?)
    }

    pub async fn chmod(&self, path: &VirtualPath, mode: u32) -> Result<()> {
        let physical = self.resolve(path)?;
        self.notify(Event::Chmod {
            path: path.clone(),
            mode,
        })
        .await?;
        Ok(store::chmod(physical.as_path(), mode)?)
    }

    pub async fn chown(&self, path: &VirtualPath, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let physical = self.resolve(path)?;
        self.notify(Event::Chown {
            path: path.clone(),
            uid,
            gid,
        })
        .await?;
        Ok(store::chown(physical.as_path(), uid, gid)?)
    }

    /// Creates (or truncates) a file owned by the admin identity, with exactly
    /// the permission bits of `mode`, opened with the caller's access mode.
    pub async fn create(&self, path: &VirtualPath, mode: u32, flags: u32) -> Result<u64> {
        let physical = self.resolve(path)?;
        self.notify(Event::Create {
            path: path.clone(),
            mode,
        })
        .await?;

        let open_flags = access_mode(flags) | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC;
        let fh = store::open(physical.as_path(), open_flags, Some(mode)).map_err(|err| {
            error!(%path, %err, "create failed");
            collapse(err)
        })?;

        let owned = store::fchmod(fh, mode)
            .and_then(|()| store::fchown(fh, self.admin.uid, self.admin.gid));
        if let Err(err) = owned {
            error!(%path, %err, "failed to set mode and owner of new file");
            let _ = store::close(fh);
            return Err(collapse(err));
        }
        Ok(fh)
    }

    /// Flushing persists the file like fsync does
    pub async fn flush(&self, path: &VirtualPath, fh: u64) -> Result<()> {
        self.notify(Event::Fsync { path: path.clone() }).await?;
        Ok(store::fsync(fh, false)?)
    }

    pub async fn fsync(&self, path: &VirtualPath, fh: u64, datasync: bool) -> Result<()> {
        self.notify(Event::Fsync { path: path.clone() }).await?;
        Ok(store::fsync(fh, datasync)?)
    }

    pub async fn fsyncdir(&self, path: &VirtualPath) -> Result<()> {
        self.notify(Event::FsyncDir { path: path.clone() }).await
    }

    pub async fn getxattr(&self, _: &VirtualPath, _: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Unsupported)
    }

    pub async fn setxattr(&self, _: &VirtualPath, _: &[u8], _: &[u8]) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub async fn removexattr(&self, _: &VirtualPath, _: &[u8]) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// There are never any attributes to list
    pub async fn listxattr(&self, _: &VirtualPath) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Makes `new_path` another name of `existing_path`
    pub async fn link(&self, existing_path: &VirtualPath, new_path: &VirtualPath) -> Result<()> {
        let existing = self.resolve(existing_path)?;
        let new = self.resolve(new_path)?;
        self.notify(Event::Link {
            new_path: new_path.clone(),
            existing_path: existing_path.clone(),
        })
        .await?;
        Ok(fs::hard_link(existing.as_path(), new.as_path())?)
    }

    pub async fn mkdir(&self, path: &VirtualPath, mode: u32) -> Result<()> {
        let physical = self.resolve(path)?;
        self.notify(Event::MkDir {
            path: path.clone(),
            mode,
        })
        .await?;
        Ok(store::mkdir(physical.as_path(), mode)?)
    }

    pub async fn mknod(&self, path: &VirtualPath, mode: u32, rdev: u32) -> Result<()> {
        let physical = self.resolve(path)?;
        Ok(store::mknod(physical.as_path(), mode, rdev)?)
    }

    pub async fn open(&self, path: &VirtualPath, flags: u32) -> Result<u64> {
        let physical = self.resolve(path)?;
        self.notify(Event::Open {
            path: path.clone(),
            flags,
        })
        .await?;
        let flags = raw_flags(flags) | libc::O_CLOEXEC;
        Ok(store::open(physical.as_path(), flags, None)?)
    }

    pub async fn opendir(&self, path: &VirtualPath) -> Result<()> {
        let _ = self.resolve(path)?;
        self.notify(Event::OpenDir { path: path.clone() }).await
    }

    pub async fn read(&self, fh: u64, size: u32, offset: u64) -> Result<Vec<u8>> {
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        Ok(store::read_at(fh, size, offset)?)
    }

    /// Lists `.` and `..`, then the physical entries in store order.
    /// A missing directory lists only the dots.
    pub async fn readdir(&self, path: &VirtualPath) -> Result<Vec<DirEntry>> {
        let physical = self.resolve(path)?;
        self.notify(Event::ReadDir { path: path.clone() }).await?;

        let mut entries = vec![DirEntry::dot(b"."), DirEntry::dot(b"..")];
        match store::list_dir(physical.as_path()) {
            Ok(listing) => entries.extend(listing),
            Err(ref err)
                if err.kind() == io::ErrorKind::NotFound
                    || err.raw_os_error() == Some(libc::ENOTDIR) =>
            {
                debug!(%path, "listing a directory that does not exist");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(entries)
    }

    /// Returns the link target, with absolute targets made relative to the mount root
    pub async fn readlink(&self, path: &VirtualPath) -> Result<PathBuf> {
        let physical = self.resolve(path)?;
        self.notify(Event::ReadLink { path: path.clone() }).await?;
        let target = fs::read_link(physical.as_path())?;
        Ok(sanitize_link_target(&self.mount_root, &target))
    }

    pub async fn release(&self, path: &VirtualPath, fh: u64) -> Result<()> {
        self.notify(Event::Release {
            path: path.clone(),
            fh,
        })
        .await?;
        Ok(store::close(fh)?)
    }

    pub async fn releasedir(&self, path: &VirtualPath, fh: u64) -> Result<()> {
        self.notify(Event::ReleaseDir {
            path: path.clone(),
            fh,
        })
        .await
    }

    pub async fn rename(&self, old_path: &VirtualPath, new_path: &VirtualPath) -> Result<()> {
        let old = self.resolve(old_path)?;
        let new = self.resolve(new_path)?;
        self.notify(Event::Rename {
            old_path: old_path.clone(),
            new_path: new_path.clone(),
        })
        .await?;
        Ok(fs::rename(old.as_path(), new.as_path())?)
    }

    pub async fn rmdir(&self, path: &VirtualPath) -> Result<()> {
        let physical = self.resolve(path)?;
        self.notify(Event::RmDir { path: path.clone() }).await?;
        Ok(fs::remove_dir(physical.as_path())?)
    }

    pub async fn statfs(&self, path: &VirtualPath) -> Result<StatVfs> {
        let physical = self.resolve(path)?;
        Ok(store::statvfs(physical.as_path())?)
    }

    /// Creates `link_path` holding `link_target` verbatim
    pub async fn symlink(&self, link_path: &VirtualPath, link_target: &str) -> Result<()> {
        let physical = self.resolve(link_path)?;
        self.notify(Event::SymLink {
            link_path: link_path.clone(),
            link_target: link_target.to_owned(),
        })
        .await?;
        Ok(symlink(link_target, physical.as_path())?)
    }

    pub async fn truncate(&self, path: &VirtualPath, length: u64, fh: Option<u64>) -> Result<()> {
        let physical = self.resolve(path)?;
        self.notify(Event::Truncate {
            path: path.clone(),
            length,
            fh,
        })
        .await?;
        Ok(store::truncate(physical.as_path(), length, fh)?)
    }

    pub async fn unlink(&self, path: &VirtualPath) -> Result<()> {
        let physical = self.resolve(path)?;
        self.notify(Event::Unlink { path: path.clone() }).await?;
        Ok(fs::remove_file(physical.as_path())?)
    }

    pub async fn utimens(&self, path: &VirtualPath, atime: TimeSpec, mtime: TimeSpec) -> Result<()> {
        let physical = self.resolve(path)?;
        Ok(store::utimens(physical.as_path(), atime, mtime)?)
    }

    pub async fn write(&self, path: &VirtualPath, fh: u64, data: &[u8], offset: u64) -> Result<usize> {
        self.notify(Event::Write { path: path.clone() }).await?;
        Ok(store::write_at(fh, data, offset)?)
    }
}

/// Reinterprets kernel open flags as `open(2)` flags
fn raw_flags(flags: u32) -> i32 {
    i32::from_ne_bytes(flags.to_ne_bytes())
}

fn access_mode(flags: u32) -> i32 {
    raw_flags(flags) & libc::O_ACCMODE
}

/// Create reports every failure as `EIO`
fn collapse(err: io::Error) -> Error {
    Error::Storage(io::Error::new(io::ErrorKind::Other, err))
}
