//! The kernel side of a mount: node ids in, dispatcher calls, replies out

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::inode::InodeTable;
use crate::lifecycle::Mount;
use crate::resolver::VirtualPath;
use crate::store::{DirEntry, TimeSpec};

use std::collections::HashMap;
use std::convert::TryFrom;
use std::fs::Metadata;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::MetadataExt;
use std::str;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[allow(clippy::wildcard_imports)]
use async_fuse::ops::*;
use async_fuse::kernel::FUSE_UNKNOWN_INO;
use async_fuse::{Encode, Errno, FileSystem, FuseContext, Operation, ProtocolVersion};

use parking_lot::Mutex;
use tracing::{debug, error};

/// How long the kernel may cache entries and attributes
const TTL: Duration = Duration::from_secs(1);

/// Open directory handles and the listing each one is serving
#[derive(Debug, Default)]
struct DirHandles {
    next_fh: u64,
    listings: HashMap<u64, Option<Arc<Vec<DirEntry>>>>,
}

impl DirHandles {
    fn open(&mut self) -> u64 {
        self.next_fh = self.next_fh.wrapping_add(1);
        let _ = self.listings.insert(self.next_fh, None);
        self.next_fh
    }

    fn listing(&self, fh: u64) -> Option<Arc<Vec<DirEntry>>> {
        self.listings.get(&fh).cloned().flatten()
    }

    fn store(&mut self, fh: u64, listing: Arc<Vec<DirEntry>>) {
        let _ = self.listings.insert(fh, Some(listing));
    }

    fn release(&mut self, fh: u64) {
        let _ = self.listings.remove(&fh);
    }
}

/// A mounted user subtree served over FUSE
#[derive(Debug)]
pub struct GuldFs {
    mount: Arc<Mount>,
    dispatcher: Dispatcher,
    inodes: Mutex<InodeTable>,
    dirs: Mutex<DirHandles>,
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Builds a time from `stat` fields; `secs` is negative before the epoch
fn timestamp(secs: i64, nsecs: i64) -> SystemTime {
    let nsecs = u32::try_from(nsecs)
        .ok()
        .filter(|&n| n < 1_000_000_000)
        .unwrap_or(0);
    let whole = Duration::from_secs(secs.unsigned_abs());
    let base = if secs < 0 {
        UNIX_EPOCH.checked_sub(whole)
    } else {
        UNIX_EPOCH.checked_add(whole)
    };
    base.and_then(|t| t.checked_add(Duration::new(0, nsecs)))
        .unwrap_or(UNIX_EPOCH)
}

fn to_attr(meta: &Metadata) -> Attr {
    let mut attr = Attr::default();
    let _ = attr
        .ino(meta.ino())
        .size(meta.size())
        .blocks(meta.blocks())
        .mode(meta.mode())
        .nlink(clamp_u32(meta.nlink()))
        .uid(meta.uid())
        .gid(meta.gid())
        .rdev(clamp_u32(meta.rdev()))
        .blksize(clamp_u32(meta.blksize()))
        .atime(timestamp(meta.atime(), meta.atime_nsec()))
        .mtime(timestamp(meta.mtime(), meta.mtime_nsec()))
        .ctime(timestamp(meta.ctime(), meta.ctime_nsec()));
    attr
}

fn to_timespec(time: Option<SetTime>) -> TimeSpec {
    match time {
        None => TimeSpec::Omit,
        Some(SetTime::Now) => TimeSpec::Now,
        Some(SetTime::At { secs, nsecs }) => TimeSpec::At { secs, nsecs },
    }
}

/// Logs a failed request and replies with its errno
async fn fail(cx: FuseContext<'_>, err: Error) -> io::Result<()> {
    let errno = err.errno();
    match err {
        Error::Transport(_) | Error::NotMounted => {
            error!(%err, errno = errno.as_raw(), "request failed");
        }
        _ => debug!(%err, errno = errno.as_raw(), "request failed"),
    }
    cx.reply_err(errno).await
}

/// Sends `result` as the reply to `op`, or its errno
async fn respond<T, R>(cx: FuseContext<'_>, op: &T, result: Result<R>) -> io::Result<()>
where
    R: IsReplyOf<T> + Encode,
{
    match result {
        Ok(reply) => cx.reply(op, reply).await,
        Err(err) => fail(cx, err).await,
    }
}

impl GuldFs {
    #[must_use]
    pub fn new(mount: Arc<Mount>) -> Self {
        let dispatcher = Dispatcher::new(mount.config(), Arc::clone(mount.bus()));
        Self {
            mount,
            dispatcher,
            inodes: Mutex::new(InodeTable::new()),
            dirs: Mutex::new(DirHandles::default()),
        }
    }

    fn path(&self, ino: u64) -> Result<VirtualPath> {
        self.inodes.lock().path(ino)
    }

    fn child(&self, parent: u64, name: &[u8]) -> Result<VirtualPath> {
        self.path(parent)?.join(name)
    }

    /// Builds the entry of `path` and counts one kernel reference to it
    fn entry(&self, path: &VirtualPath, meta: &Metadata) -> Entry {
        let ino = self.inodes.lock().lookup(path);
        let mut entry = Entry::default();
        let _ = entry
            .nodeid(ino)
            .attr(to_attr(meta))
            .entry_valid(TTL)
            .attr_valid(TTL);
        entry
    }

    async fn lookup_entry(&self, path: &VirtualPath) -> Result<ReplyEntry> {
        let meta = self.dispatcher.getattr(path).await?;
        Ok(ReplyEntry::new(self.entry(path, &meta)))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn lookup(&self, parent: u64, name: &[u8]) -> Result<ReplyEntry> {
        let path = self.child(parent, name)?;
        self.lookup_entry(&path).await
    }

    async fn getattr(&self, ino: u64) -> Result<ReplyAttr> {
        let path = self.path(ino)?;
        let meta = self.dispatcher.getattr(&path).await?;
        Ok(ReplyAttr::new(to_attr(&meta), TTL))
    }

    /// Applies each requested change as its own verb: mode, owner, size, times
    async fn setattr(&self, ino: u64, op: &OpSetAttr<'_>) -> Result<ReplyAttr> {
        let path = self.path(ino)?;
        if let Some(mode) = op.mode() {
            self.dispatcher.chmod(&path, mode).await?;
        }
        if op.uid().is_some() || op.gid().is_some() {
            self.dispatcher.chown(&path, op.uid(), op.gid()).await?;
        }
        if let Some(size) = op.size() {
            self.dispatcher.truncate(&path, size, op.fh()).await?;
        }
        let (atime, mtime) = (op.atime(), op.mtime());
        if atime.is_some() || mtime.is_some() {
            self.dispatcher
                .utimens(&path, to_timespec(atime), to_timespec(mtime))
                .await?;
        }
        let meta = self.dispatcher.getattr(&path).await?;
        Ok(ReplyAttr::new(to_attr(&meta), TTL))
    }

    async fn readlink(&self, ino: u64) -> Result<ReplyReadLink> {
        let path = self.path(ino)?;
        let target = self.dispatcher.readlink(&path).await?;
        let bytes = target.into_os_string().into_vec();
        ReplyReadLink::new(bytes)
            .map_err(|err| Error::InvalidName(format!("link target of {}: {}", path, err)))
    }

    async fn symlink(&self, parent: u64, name: &[u8], link: &[u8]) -> Result<ReplyEntry> {
        let link_path = self.child(parent, name)?;
        let link_target = str::from_utf8(link)
            .map_err(|_| Error::InvalidName(String::from_utf8_lossy(link).into_owned()))?;
        self.dispatcher.symlink(&link_path, link_target).await?;
        self.lookup_entry(&link_path).await
    }

    async fn mknod(&self, parent: u64, name: &[u8], mode: u32, rdev: u32) -> Result<ReplyEntry> {
        let path = self.child(parent, name)?;
        self.dispatcher.mknod(&path, mode, rdev).await?;
        self.lookup_entry(&path).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn mkdir(&self, parent: u64, name: &[u8], mode: u32) -> Result<ReplyEntry> {
        let path = self.child(parent, name)?;
        self.dispatcher.mkdir(&path, mode).await?;
        self.lookup_entry(&path).await
    }

    async fn unlink(&self, parent: u64, name: &[u8]) -> Result<ReplyEmpty> {
        let path = self.child(parent, name)?;
        self.dispatcher.unlink(&path).await?;
        self.inodes.lock().unlink(&path);
        Ok(ReplyEmpty::new())
    }

    async fn rmdir(&self, parent: u64, name: &[u8]) -> Result<ReplyEmpty> {
        let path = self.child(parent, name)?;
        self.dispatcher.rmdir(&path).await?;
        self.inodes.lock().unlink(&path);
        Ok(ReplyEmpty::new())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn rename(
        &self,
        parent: u64,
        name: &[u8],
        newparent: u64,
        newname: &[u8],
    ) -> Result<ReplyEmpty> {
        let old_path = self.child(parent, name)?;
        let new_path = self.child(newparent, newname)?;
        self.dispatcher.rename(&old_path, &new_path).await?;
        self.inodes.lock().rename(&old_path, &new_path);
        Ok(ReplyEmpty::new())
    }

    async fn link(&self, existing: u64, newparent: u64, newname: &[u8]) -> Result<ReplyEntry> {
        let existing_path = self.path(existing)?;
        let new_path = self.child(newparent, newname)?;
        self.dispatcher.link(&existing_path, &new_path).await?;
        self.lookup_entry(&new_path).await
    }

    async fn open(&self, ino: u64, flags: u32) -> Result<ReplyOpen> {
        let path = self.path(ino)?;
        let fh = self.dispatcher.open(&path, flags).await?;
        let mut reply = ReplyOpen::default();
        let _ = reply.fh(fh);
        Ok(reply)
    }

    async fn read(&self, op: &OpRead<'_>) -> Result<ReplyData> {
        let data = self.dispatcher.read(op.fh(), op.size(), op.offset()).await?;
        Ok(ReplyData::new(data))
    }

    async fn write(&self, ino: u64, op: &OpWrite<'_>) -> Result<ReplyWrite> {
        let path = self.path(ino)?;
        let written = self
            .dispatcher
            .write(&path, op.fh(), op.data(), op.offset())
            .await?;
        let mut reply = ReplyWrite::default();
        let _ = reply.size(clamp_u32(u64::try_from(written).unwrap_or(u64::MAX)));
        Ok(reply)
    }

    async fn statfs(&self, ino: u64) -> Result<ReplyStatFs> {
        let path = self.path(ino)?;
        let st = self.dispatcher.statfs(&path).await?;
        let mut reply = ReplyStatFs::default();
        let _ = reply
            .blocks(st.blocks)
            .bfree(st.bfree)
            .bavail(st.bavail)
            .files(st.files)
            .ffree(st.ffree)
            .bsize(clamp_u32(st.bsize))
            .namelen(clamp_u32(st.namemax))
            .frsize(clamp_u32(st.frsize));
        Ok(reply)
    }

    async fn release(&self, ino: u64, fh: u64) -> Result<ReplyEmpty> {
        let path = self.path(ino)?;
        self.dispatcher.release(&path, fh).await?;
        Ok(ReplyEmpty::new())
    }

    async fn fsync(&self, ino: u64, fh: u64, datasync: bool) -> Result<ReplyEmpty> {
        let path = self.path(ino)?;
        self.dispatcher.fsync(&path, fh, datasync).await?;
        Ok(ReplyEmpty::new())
    }

    async fn flush(&self, ino: u64, fh: u64) -> Result<ReplyEmpty> {
        let path = self.path(ino)?;
        self.dispatcher.flush(&path, fh).await?;
        Ok(ReplyEmpty::new())
    }

    async fn setxattr(&self, ino: u64, op: &OpSetXAttr<'_>) -> Result<ReplyEmpty> {
        let path = self.path(ino)?;
        self.dispatcher
            .setxattr(&path, op.name(), op.value())
            .await?;
        Ok(ReplyEmpty::new())
    }

    async fn getxattr(&self, ino: u64, name: &[u8]) -> Result<ReplyData> {
        let path = self.path(ino)?;
        let value = self.dispatcher.getxattr(&path, name).await?;
        Ok(ReplyData::new(value))
    }

    async fn removexattr(&self, ino: u64, name: &[u8]) -> Result<ReplyEmpty> {
        let path = self.path(ino)?;
        self.dispatcher.removexattr(&path, name).await?;
        Ok(ReplyEmpty::new())
    }

    async fn opendir(&self, ino: u64) -> Result<ReplyOpen> {
        let path = self.path(ino)?;
        self.dispatcher.opendir(&path).await?;
        let fh = self.dirs.lock().open();
        let mut reply = ReplyOpen::default();
        let _ = reply.fh(fh);
        Ok(reply)
    }

    /// Lists the directory once per handle, at offset zero, and serves later
    /// offsets from that listing. An entry's offset is its index plus one.
    async fn readdir(&self, ino: u64, op: &OpReadDir<'_>) -> Result<ReplyDirectory> {
        let fh = op.fh();
        let cached = if op.offset() == 0 {
            None
        } else {
            self.dirs.lock().listing(fh)
        };
        let listing = match cached {
            Some(listing) => listing,
            None => {
                let path = self.path(ino)?;
                let listing = Arc::new(self.dispatcher.readdir(&path).await?);
                self.dirs.lock().store(fh, Arc::clone(&listing));
                listing
            }
        };

        let max_size = usize::try_from(op.size()).unwrap_or(usize::MAX);
        let start = usize::try_from(op.offset()).unwrap_or(usize::MAX);
        let mut reply = ReplyDirectory::new(max_size);
        for (index, entry) in listing.iter().enumerate().skip(start) {
            let ino = if entry.ino == 0 {
                FUSE_UNKNOWN_INO
            } else {
                entry.ino
            };
            let next = u64::try_from(index.wrapping_add(1)).unwrap_or(u64::MAX);
            if !reply.add_entry(ino, next, dirent_type(entry.kind), &entry.name) {
                break;
            }
        }
        Ok(reply)
    }

    async fn releasedir(&self, ino: u64, fh: u64) -> Result<ReplyEmpty> {
        self.dirs.lock().release(fh);
        let path = self.path(ino)?;
        self.dispatcher.releasedir(&path, fh).await?;
        Ok(ReplyEmpty::new())
    }

    async fn fsyncdir(&self, ino: u64) -> Result<ReplyEmpty> {
        let path = self.path(ino)?;
        self.dispatcher.fsyncdir(&path).await?;
        Ok(ReplyEmpty::new())
    }

    async fn access(&self, ino: u64, mask: u32) -> Result<ReplyEmpty> {
        let path = self.path(ino)?;
        self.dispatcher.access(&path, mask).await?;
        Ok(ReplyEmpty::new())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn create(&self, parent: u64, name: &[u8], mode: u32, flags: u32) -> Result<ReplyCreate> {
        let path = self.child(parent, name)?;
        let fh = self.dispatcher.create(&path, mode, flags).await?;
        match self.dispatcher.getattr(&path).await {
            Ok(meta) => Ok(ReplyCreate::new(self.entry(&path, &meta), fh)),
            Err(err) => {
                let _ = crate::store::close(fh);
                Err(err)
            }
        }
    }

    async fn do_listxattr(
        &self,
        cx: FuseContext<'_>,
        op: OpListXAttr<'_>,
    ) -> io::Result<()> {
        let ino = cx.header().nodeid();
        let names = match self.path(ino) {
            Ok(path) => self.dispatcher.listxattr(&path).await,
            Err(err) => Err(err),
        };
        let names = match names {
            Ok(names) => names,
            Err(err) => return fail(cx, err).await,
        };

        let len = u32::try_from(names.len()).unwrap_or(u32::MAX);
        if op.size() == 0 {
            let mut reply = ReplyXAttrSize::default();
            let _ = reply.size(len);
            cx.reply(&op, reply).await
        } else if len > op.size() {
            cx.reply_err(Errno::ERANGE).await
        } else {
            cx.reply(&op, ReplyData::new(names)).await
        }
    }
}

#[async_trait::async_trait]
impl FileSystem for GuldFs {
    async fn init(&self, proto: ProtocolVersion) -> io::Result<()> {
        debug!(?proto, "kernel session initialized");
        self.mount.init().await.map_err(io::Error::from)
    }

    #[allow(clippy::too_many_lines)]
    async fn dispatch<'b, 'a: 'b>(
        &'a self,
        cx: FuseContext<'b>,
        op: Operation<'b>,
    ) -> io::Result<()> {
        if let Err(err) = self.mount.ensure_mounted() {
            if op.is_no_reply() {
                return Ok(());
            }
            debug!(?op, "request while not mounted");
            return cx.reply_err(err.errno()).await;
        }

        let ino = cx.header().nodeid();

        match op {
            Operation::Lookup(op) => {
                let reply = self.lookup(ino, op.name()).await;
                respond(cx, &op, reply).await
            }
            Operation::Forget(op) => {
                self.inodes.lock().forget(ino, op.nlookup());
                Ok(())
            }
            Operation::BatchForget(op) => {
                let mut inodes = self.inodes.lock();
                for (nodeid, nlookup) in op.nodes() {
                    inodes.forget(nodeid, nlookup);
                }
                Ok(())
            }
            Operation::GetAttr(op) => {
                let reply = self.getattr(ino).await;
                respond(cx, &op, reply).await
            }
            Operation::SetAttr(op) => {
                let reply = self.setattr(ino, &op).await;
                respond(cx, &op, reply).await
            }
            Operation::ReadLink(op) => {
                let reply = self.readlink(ino).await;
                respond(cx, &op, reply).await
            }
            Operation::SymLink(op) => {
                let reply = self.symlink(ino, op.name(), op.link()).await;
                respond(cx, &op, reply).await
            }
            Operation::MkNod(op) => {
                let reply = self.mknod(ino, op.name(), op.mode(), op.rdev()).await;
                respond(cx, &op, reply).await
            }
            Operation::MkDir(op) => {
                let reply = self.mkdir(ino, op.name(), op.mode()).await;
                respond(cx, &op, reply).await
            }
            Operation::Unlink(op) => {
                let reply = self.unlink(ino, op.name()).await;
                respond(cx, &op, reply).await
            }
            Operation::RmDir(op) => {
                let reply = self.rmdir(ino, op.name()).await;
                respond(cx, &op, reply).await
            }
            Operation::Rename(op) => {
                let reply = self
                    .rename(ino, op.name(), op.newdir(), op.newname())
                    .await;
                respond(cx, &op, reply).await
            }
            Operation::Link(op) => {
                let reply = self.link(op.oldnodeid(), ino, op.name()).await;
                respond(cx, &op, reply).await
            }
            Operation::Open(op) => {
                let reply = self.open(ino, op.flags()).await;
                respond(cx, &op, reply).await
            }
            Operation::Read(op) => {
                let reply = self.read(&op).await;
                respond(cx, &op, reply).await
            }
            Operation::Write(op) => {
                let reply = self.write(ino, &op).await;
                respond(cx, &op, reply).await
            }
            Operation::StatFs(op) => {
                let reply = self.statfs(ino).await;
                respond(cx, &op, reply).await
            }
            Operation::Release(op) => {
                let reply = self.release(ino, op.fh()).await;
                respond(cx, &op, reply).await
            }
            Operation::FSync(op) => {
                let reply = self.fsync(ino, op.fh(), op.datasync()).await;
                respond(cx, &op, reply).await
            }
            Operation::SetXAttr(op) => {
                let reply = self.setxattr(ino, &op).await;
                respond(cx, &op, reply).await
            }
            Operation::GetXAttr(op) => {
                let reply = self.getxattr(ino, op.name()).await;
                respond(cx, &op, reply).await
            }
            Operation::ListXAttr(op) => self.do_listxattr(cx, op).await,
            Operation::RemoveXAttr(op) => {
                let reply = self.removexattr(ino, op.name()).await;
                respond(cx, &op, reply).await
            }
            Operation::Flush(op) => {
                let reply = self.flush(ino, op.fh()).await;
                respond(cx, &op, reply).await
            }
            Operation::OpenDir(op) => {
                let reply = self.opendir(ino).await;
                respond(cx, &op, reply).await
            }
            Operation::ReadDir(op) => {
                let reply = self.readdir(ino, &op).await;
                respond(cx, &op, reply).await
            }
            Operation::ReleaseDir(op) => {
                let reply = self.releasedir(ino, op.fh()).await;
                respond(cx, &op, reply).await
            }
            Operation::FSyncDir(op) => {
                let reply = self.fsyncdir(ino).await;
                respond(cx, &op, reply).await
            }
            Operation::Access(op) => {
                let reply = self.access(ino, op.mask()).await;
                respond(cx, &op, reply).await
            }
            Operation::Create(op) => {
                let reply = self
                    .create(ino, op.name(), op.mode(), op.flags())
                    .await;
                respond(cx, &op, reply).await
            }
            Operation::Interrupt(op) => {
                debug!(unique = op.unique(), "interrupt ignored");
                Ok(())
            }
            op => {
                debug!(?op, "unsupported operation");
                cx.reply_err(Errno::ENOSYS).await
            }
        }
    }

    async fn destroy(&self) {
        if let Err(err) = self.mount.destroy().await {
            error!(%err, "failed to unmount cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::Recorder;
    use crate::bus::NotificationBus;
    use crate::config::{Identity, MountConfig};

    use std::convert::TryInto;
    use std::fs;
    use std::mem;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::slice;
    use std::task::{Context, Poll};

    use aligned_bytes::AlignedBytes;
    use async_fuse::kernel::{self, fuse_opcode::*, FUSE_ROOT_ID};
    use async_fuse::FuseWrite;
    use async_std::task::block_on;
    use tempfile::TempDir;

    const PROTO: ProtocolVersion = ProtocolVersion {
        major: kernel::FUSE_KERNEL_VERSION,
        minor: kernel::FUSE_KERNEL_MINOR_VERSION,
    };

    #[derive(Default)]
    struct VecWriter(Vec<u8>);

    impl FuseWrite for VecWriter {
        fn poll_reply(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            bufs: &[io::IoSlice<'_>],
        ) -> Poll<io::Result<()>> {
            for b in bufs {
                self.0.extend_from_slice(b);
            }
            Poll::Ready(Ok(()))
        }
    }

    fn bytes_of<T: Copy>(value: &T) -> &[u8] {
        unsafe { slice::from_raw_parts((value as *const T).cast::<u8>(), mem::size_of::<T>()) }
    }

    fn request(opcode: u32, nodeid: u64, body: &[u8]) -> AlignedBytes {
        let header_len = mem::size_of::<kernel::fuse_in_header>();
        let total = header_len + body.len();
        let header = kernel::fuse_in_header {
            len: u32::try_from(total).unwrap(),
            opcode,
            unique: 7,
            nodeid,
            uid: 1000,
            gid: 1000,
            pid: 42,
            padding: 0,
        };
        let mut buf = AlignedBytes::new_zeroed(total, 8);
        buf[..header_len].copy_from_slice(bytes_of(&header));
        buf[header_len..].copy_from_slice(body);
        buf
    }

    fn with_name<T: Copy>(arg: &T, names: &[&[u8]]) -> Vec<u8> {
        let mut body = bytes_of(arg).to_vec();
        for name in names {
            body.extend_from_slice(name);
            body.push(0);
        }
        body
    }

    fn name(name: &[u8]) -> Vec<u8> {
        let mut body = name.to_vec();
        body.push(0);
        body
    }

    /// A decoded reply
    struct Reply(Vec<u8>);

    impl Reply {
        fn error(&self) -> i32 {
            i32::from_ne_bytes(self.0[4..8].try_into().unwrap())
        }

        fn u64_at(&self, offset: usize) -> u64 {
            u64::from_ne_bytes(self.0[offset..offset + 8].try_into().unwrap())
        }

        fn u32_at(&self, offset: usize) -> u32 {
            u32::from_ne_bytes(self.0[offset..offset + 4].try_into().unwrap())
        }

        fn body(&self) -> &[u8] {
            &self.0[16..]
        }

        /// Names of the `fuse_dirent` records in the body
        fn dirent_names(&self) -> Vec<String> {
            let mut names = Vec::new();
            let mut body = self.body();
            while !body.is_empty() {
                let namelen =
                    u32::from_ne_bytes(body[16..20].try_into().unwrap()) as usize;
                names.push(String::from_utf8(body[24..24 + namelen].to_vec()).unwrap());
                let padded = (24 + namelen + 7) & !7;
                body = &body[padded..];
            }
            names
        }
    }

    struct Fixture {
        _dir: TempDir,
        user_root: PathBuf,
        recorder: Recorder,
        mount: Arc<Mount>,
        fs: GuldFs,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mnt");
        let blocktree = dir.path().join("blocktree");
        let user_root = blocktree.join("isysd");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&user_root).unwrap();

        let admin = Identity {
            name: "admin".into(),
            uid: unsafe { libc::geteuid() },
            gid: unsafe { libc::getegid() },
        };
        let config = MountConfig::new(root, blocktree, "isysd".into(), admin)
            .unwrap()
            .settle_delay(Duration::ZERO);

        let recorder = Recorder::default();
        let bus = NotificationBus::with_transport(recorder.transport(), "inproc", Duration::ZERO);
        let mount = Arc::new(Mount::with_bus(config, Arc::new(bus)));
        block_on(mount.start()).unwrap();

        let fs = GuldFs::new(Arc::clone(&mount));
        Fixture {
            _dir: dir,
            user_root,
            recorder,
            mount,
            fs,
        }
    }

    fn mounted() -> Fixture {
        let fx = fixture();
        block_on(fx.fs.init(PROTO)).unwrap();
        fx
    }

    impl Fixture {
        fn call(&self, opcode: u32, nodeid: u64, body: &[u8]) -> Reply {
            let buf = request(opcode, nodeid, body);
            let mut writer = VecWriter::default();
            {
                let (cx, op) = FuseContext::new(&buf, Pin::<&mut VecWriter>::new(&mut writer), PROTO).unwrap();
                block_on(self.fs.dispatch(cx, op)).unwrap();
            }
            Reply(writer.0)
        }

        fn lookup(&self, parent: u64, entry: &[u8]) -> Reply {
            self.call(FUSE_LOOKUP, parent, &name(entry))
        }

        fn mkdir(&self, parent: u64, entry: &[u8], mode: u32) -> Reply {
            let arg = kernel::fuse_mkdir_in { mode, umask: 0 };
            self.call(FUSE_MKDIR, parent, &with_name(&arg, &[entry]))
        }

        fn create(&self, parent: u64, entry: &[u8], mode: u32, flags: u32) -> Reply {
            let arg = kernel::fuse_create_in {
                flags,
                mode,
                umask: 0,
                padding: 0,
            };
            self.call(FUSE_CREATE, parent, &with_name(&arg, &[entry]))
        }

        fn write(&self, nodeid: u64, fh: u64, data: &[u8]) -> Reply {
            let arg = kernel::fuse_write_in {
                fh,
                offset: 0,
                size: u32::try_from(data.len()).unwrap(),
                write_flags: 0,
                lock_owner: 0,
                flags: 0,
                padding: 0,
            };
            let mut body = bytes_of(&arg).to_vec();
            body.extend_from_slice(data);
            self.call(FUSE_WRITE, nodeid, &body)
        }

        fn release(&self, opcode: u32, nodeid: u64, fh: u64) -> Reply {
            let arg = kernel::fuse_release_in {
                fh,
                flags: 0,
                release_flags: 0,
                lock_owner: 0,
            };
            self.call(opcode, nodeid, bytes_of(&arg))
        }

        fn readdir(&self, nodeid: u64, fh: u64, offset: u64) -> Reply {
            let arg = kernel::fuse_read_in {
                fh,
                offset,
                size: 4096,
                read_flags: 0,
                lock_owner: 0,
                flags: 0,
                padding: 0,
            };
            self.call(FUSE_READDIR, nodeid, bytes_of(&arg))
        }
    }

    const ROOT: u64 = FUSE_ROOT_ID;
    const RDWR: u32 = libc::O_RDWR as u32;

    #[test]
    fn requests_before_init_are_refused() {
        let fx = fixture();
        let reply = fx.call(FUSE_GETATTR, ROOT, bytes_of(&kernel::fuse_getattr_in {
            getattr_flags: 0,
            dummy: 0,
            fh: 0,
        }));
        assert_eq!(reply.error(), -libc::ENOTCONN);

        let forget = fx.call(FUSE_FORGET, ROOT, bytes_of(&kernel::fuse_forget_in { nlookup: 1 }));
        assert!(forget.0.is_empty());
        assert!(fx.recorder.bodies().is_empty());
    }

    #[test]
    fn mkdir_create_write_release() {
        let fx = mounted();

        let reply = fx.mkdir(ROOT, b"docs", libc::S_IFDIR | 0o755);
        assert_eq!(reply.error(), 0);
        let docs = reply.u64_at(16);
        assert_ne!(docs, ROOT);

        let reply = fx.create(docs, b"a.txt", libc::S_IFREG | 0o644, RDWR);
        assert_eq!(reply.error(), 0);
        let file = reply.u64_at(16);
        let fh = reply.u64_at(16 + mem::size_of::<kernel::fuse_entry_out>());

        let reply = fx.write(file, fh, b"hello");
        assert_eq!(reply.error(), 0);
        assert_eq!(reply.u32_at(16), 5);

        let reply = fx.release(FUSE_RELEASE, file, fh);
        assert_eq!(reply.error(), 0);

        assert_eq!(fs::read(fx.user_root.join("docs/a.txt")).unwrap(), b"hello");

        let bodies = fx.recorder.bodies();
        assert!(bodies[0].starts_with("mount:"));
        assert!(bodies[0].ends_with(":isysd"));
        assert_eq!(bodies[1], format!("mkdir:/docs:{}", libc::S_IFDIR | 0o755));
        assert_eq!(
            bodies[2],
            format!("create:/docs/a.txt:{}:None", libc::S_IFREG | 0o644)
        );
        assert_eq!(bodies[3], "write:/docs/a.txt");
        assert_eq!(bodies[4], format!("release:/docs/a.txt:{}", fh));
    }

    #[test]
    fn readdir_serves_one_listing_per_handle() {
        let fx = mounted();
        fs::write(fx.user_root.join("a"), b"").unwrap();
        fs::write(fx.user_root.join("b"), b"").unwrap();

        let open = kernel::fuse_open_in {
            flags: 0,
            unused: 0,
        };
        let reply = fx.call(FUSE_OPENDIR, ROOT, bytes_of(&open));
        assert_eq!(reply.error(), 0);
        let fh = reply.u64_at(16);

        let reply = fx.readdir(ROOT, fh, 0);
        assert_eq!(reply.error(), 0);
        let names = reply.dirent_names();
        assert_eq!(&names[..2], &[".", ".."]);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, vec![".", "..", "a", "b"]);

        let reply = fx.readdir(ROOT, fh, 4);
        assert_eq!(reply.error(), 0);
        assert!(reply.body().is_empty());

        let reply = fx.release(FUSE_RELEASEDIR, ROOT, fh);
        assert_eq!(reply.error(), 0);

        assert_eq!(
            fx.recorder.bodies()[1..].to_vec(),
            vec![
                "opendir:/".to_owned(),
                "readdir:/".to_owned(),
                format!("releasedir:/:{}", fh),
            ]
        );
    }

    #[test]
    fn setattr_is_split_into_verbs() {
        let fx = mounted();
        fs::write(fx.user_root.join("f"), b"abcdef").unwrap();
        let file = fx.lookup(ROOT, b"f").u64_at(16);

        let arg = kernel::fuse_setattr_in {
            valid: kernel::FATTR_MODE | kernel::FATTR_SIZE,
            padding: 0,
            fh: 0,
            size: 2,
            lock_owner: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            atimensec: 0,
            mtimensec: 0,
            ctimensec: 0,
            mode: 0o600,
            unused4: 0,
            uid: 0,
            gid: 0,
            unused5: 0,
        };
        let reply = fx.call(FUSE_SETATTR, file, bytes_of(&arg));
        assert_eq!(reply.error(), 0);

        // fuse_attr_out: valid (8) + nsec (4) + dummy (4), then size at 8 into fuse_attr
        assert_eq!(reply.u64_at(16 + 16 + 8), 2);
        assert_eq!(reply.u32_at(16 + 16 + 60) & 0o7777, 0o600);
        assert_eq!(
            fx.recorder.bodies()[1..].to_vec(),
            vec!["chmod:/f:384", "truncate:/f:2:None"]
        );
    }

    #[test]
    fn setattr_accepts_times_before_the_epoch() {
        let fx = mounted();
        fs::write(fx.user_root.join("old"), b"").unwrap();
        let file = fx.lookup(ROOT, b"old").u64_at(16);

        let set_mtime = |secs: i64, nsecs: u32| kernel::fuse_setattr_in {
            valid: kernel::FATTR_MTIME,
            padding: 0,
            fh: 0,
            size: 0,
            lock_owner: 0,
            atime: 0,
            mtime: u64::from_ne_bytes(secs.to_ne_bytes()),
            ctime: 0,
            atimensec: 0,
            mtimensec: nsecs,
            ctimensec: 0,
            mode: 0,
            unused4: 0,
            uid: 0,
            gid: 0,
            unused5: 0,
        };

        let reply = fx.call(FUSE_SETATTR, file, bytes_of(&set_mtime(-86_400, 250)));
        assert_eq!(reply.error(), 0);
        // fuse_attr: mtime at 32, mtimensec at 52
        let mtime = i64::from_ne_bytes(reply.u64_at(16 + 16 + 32).to_ne_bytes());
        assert_eq!(mtime, -86_400);
        assert_eq!(reply.u32_at(16 + 16 + 52), 250);
        assert_eq!(fs::symlink_metadata(fx.user_root.join("old")).unwrap().mtime(), -86_400);

        let reply = fx.call(FUSE_SETATTR, file, bytes_of(&set_mtime(0, 1_000_000_000)));
        assert_eq!(reply.error(), -libc::EINVAL);

        // still serving
        let reply = fx.call(FUSE_SETATTR, file, bytes_of(&set_mtime(1, 0)));
        assert_eq!(reply.error(), 0);
    }

    #[test]
    fn xattrs_are_unsupported() {
        let fx = mounted();
        let arg = kernel::fuse_getxattr_in {
            size: 64,
            padding: 0,
        };
        let reply = fx.call(FUSE_GETXATTR, ROOT, &with_name(&arg, &[b"user.a"]));
        assert_eq!(reply.error(), -libc::ENOTSUP);

        let reply = fx.call(FUSE_REMOVEXATTR, ROOT, &name(b"user.a"));
        assert_eq!(reply.error(), -libc::ENOTSUP);

        let arg = kernel::fuse_getxattr_in {
            size: 0,
            padding: 0,
        };
        let reply = fx.call(FUSE_LISTXATTR, ROOT, bytes_of(&arg));
        assert_eq!(reply.error(), 0);
        assert_eq!(reply.u32_at(16), 0);
    }

    #[test]
    fn lookup_of_missing_and_malformed_names() {
        let fx = mounted();
        assert_eq!(fx.lookup(ROOT, b"absent").error(), -libc::ENOENT);
        assert_eq!(fx.lookup(ROOT, b"..").error(), -libc::EINVAL);
        assert_eq!(fx.lookup(ROOT, &[0xff, 0xfe]).error(), -libc::EINVAL);
        assert_eq!(fx.lookup(999, b"x").error(), -libc::ENOENT);
    }

    #[test]
    fn rename_keeps_node_ids() {
        let fx = mounted();
        fs::create_dir(fx.user_root.join("d")).unwrap();
        fs::write(fx.user_root.join("d/f"), b"x").unwrap();
        let dir = fx.lookup(ROOT, b"d").u64_at(16);
        let file = fx.lookup(dir, b"f").u64_at(16);

        let arg = kernel::fuse_rename_in { newdir: ROOT };
        let reply = fx.call(FUSE_RENAME, ROOT, &with_name(&arg, &[b"d", b"e"]));
        assert_eq!(reply.error(), 0);

        assert_eq!(fx.fs.path(file).unwrap(), VirtualPath::from("/e/f"));
        assert!(fx.user_root.join("e/f").exists());
        assert_eq!(fx.recorder.bodies().last().unwrap(), "rename:/d:/e");
    }

    #[test]
    fn unknown_opcode_is_enosys() {
        let fx = mounted();
        // FUSE_IOCTL
        let reply = fx.call(39, ROOT, &[0; 8]);
        assert_eq!(reply.error(), -libc::ENOSYS);
    }

    #[test]
    fn destroy_announces_once() {
        let fx = mounted();
        block_on(fx.fs.destroy());
        block_on(fx.fs.destroy());
        let bodies = fx.recorder.bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1], "destroy");
        assert_eq!(
            fx.mount.state(),
            crate::lifecycle::MountState::Unmounted
        );
    }
}
