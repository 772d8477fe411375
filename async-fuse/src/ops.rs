//! FUSE operations and their replies

use crate::c_bytes::{self, CBytes, NulError};
use crate::decode::{Decode, DecodeError, Decoder};
use crate::encode::{self, Encode};
#[allow(clippy::wildcard_imports)]
use crate::kernel::*;

use std::convert::TryFrom;
use std::io::IoSlice;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Self is a reply of T
pub trait IsReplyOf<T> {}

/// FUSE operations
#[derive(Debug)]
#[non_exhaustive]
pub enum Operation<'b> {
    Init(OpInit<'b>),
    Destroy(OpDestroy<'b>),
    Lookup(OpLookup<'b>),
    Forget(OpForget<'b>),
    BatchForget(OpBatchForget<'b>),
    GetAttr(OpGetAttr<'b>),
    SetAttr(OpSetAttr<'b>),
    ReadLink(OpReadLink<'b>),
    SymLink(OpSymLink<'b>),
    MkNod(OpMkNod<'b>),
    MkDir(OpMkDir<'b>),
    Unlink(OpUnlink<'b>),
    RmDir(OpRmDir<'b>),
    Rename(OpRename<'b>),
    Link(OpLink<'b>),
    Open(OpOpen<'b>),
    Read(OpRead<'b>),
    Write(OpWrite<'b>),
    StatFs(OpStatFs<'b>),
    Release(OpRelease<'b>),
    FSync(OpFSync<'b>),
    SetXAttr(OpSetXAttr<'b>),
    GetXAttr(OpGetXAttr<'b>),
    ListXAttr(OpListXAttr<'b>),
    RemoveXAttr(OpRemoveXAttr<'b>),
    Flush(OpFlush<'b>),
    OpenDir(OpOpenDir<'b>),
    ReadDir(OpReadDir<'b>),
    ReleaseDir(OpReleaseDir<'b>),
    FSyncDir(OpFSyncDir<'b>),
    Access(OpAccess<'b>),
    Create(OpCreate<'b>),
    Interrupt(OpInterrupt<'b>),
    /// An opcode this crate does not decode
    Unknown(OpUnknown<'b>),
}

impl Operation<'_> {
    /// Returns true if the kernel expects no reply to this operation
    #[must_use]
    #[inline]
    pub const fn is_no_reply(&self) -> bool {
        matches!(
            self,
            Self::Forget(_) | Self::BatchForget(_) | Self::Interrupt(_)
        )
    }
}

/// Converts a `Duration` into the (secs, nsecs) pair used by the kernel
fn split_duration(d: Duration) -> (u64, u32) {
    (d.as_secs(), d.subsec_nanos())
}

/// Converts a `SystemTime` into the (secs, nsecs) pair used by the kernel.
/// The seconds are a signed `time_t` stored in a `u64`.
fn split_time(t: SystemTime) -> (u64, u32) {
    let (secs, nsecs) = match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (i64::try_from(d.as_secs()).unwrap_or(i64::MAX), d.subsec_nanos()),
        Err(before) => {
            let d = before.duration();
            let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX).wrapping_neg();
            match d.subsec_nanos() {
                0 => (secs, 0),
                n => (secs.wrapping_sub(1), 1_000_000_000_u32.wrapping_sub(n)),
            }
        }
    };
    (u64::from_ne_bytes(secs.to_ne_bytes()), nsecs)
}

/// Reads a signed `time_t` the kernel stores in a `u64`
const fn signed_secs(raw: u64) -> i64 {
    i64::from_ne_bytes(raw.to_ne_bytes())
}

// ----------------------------------------------------------------------------
// common replies

#[derive(Debug, Default)]
pub struct ReplyEmpty(());

impl ReplyEmpty {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(())
    }
}

impl Encode for ReplyEmpty {
    #[inline]
    fn collect_bytes<'c, C>(&'c self, container: &mut C)
    where
        C: Extend<IoSlice<'c>>,
    {
        let _ = container;
    }
}

/// Owned reply bytes
#[derive(Debug, Default)]
pub struct ReplyData(Vec<u8>);

impl ReplyData {
    #[inline]
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl Encode for ReplyData {
    #[inline]
    fn collect_bytes<'c, C>(&'c self, container: &mut C)
    where
        C: Extend<IoSlice<'c>>,
    {
        encode::add_bytes(container, &self.0)
    }
}

/// File attributes
#[derive(Debug, Default, Clone, Copy)]
pub struct Attr(pub(crate) fuse_attr);

impl Attr {
    setters!(
        ino: u64,
        size: u64,
        blocks: u64,
        mode: u32,
        nlink: u32,
        uid: u32,
        gid: u32,
        rdev: u32,
        blksize: u32,
    );

    #[inline]
    pub fn atime(&mut self, t: SystemTime) -> &mut Self {
        let (secs, nsecs) = split_time(t);
        self.0.atime = secs;
        self.0.atimensec = nsecs;
        self
    }

    #[inline]
    pub fn mtime(&mut self, t: SystemTime) -> &mut Self {
        let (secs, nsecs) = split_time(t);
        self.0.mtime = secs;
        self.0.mtimensec = nsecs;
        self
    }

    #[inline]
    pub fn ctime(&mut self, t: SystemTime) -> &mut Self {
        let (secs, nsecs) = split_time(t);
        self.0.ctime = secs;
        self.0.ctimensec = nsecs;
        self
    }

    #[must_use]
    #[inline]
    pub const fn get_ino(&self) -> u64 {
        self.0.ino
    }

    #[must_use]
    #[inline]
    pub const fn get_mode(&self) -> u32 {
        self.0.mode
    }
}

/// A looked-up directory entry
#[derive(Debug, Default, Clone, Copy)]
pub struct Entry(fuse_entry_out);

impl Entry {
    setters!(nodeid: u64, generation: u64,);

    #[inline]
    pub fn attr(&mut self, attr: Attr) -> &mut Self {
        self.0.attr = attr.0;
        self
    }

    #[inline]
    pub fn entry_valid(&mut self, timeout: Duration) -> &mut Self {
        let (secs, nsecs) = split_duration(timeout);
        self.0.entry_valid = secs;
        self.0.entry_valid_nsec = nsecs;
        self
    }

    #[inline]
    pub fn attr_valid(&mut self, timeout: Duration) -> &mut Self {
        let (secs, nsecs) = split_duration(timeout);
        self.0.attr_valid = secs;
        self.0.attr_valid_nsec = nsecs;
        self
    }
}

#[derive(Debug, Default)]
pub struct ReplyEntry(fuse_entry_out);

impl ReplyEntry {
    #[inline]
    #[must_use]
    pub const fn new(entry: Entry) -> Self {
        Self(entry.0)
    }
}

derive_Encode!(ReplyEntry);

#[derive(Debug, Default)]
pub struct ReplyAttr(fuse_attr_out);

impl ReplyAttr {
    #[inline]
    #[must_use]
    pub fn new(attr: Attr, timeout: Duration) -> Self {
        let (secs, nsecs) = split_duration(timeout);
        Self(fuse_attr_out {
            attr_valid: secs,
            attr_valid_nsec: nsecs,
            dummy: 0,
            attr: attr.0,
        })
    }
}

derive_Encode!(ReplyAttr);

#[derive(Debug, Default)]
pub struct ReplyOpen(fuse_open_out);

impl ReplyOpen {
    setters!(fh: u64, open_flags: u32,);
}

derive_Encode!(ReplyOpen);

// ----------------------------------------------------------------------------
// header

/// `fuse_in_header`
#[derive(Debug)]
pub struct FuseInHeader<'b>(pub(crate) &'b fuse_in_header);

derive_Decode!(FuseInHeader<'b>);

impl FuseInHeader<'_> {
    getters!(
        len: u32,
        opcode: u32,
        unique: u64,
        nodeid: u64,
        uid: u32,
        gid: u32,
        pid: u32,
    );
}

// ----------------------------------------------------------------------------
// init / destroy

#[derive(Debug)]
pub struct OpInit<'b>(&'b fuse_init_in);

impl<'b> Decode<'b> for OpInit<'b> {
    #[inline]
    fn decode(de: &mut Decoder<'b>) -> Result<Self, DecodeError> {
        let arg = de.fetch()?;
        // newer kernels append fields (flags2, ...) that we do not negotiate
        let _ = de.fetch_all_bytes();
        Ok(Self(arg))
    }
}

impl OpInit<'_> {
    getters!(major: u32, minor: u32, max_readahead: u32, flags: u32,);
}

#[derive(Debug, Default)]
pub struct ReplyInit(fuse_init_out);

derive_Encode!(ReplyInit);

declare_relation!(OpInit<'_> => ReplyInit);

impl ReplyInit {
    setters!(
        major: u32,
        minor: u32,
        max_readahead: u32,
        flags: u32,
        max_background: u16,
        congestion_threshold: u16,
        max_write: u32,
        time_gran: u32,
        max_pages: u16,
    );
}

#[derive(Debug)]
pub struct OpDestroy<'b>(&'b ());

derive_Decode!(@empty OpDestroy<'b>);

declare_relation!(OpDestroy<'_> => ReplyEmpty);

// ----------------------------------------------------------------------------
// lookup / forget / attributes

#[derive(Debug)]
pub struct OpLookup<'b> {
    name: CBytes<'b>,
}

derive_Decode!(@c_bytes OpLookup<'b>, name);

declare_relation!(OpLookup<'_> => ReplyEntry);

impl<'b> OpLookup<'b> {
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }
}

#[derive(Debug)]
pub struct OpForget<'b>(&'b fuse_forget_in);

derive_Decode!(OpForget<'b>);

impl OpForget<'_> {
    getters!(nlookup: u64,);
}

#[derive(Debug)]
pub struct OpBatchForget<'b> {
    nodes: &'b [fuse_forget_one],
}

impl<'b> Decode<'b> for OpBatchForget<'b> {
    #[inline]
    fn decode(de: &mut Decoder<'b>) -> Result<Self, DecodeError> {
        let arg: &fuse_batch_forget_in = de.fetch()?;
        let count = usize::try_from(arg.count).map_err(|_| DecodeError::NumOverflow)?;
        let nodes = de.fetch_slice(count)?;
        Ok(Self { nodes })
    }
}

impl OpBatchForget<'_> {
    /// Returns `(nodeid, nlookup)` pairs
    #[inline]
    pub fn nodes(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.nodes.iter().map(|n| (n.nodeid, n.nlookup))
    }
}

#[derive(Debug)]
pub struct OpGetAttr<'b>(&'b fuse_getattr_in);

derive_Decode!(OpGetAttr<'b>);

declare_relation!(OpGetAttr<'_> => ReplyAttr);

impl OpGetAttr<'_> {
    /// The file handle, if the kernel sent one
    #[must_use]
    #[inline]
    pub const fn fh(&self) -> Option<u64> {
        if self.0.getattr_flags & FUSE_GETATTR_FH != 0 {
            Some(self.0.fh)
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct OpSetAttr<'b>(&'b fuse_setattr_in);

derive_Decode!(OpSetAttr<'b>);

declare_relation!(OpSetAttr<'_> => ReplyAttr);

/// A time to set, as sent with `FATTR_ATIME`/`FATTR_MTIME`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTime {
    /// The current time of the server
    Now,
    /// A point in time relative to the epoch; `secs` is negative before it
    At { secs: i64, nsecs: u32 },
}

impl OpSetAttr<'_> {
    const fn field(&self, bit: u32) -> bool {
        self.0.valid & bit != 0
    }

    #[must_use]
    #[inline]
    pub const fn mode(&self) -> Option<u32> {
        if self.field(FATTR_MODE) {
            Some(self.0.mode)
        } else {
            None
        }
    }

    #[must_use]
    #[inline]
    pub const fn uid(&self) -> Option<u32> {
        if self.field(FATTR_UID) {
            Some(self.0.uid)
        } else {
            None
        }
    }

    #[must_use]
    #[inline]
    pub const fn gid(&self) -> Option<u32> {
        if self.field(FATTR_GID) {
            Some(self.0.gid)
        } else {
            None
        }
    }

    #[must_use]
    #[inline]
    pub const fn size(&self) -> Option<u64> {
        if self.field(FATTR_SIZE) {
            Some(self.0.size)
        } else {
            None
        }
    }

    #[must_use]
    #[inline]
    pub const fn fh(&self) -> Option<u64> {
        if self.field(FATTR_FH) {
            Some(self.0.fh)
        } else {
            None
        }
    }

    #[must_use]
    #[inline]
    pub fn atime(&self) -> Option<SetTime> {
        if self.field(FATTR_ATIME_NOW) {
            return Some(SetTime::Now);
        }
        if self.field(FATTR_ATIME) {
            return Some(SetTime::At {
                secs: signed_secs(self.0.atime),
                nsecs: self.0.atimensec,
            });
        }
        None
    }

    #[must_use]
    #[inline]
    pub fn mtime(&self) -> Option<SetTime> {
        if self.field(FATTR_MTIME_NOW) {
            return Some(SetTime::Now);
        }
        if self.field(FATTR_MTIME) {
            return Some(SetTime::At {
                secs: signed_secs(self.0.mtime),
                nsecs: self.0.mtimensec,
            });
        }
        None
    }
}

// ----------------------------------------------------------------------------
// links

#[derive(Debug)]
pub struct OpReadLink<'b>(&'b ());

derive_Decode!(@empty OpReadLink<'b>);

/// The target of a symbolic link, without NUL
#[derive(Debug)]
pub struct ReplyReadLink(Vec<u8>);

impl ReplyReadLink {
    /// # Errors
    /// Returns [`NulError`] if the link contains a NUL byte
    #[inline]
    pub fn new(link: Vec<u8>) -> Result<Self, NulError> {
        c_bytes::check_bytes(&link)?;
        Ok(Self(link))
    }
}

impl Encode for ReplyReadLink {
    #[inline]
    fn collect_bytes<'c, C>(&'c self, container: &mut C)
    where
        C: Extend<IoSlice<'c>>,
    {
        encode::add_bytes(container, &self.0);
    }
}

declare_relation!(OpReadLink<'_> => ReplyReadLink);

#[derive(Debug)]
pub struct OpSymLink<'b> {
    name: CBytes<'b>,
    link: CBytes<'b>,
}

derive_Decode!(@c_bytes OpSymLink<'b>, name, link);

declare_relation!(OpSymLink<'_> => ReplyEntry);

impl<'b> OpSymLink<'b> {
    /// Name of the new link inside the parent directory
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }

    /// Contents of the new link
    #[must_use]
    #[inline]
    pub fn link(&self) -> &'b [u8] {
        self.link.as_bytes()
    }
}

#[derive(Debug)]
pub struct OpLink<'b> {
    arg: &'b fuse_link_in,
    name: CBytes<'b>,
}

derive_Decode!(@header OpLink<'b>, arg, name);

declare_relation!(OpLink<'_> => ReplyEntry);

impl<'b> OpLink<'b> {
    /// The node being linked to
    #[must_use]
    #[inline]
    pub const fn oldnodeid(&self) -> u64 {
        self.arg.oldnodeid
    }

    /// Name of the new link inside the parent directory
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }
}

// ----------------------------------------------------------------------------
// nodes

#[derive(Debug)]
pub struct OpMkNod<'b> {
    arg: &'b fuse_mknod_in,
    name: CBytes<'b>,
}

derive_Decode!(@header OpMkNod<'b>, arg, name);

declare_relation!(OpMkNod<'_> => ReplyEntry);

impl<'b> OpMkNod<'b> {
    #[must_use]
    #[inline]
    pub const fn mode(&self) -> u32 {
        self.arg.mode
    }

    #[must_use]
    #[inline]
    pub const fn rdev(&self) -> u32 {
        self.arg.rdev
    }

    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }
}

#[derive(Debug)]
pub struct OpMkDir<'b> {
    arg: &'b fuse_mkdir_in,
    name: CBytes<'b>,
}

derive_Decode!(@header OpMkDir<'b>, arg, name);

declare_relation!(OpMkDir<'_> => ReplyEntry);

impl<'b> OpMkDir<'b> {
    #[must_use]
    #[inline]
    pub const fn mode(&self) -> u32 {
        self.arg.mode
    }

    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }
}

#[derive(Debug)]
pub struct OpUnlink<'b> {
    name: CBytes<'b>,
}

derive_Decode!(@c_bytes OpUnlink<'b>, name);

declare_relation!(OpUnlink<'_> => ReplyEmpty);

impl<'b> OpUnlink<'b> {
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }
}

#[derive(Debug)]
pub struct OpRmDir<'b> {
    name: CBytes<'b>,
}

derive_Decode!(@c_bytes OpRmDir<'b>, name);

declare_relation!(OpRmDir<'_> => ReplyEmpty);

impl<'b> OpRmDir<'b> {
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }
}

#[derive(Debug)]
pub struct OpRename<'b> {
    arg: &'b fuse_rename_in,
    name: CBytes<'b>,
    newname: CBytes<'b>,
}

derive_Decode!(@header OpRename<'b>, arg, name, newname);

declare_relation!(OpRename<'_> => ReplyEmpty);

impl<'b> OpRename<'b> {
    /// The directory the entry moves into
    #[must_use]
    #[inline]
    pub const fn newdir(&self) -> u64 {
        self.arg.newdir
    }

    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }

    #[must_use]
    #[inline]
    pub fn newname(&self) -> &'b [u8] {
        self.newname.as_bytes()
    }
}

// ----------------------------------------------------------------------------
// files

#[derive(Debug)]
pub struct OpOpen<'b>(&'b fuse_open_in);

derive_Decode!(OpOpen<'b>);

declare_relation!(OpOpen<'_> => ReplyOpen);

impl OpOpen<'_> {
    getters!(flags: u32,);
}

#[derive(Debug)]
pub struct OpRead<'b>(&'b fuse_read_in);

derive_Decode!(OpRead<'b>);

declare_relation!(OpRead<'_> => ReplyData);

impl OpRead<'_> {
    getters!(fh: u64, offset: u64, size: u32,);
}

#[derive(Debug)]
pub struct OpWrite<'b> {
    arg: &'b fuse_write_in,
    data: &'b [u8],
}

impl<'b> Decode<'b> for OpWrite<'b> {
    #[inline]
    fn decode(de: &mut Decoder<'b>) -> Result<Self, DecodeError> {
        let arg: &fuse_write_in = de.fetch()?;
        let size = usize::try_from(arg.size).map_err(|_| DecodeError::NumOverflow)?;
        let data = de.fetch_bytes(size)?;
        Ok(Self { arg, data })
    }
}

#[derive(Debug, Default)]
pub struct ReplyWrite(fuse_write_out);

derive_Encode!(ReplyWrite);

declare_relation!(OpWrite<'_> => ReplyWrite);

impl ReplyWrite {
    setters!(size: u32,);
}

impl<'b> OpWrite<'b> {
    #[must_use]
    #[inline]
    pub const fn fh(&self) -> u64 {
        self.arg.fh
    }

    #[must_use]
    #[inline]
    pub const fn offset(&self) -> u64 {
        self.arg.offset
    }

    #[must_use]
    #[inline]
    pub const fn data(&self) -> &'b [u8] {
        self.data
    }
}

#[derive(Debug)]
pub struct OpFlush<'b>(&'b fuse_flush_in);

derive_Decode!(OpFlush<'b>);

declare_relation!(OpFlush<'_> => ReplyEmpty);

impl OpFlush<'_> {
    getters!(fh: u64,);
}

#[derive(Debug)]
pub struct OpRelease<'b>(&'b fuse_release_in);

derive_Decode!(OpRelease<'b>);

declare_relation!(OpRelease<'_> => ReplyEmpty);

impl OpRelease<'_> {
    getters!(fh: u64, flags: u32,);
}

#[derive(Debug)]
pub struct OpFSync<'b>(&'b fuse_fsync_in);

derive_Decode!(OpFSync<'b>);

declare_relation!(OpFSync<'_> => ReplyEmpty);

impl OpFSync<'_> {
    getters!(fh: u64,);

    #[must_use]
    #[inline]
    pub const fn datasync(&self) -> bool {
        self.0.fsync_flags & FUSE_FSYNC_FDATASYNC != 0
    }
}

#[derive(Debug)]
pub struct OpCreate<'b> {
    arg: &'b fuse_create_in,
    name: CBytes<'b>,
}

derive_Decode!(@header OpCreate<'b>, arg, name);

/// `fuse_entry_out` followed by `fuse_open_out`
#[derive(Debug, Default)]
pub struct ReplyCreate {
    entry: fuse_entry_out,
    open: fuse_open_out,
}

impl ReplyCreate {
    #[inline]
    #[must_use]
    pub fn new(entry: Entry, fh: u64) -> Self {
        Self {
            entry: entry.0,
            open: fuse_open_out {
                fh,
                open_flags: 0,
                padding: 0,
            },
        }
    }
}

impl Encode for ReplyCreate {
    #[inline]
    fn collect_bytes<'c, C>(&'c self, container: &mut C)
    where
        C: Extend<IoSlice<'c>>,
    {
        encode::add_bytes(container, encode::as_abi_bytes(&self.entry));
        encode::add_bytes(container, encode::as_abi_bytes(&self.open));
    }
}

declare_relation!(OpCreate<'_> => ReplyCreate);

impl<'b> OpCreate<'b> {
    #[must_use]
    #[inline]
    pub const fn flags(&self) -> u32 {
        self.arg.flags
    }

    #[must_use]
    #[inline]
    pub const fn mode(&self) -> u32 {
        self.arg.mode
    }

    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }
}

#[derive(Debug)]
pub struct OpAccess<'b>(&'b fuse_access_in);

derive_Decode!(OpAccess<'b>);

declare_relation!(OpAccess<'_> => ReplyEmpty);

impl OpAccess<'_> {
    getters!(mask: u32,);
}

// ----------------------------------------------------------------------------
// statfs

#[derive(Debug)]
pub struct OpStatFs<'b>(&'b ());

derive_Decode!(@empty OpStatFs<'b>);

#[derive(Debug, Default)]
pub struct ReplyStatFs(fuse_statfs_out);

derive_Encode!(ReplyStatFs);

declare_relation!(OpStatFs<'_> => ReplyStatFs);

impl ReplyStatFs {
    #[inline]
    pub fn blocks(&mut self, blocks: u64) -> &mut Self {
        self.0.st.blocks = blocks;
        self
    }

    #[inline]
    pub fn bfree(&mut self, bfree: u64) -> &mut Self {
        self.0.st.bfree = bfree;
        self
    }

    #[inline]
    pub fn bavail(&mut self, bavail: u64) -> &mut Self {
        self.0.st.bavail = bavail;
        self
    }

    #[inline]
    pub fn files(&mut self, files: u64) -> &mut Self {
        self.0.st.files = files;
        self
    }

    #[inline]
    pub fn ffree(&mut self, ffree: u64) -> &mut Self {
        self.0.st.ffree = ffree;
        self
    }

    #[inline]
    pub fn bsize(&mut self, bsize: u32) -> &mut Self {
        self.0.st.bsize = bsize;
        self
    }

    #[inline]
    pub fn namelen(&mut self, namelen: u32) -> &mut Self {
        self.0.st.namelen = namelen;
        self
    }

    #[inline]
    pub fn frsize(&mut self, frsize: u32) -> &mut Self {
        self.0.st.frsize = frsize;
        self
    }
}

// ----------------------------------------------------------------------------
// xattr

#[derive(Debug)]
pub struct OpSetXAttr<'b> {
    arg: &'b fuse_setxattr_in,
    name: CBytes<'b>,
    value: &'b [u8],
}

impl<'b> Decode<'b> for OpSetXAttr<'b> {
    #[inline]
    fn decode(de: &mut Decoder<'b>) -> Result<Self, DecodeError> {
        let arg: &fuse_setxattr_in = de.fetch()?;
        let name = de.fetch_c_bytes()?;
        let size = usize::try_from(arg.size).map_err(|_| DecodeError::NumOverflow)?;
        let value = de.fetch_bytes(size)?;
        Ok(Self { arg, name, value })
    }
}

declare_relation!(OpSetXAttr<'_> => ReplyEmpty);

impl<'b> OpSetXAttr<'b> {
    #[must_use]
    #[inline]
    pub const fn flags(&self) -> u32 {
        self.arg.flags
    }

    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }

    #[must_use]
    #[inline]
    pub const fn value(&self) -> &'b [u8] {
        self.value
    }
}

#[derive(Debug)]
pub struct OpGetXAttr<'b> {
    arg: &'b fuse_getxattr_in,
    name: CBytes<'b>,
}

derive_Decode!(@header OpGetXAttr<'b>, arg, name);

declare_relation!(OpGetXAttr<'_> => ReplyXAttrSize);
declare_relation!(OpGetXAttr<'_> => ReplyData);

impl<'b> OpGetXAttr<'b> {
    #[must_use]
    #[inline]
    pub const fn size(&self) -> u32 {
        self.arg.size
    }

    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }
}

#[derive(Debug)]
pub struct OpListXAttr<'b>(&'b fuse_getxattr_in);

derive_Decode!(OpListXAttr<'b>);

declare_relation!(OpListXAttr<'_> => ReplyXAttrSize);
declare_relation!(OpListXAttr<'_> => ReplyData);

impl OpListXAttr<'_> {
    getters!(size: u32,);
}

/// The size of an attribute value or list, sent when the request size is 0
#[derive(Debug, Default)]
pub struct ReplyXAttrSize(fuse_getxattr_out);

derive_Encode!(ReplyXAttrSize);

impl ReplyXAttrSize {
    setters!(size: u32,);
}

#[derive(Debug)]
pub struct OpRemoveXAttr<'b> {
    name: CBytes<'b>,
}

derive_Decode!(@c_bytes OpRemoveXAttr<'b>, name);

declare_relation!(OpRemoveXAttr<'_> => ReplyEmpty);

impl<'b> OpRemoveXAttr<'b> {
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'b [u8] {
        self.name.as_bytes()
    }
}

// ----------------------------------------------------------------------------
// directories

#[derive(Debug)]
pub struct OpOpenDir<'b>(&'b fuse_open_in);

derive_Decode!(OpOpenDir<'b>);

declare_relation!(OpOpenDir<'_> => ReplyOpen);

impl OpOpenDir<'_> {
    getters!(flags: u32,);
}

#[derive(Debug)]
pub struct OpReadDir<'b>(&'b fuse_read_in);

derive_Decode!(OpReadDir<'b>);

declare_relation!(OpReadDir<'_> => ReplyDirectory);

impl OpReadDir<'_> {
    getters!(fh: u64, offset: u64, size: u32,);
}

#[derive(Debug)]
pub struct OpReleaseDir<'b>(&'b fuse_release_in);

derive_Decode!(OpReleaseDir<'b>);

declare_relation!(OpReleaseDir<'_> => ReplyEmpty);

impl OpReleaseDir<'_> {
    getters!(fh: u64,);
}

#[derive(Debug)]
pub struct OpFSyncDir<'b>(&'b fuse_fsync_in);

derive_Decode!(OpFSyncDir<'b>);

declare_relation!(OpFSyncDir<'_> => ReplyEmpty);

impl OpFSyncDir<'_> {
    getters!(fh: u64,);
}

/// A buffer of `fuse_dirent` records, bounded by the size the kernel asked for
#[derive(Debug)]
pub struct ReplyDirectory {
    /// encoded entries
    buf: Vec<u8>,
    /// the size limit of the reply
    max_size: usize,
}

impl ReplyDirectory {
    #[inline]
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_size.min(64 * 1024)),
            max_size,
        }
    }

    /// Appends an entry. `off` is the offset of the *next* entry.
    /// Returns false (and appends nothing) when the entry does not fit.
    #[inline]
    pub fn add_entry(&mut self, ino: u64, off: u64, typ: u32, name: &[u8]) -> bool {
        let head_len = std::mem::size_of::<fuse_dirent_head>();
        let entry_len = head_len.wrapping_add(name.len());
        let padded_len = entry_len
            .wrapping_add(FUSE_DIRENT_ALIGN.wrapping_sub(1))
            & !FUSE_DIRENT_ALIGN.wrapping_sub(1);

        if self.buf.len().wrapping_add(padded_len) > self.max_size {
            return false;
        }

        let namelen = match u32::try_from(name.len()) {
            Ok(n) => n,
            Err(_) => return false,
        };

        let head = fuse_dirent_head {
            ino,
            off,
            namelen,
            r#type: typ,
        };
        self.buf.extend_from_slice(encode::as_abi_bytes(&head));
        self.buf.extend_from_slice(name);
        self.buf.resize(
            self.buf.len().wrapping_add(padded_len.wrapping_sub(entry_len)),
            0,
        );
        true
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Encode for ReplyDirectory {
    #[inline]
    fn collect_bytes<'c, C>(&'c self, container: &mut C)
    where
        C: Extend<IoSlice<'c>>,
    {
        encode::add_bytes(container, &self.buf)
    }
}

// ----------------------------------------------------------------------------
// misc

#[derive(Debug)]
pub struct OpInterrupt<'b>(&'b fuse_interrupt_in);

derive_Decode!(OpInterrupt<'b>);

impl OpInterrupt<'_> {
    getters!(unique: u64,);
}

#[derive(Debug)]
pub struct OpUnknown<'b> {
    opcode: u32,
    body: &'b [u8],
}

impl<'b> OpUnknown<'b> {
    pub(crate) fn new(opcode: u32, body: &'b [u8]) -> Self {
        Self { opcode, body }
    }

    #[must_use]
    #[inline]
    pub const fn opcode(&self) -> u32 {
        self.opcode
    }

    #[must_use]
    #[inline]
    pub const fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// Converts a `d_type` into the value carried by `fuse_dirent.type`
#[must_use]
#[inline]
pub fn dirent_type(d_type: u8) -> u32 {
    u32::from(d_type)
}

/// Reads the `d_type` from an `st_mode`
#[must_use]
#[inline]
pub const fn mode_to_dirent_type(mode: u32) -> u32 {
    (mode & libc::S_IFMT) >> 12
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_padding() {
        let mut dir = ReplyDirectory::new(4096);
        assert!(dir.add_entry(1, 1, u32::from(libc::DT_DIR), b"."));
        assert!(dir.add_entry(1, 2, u32::from(libc::DT_DIR), b".."));
        assert!(dir.add_entry(7, 3, u32::from(libc::DT_REG), b"notes.txt"));

        // 24 + 1 -> 32, 24 + 2 -> 32, 24 + 9 -> 40
        assert_eq!(dir.buf.len(), 32 + 32 + 40);
        assert_eq!(dir.buf.len() % FUSE_DIRENT_ALIGN, 0);

        let name_at = 32 + 32 + 24;
        assert_eq!(&dir.buf[name_at..name_at + 9], b"notes.txt");
        assert!(dir.buf[name_at + 9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn directory_respects_size() {
        let mut dir = ReplyDirectory::new(40);
        assert!(dir.add_entry(1, 1, 0, b"a"));
        assert!(!dir.add_entry(1, 2, 0, b"b"));
        assert_eq!(dir.buf.len(), 32);
    }

    #[test]
    fn dirent_type_from_mode() {
        assert_eq!(
            mode_to_dirent_type(libc::S_IFDIR | 0o755),
            u32::from(libc::DT_DIR)
        );
        assert_eq!(
            mode_to_dirent_type(libc::S_IFLNK | 0o777),
            u32::from(libc::DT_LNK)
        );
        assert_eq!(dirent_type(libc::DT_REG), u32::from(libc::DT_REG));
    }

    #[test]
    fn times_before_the_epoch_stay_signed() {
        let t = UNIX_EPOCH - Duration::new(86_400, 0);
        let (secs, nsecs) = split_time(t);
        assert_eq!(signed_secs(secs), -86_400);
        assert_eq!(nsecs, 0);

        let t = UNIX_EPOCH - Duration::from_millis(1500);
        let (secs, nsecs) = split_time(t);
        assert_eq!(signed_secs(secs), -2);
        assert_eq!(nsecs, 500_000_000);

        let (secs, nsecs) = split_time(UNIX_EPOCH + Duration::new(7, 3));
        assert_eq!((secs, nsecs), (7, 3));
    }

    #[test]
    fn setattr_reads_negative_mtime() {
        let arg = fuse_setattr_in {
            valid: FATTR_MTIME,
            padding: 0,
            fh: 0,
            size: 0,
            lock_owner: 0,
            atime: 0,
            mtime: u64::from_ne_bytes((-86_400_i64).to_ne_bytes()),
            ctime: 0,
            atimensec: 0,
            mtimensec: 5,
            ctimensec: 0,
            mode: 0,
            unused4: 0,
            uid: 0,
            gid: 0,
            unused5: 0,
        };
        let op = OpSetAttr(&arg);
        assert_eq!(op.atime(), None);
        assert_eq!(
            op.mtime(),
            Some(SetTime::At {
                secs: -86_400,
                nsecs: 5
            })
        );
    }
}
