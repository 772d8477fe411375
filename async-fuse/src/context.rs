//! The context of a FUSE request

use crate::decode::{Decode, DecodeError, Decoder};
use crate::encode::{self, Encode};
use crate::errno::Errno;
use crate::kernel;
use crate::ops::{FuseInHeader, IsReplyOf, OpUnknown, Operation};
use crate::write::FuseWrite;

#[allow(clippy::wildcard_imports)]
use crate::kernel::fuse_opcode::*;

use std::convert::TryFrom;
use std::fmt::{self, Debug};
use std::io::{self, IoSlice};
use std::mem;
use std::pin::Pin;

use futures::future::poll_fn;
use smallvec::SmallVec;

/// The context of a FUSE request
pub struct FuseContext<'b> {
    /// a writer of FUSE connection
    writer: Pin<&'b mut (dyn FuseWrite + Send)>,
    /// request header
    header: FuseInHeader<'b>,
    /// protocol version
    proto: ProtocolVersion,
}

/// protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// major version number
    pub major: u32,
    /// minor version number
    pub minor: u32,
}

impl Debug for FuseContext<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuseContext")
            .field("writer", &"<Pin<&'b mut (dyn FuseWrite + Send)>>")
            .field("header", &self.header)
            .field("proto", &self.proto)
            .finish()
    }
}

/// decode
fn decode<'b, T: Decode<'b>>(de: &mut Decoder<'b>) -> Result<T, DecodeError> {
    T::decode(de)
}

/// parse
fn parse(buf: &'_ [u8]) -> Result<(FuseInHeader<'_>, Operation<'_>), DecodeError> {
    let mut de = Decoder::new(buf);
    de.all_consuming(|de| {
        let header: FuseInHeader<'_> = decode(de)?;
        let opcode = header.opcode();

        if usize::try_from(header.len()) != Ok(buf.len()) {
            return Err(DecodeError::InvalidValue);
        }

        let op = match opcode {
            FUSE_INIT => Operation::Init(decode(de)?),
            FUSE_DESTROY => Operation::Destroy(decode(de)?),
            FUSE_LOOKUP => Operation::Lookup(decode(de)?),
            FUSE_FORGET => Operation::Forget(decode(de)?),
            FUSE_BATCH_FORGET => Operation::BatchForget(decode(de)?),
            FUSE_GETATTR => Operation::GetAttr(decode(de)?),
            FUSE_SETATTR => Operation::SetAttr(decode(de)?),
            FUSE_READLINK => Operation::ReadLink(decode(de)?),
            FUSE_SYMLINK => Operation::SymLink(decode(de)?),
            FUSE_MKNOD => Operation::MkNod(decode(de)?),
            FUSE_MKDIR => Operation::MkDir(decode(de)?),
            FUSE_UNLINK => Operation::Unlink(decode(de)?),
            FUSE_RMDIR => Operation::RmDir(decode(de)?),
            FUSE_RENAME => Operation::Rename(decode(de)?),
            FUSE_LINK => Operation::Link(decode(de)?),
            FUSE_OPEN => Operation::Open(decode(de)?),
            FUSE_READ => Operation::Read(decode(de)?),
            FUSE_WRITE => Operation::Write(decode(de)?),
            FUSE_STATFS => Operation::StatFs(decode(de)?),
            FUSE_RELEASE => Operation::Release(decode(de)?),
            FUSE_FSYNC => Operation::FSync(decode(de)?),
            FUSE_SETXATTR => Operation::SetXAttr(decode(de)?),
            FUSE_GETXATTR => Operation::GetXAttr(decode(de)?),
            FUSE_LISTXATTR => Operation::ListXAttr(decode(de)?),
            FUSE_REMOVEXATTR => Operation::RemoveXAttr(decode(de)?),
            FUSE_FLUSH => Operation::Flush(decode(de)?),
            FUSE_OPENDIR => Operation::OpenDir(decode(de)?),
            FUSE_READDIR => Operation::ReadDir(decode(de)?),
            FUSE_RELEASEDIR => Operation::ReleaseDir(decode(de)?),
            FUSE_FSYNCDIR => Operation::FSyncDir(decode(de)?),
            FUSE_ACCESS => Operation::Access(decode(de)?),
            FUSE_CREATE => Operation::Create(decode(de)?),
            FUSE_INTERRUPT => Operation::Interrupt(decode(de)?),
            _ => {
                tracing::debug!(%opcode, "unimplemented operation");
                Operation::Unknown(OpUnknown::new(opcode, de.fetch_all_bytes()))
            }
        };
        Ok((header, op))
    })
}

impl<'b> FuseContext<'b> {
    /// Creates a [`FuseContext`]
    /// # Errors
    /// Returns `DecodeError`
    #[inline]
    pub fn new(
        buf: &'b [u8],
        writer: Pin<&'b mut (dyn FuseWrite + Send)>,
        proto: ProtocolVersion,
    ) -> Result<(Self, Operation<'b>), DecodeError> {
        let (header, op) = parse(buf)?;
        let cx = Self {
            writer,
            header,
            proto,
        };
        Ok((cx, op))
    }

    /// Gets the request header
    #[must_use]
    #[inline]
    pub const fn header(&self) -> &FuseInHeader<'b> {
        &self.header
    }

    /// Gets the negotiated protocol version
    #[must_use]
    #[inline]
    pub const fn proto(&self) -> ProtocolVersion {
        self.proto
    }

    /// Sends reply
    /// # Errors
    /// Returns [`io::Error`] when failed to write bytes to the connection
    #[allow(clippy::future_not_send)]
    #[inline]
    pub async fn reply<T, R>(mut self, _: &T, reply: R) -> io::Result<()>
    where
        R: IsReplyOf<T> + Encode,
    {
        let header;
        let header_len = mem::size_of::<kernel::fuse_out_header>();

        let mut bufs: SmallVec<[IoSlice<'_>; 8]> = SmallVec::new();

        bufs.push(IoSlice::new(&[]));

        reply.collect_bytes(&mut bufs);

        let body_len: usize = bufs.iter().map(|b| b.len()).sum();

        let total_len: u32 = header_len
            .checked_add(body_len)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                let msg = format!("reply too large: body_len = {}", body_len);
                io::Error::new(io::ErrorKind::InvalidData, msg)
            })?;

        header = kernel::fuse_out_header {
            len: total_len,
            unique: self.header.unique(),
            error: 0,
        };
        bufs[0] = IoSlice::new(encode::as_abi_bytes(&header));

        poll_fn(|cx| self.writer.as_mut().poll_reply(cx, &*bufs)).await
    }

    /// Sends errno
    /// # Errors
    /// Returns [`io::Error`] when failed to write bytes to the connection
    #[inline]
    pub async fn reply_err(mut self, errno: Errno) -> io::Result<()> {
        let header_len: usize = mem::size_of::<kernel::fuse_out_header>();

        #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
        // the size of a single kernel struct can not overflow u32
        let len: u32 = header_len as u32;

        let header = kernel::fuse_out_header {
            len,
            unique: self.header.unique(),
            error: errno.as_raw().wrapping_neg(),
        };
        let bufs = [IoSlice::new(encode::as_abi_bytes(&header))];
        poll_fn(|cx| self.writer.as_mut().poll_reply(cx, &bufs)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ops::{ReplyEmpty, ReplyEntry};

    use std::task::{Context, Poll};

    use aligned_bytes::AlignedBytes;
    use futures::executor::block_on;

    /// Collects every reply into one byte vector
    #[derive(Debug, Default)]
    pub(crate) struct VecWriter(pub(crate) Vec<u8>);

    impl FuseWrite for VecWriter {
        fn poll_reply(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            bufs: &[IoSlice<'_>],
        ) -> Poll<io::Result<()>> {
            for b in bufs {
                self.0.extend_from_slice(b);
            }
            Poll::Ready(Ok(()))
        }
    }

    /// Builds an aligned request buffer from a header and a body
    pub(crate) fn request(opcode: u32, unique: u64, nodeid: u64, body: &[u8]) -> AlignedBytes {
        let header_len = mem::size_of::<kernel::fuse_in_header>();
        let total = header_len + body.len();
        let header = kernel::fuse_in_header {
            len: u32::try_from(total).unwrap(),
            opcode,
            unique,
            nodeid,
            uid: 1000,
            gid: 1000,
            pid: 42,
            padding: 0,
        };
        let mut buf = AlignedBytes::new_zeroed(total, 8);
        buf[..header_len].copy_from_slice(encode::as_abi_bytes(&header));
        buf[header_len..].copy_from_slice(body);
        buf
    }

    const PROTO: ProtocolVersion = ProtocolVersion {
        major: kernel::FUSE_KERNEL_VERSION,
        minor: kernel::FUSE_KERNEL_MINOR_VERSION,
    };

    #[test]
    fn parse_mkdir() {
        let mkdir_in = kernel::fuse_mkdir_in {
            mode: 0o755,
            umask: 0o022,
        };
        let mut body = encode::as_abi_bytes(&mkdir_in).to_vec();
        body.extend_from_slice(b"docs\0");
        let buf = request(FUSE_MKDIR, 7, 1, &body);

        let mut writer = VecWriter::default();
        let (cx, op) = FuseContext::new(&buf, Pin::<&mut VecWriter>::new(&mut writer), PROTO).unwrap();
        assert_eq!(cx.header().nodeid(), 1);
        assert_eq!(cx.header().uid(), 1000);
        match op {
            Operation::MkDir(op) => {
                assert_eq!(op.name(), b"docs");
                assert_eq!(op.mode(), 0o755);
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn parse_rename_two_names() {
        let rename_in = kernel::fuse_rename_in { newdir: 9 };
        let mut body = encode::as_abi_bytes(&rename_in).to_vec();
        body.extend_from_slice(b"old\0new\0");
        let buf = request(FUSE_RENAME, 8, 3, &body);

        let mut writer = VecWriter::default();
        let (_, op) = FuseContext::new(&buf, Pin::<&mut VecWriter>::new(&mut writer), PROTO).unwrap();
        match op {
            Operation::Rename(op) => {
                assert_eq!(op.newdir(), 9);
                assert_eq!(op.name(), b"old");
                assert_eq!(op.newname(), b"new");
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn parse_unknown_opcode() {
        let buf = request(4000, 9, 1, &[0; 8]);
        let mut writer = VecWriter::default();
        let (_, op) = FuseContext::new(&buf, Pin::<&mut VecWriter>::new(&mut writer), PROTO).unwrap();
        match op {
            Operation::Unknown(op) => {
                assert_eq!(op.opcode(), 4000);
                assert_eq!(op.body_len(), 8);
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn parse_rejects_trailing_bytes() {
        let buf = request(FUSE_STATFS, 1, 1, &[0; 8]);
        let mut writer = VecWriter::default();
        let err = FuseContext::new(&buf, Pin::<&mut VecWriter>::new(&mut writer), PROTO).unwrap_err();
        assert_eq!(err, DecodeError::TooMuchData);
    }

    #[test]
    fn reply_frames() {
        let buf = request(FUSE_LOOKUP, 77, 1, b"a\0");
        let mut writer = VecWriter::default();
        {
            let (cx, op) = FuseContext::new(&buf, Pin::<&mut VecWriter>::new(&mut writer), PROTO).unwrap();
            let op = match op {
                Operation::Lookup(op) => op,
                other => panic!("unexpected operation: {:?}", other),
            };
            block_on(cx.reply(&op, ReplyEntry::default())).unwrap();
        }
        let out_len = mem::size_of::<kernel::fuse_out_header>();
        let entry_len = mem::size_of::<kernel::fuse_entry_out>();
        assert_eq!(writer.0.len(), out_len + entry_len);
        assert_eq!(&writer.0[..4], &u32::try_from(out_len + entry_len).unwrap().to_ne_bytes());
        assert_eq!(&writer.0[8..16], &77_u64.to_ne_bytes());

        let buf = request(FUSE_DESTROY, 78, 1, &[]);
        let mut writer = VecWriter::default();
        {
            let (cx, op) = FuseContext::new(&buf, Pin::<&mut VecWriter>::new(&mut writer), PROTO).unwrap();
            let op = match op {
                Operation::Destroy(op) => op,
                other => panic!("unexpected operation: {:?}", other),
            };
            block_on(cx.reply(&op, ReplyEmpty::new())).unwrap();
        }
        assert_eq!(writer.0.len(), out_len);
    }

    #[test]
    fn reply_errno() {
        let buf = request(FUSE_GETXATTR, 5, 1, &{
            let mut body = encode::as_abi_bytes(&kernel::fuse_getxattr_in {
                size: 0,
                padding: 0,
            })
            .to_vec();
            body.extend_from_slice(b"user.x\0");
            body
        });
        let mut writer = VecWriter::default();
        {
            let (cx, _) = FuseContext::new(&buf, Pin::<&mut VecWriter>::new(&mut writer), PROTO).unwrap();
            block_on(cx.reply_err(Errno::ENOTSUP)).unwrap();
        }
        assert_eq!(writer.0.len(), 16);
        assert_eq!(&writer.0[4..8], &(-libc::ENOTSUP).to_ne_bytes());
    }
}
