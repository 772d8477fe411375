//! FUSE file system server

use crate::conn::{connect, ConnReader, ConnWriter};
use crate::context::{FuseContext, ProtocolVersion};
use crate::fs::FileSystem;
use crate::kernel;
use crate::mount::{mount, umount, MountOptions};
use crate::ops::{self, Operation};

use std::io;
use std::path::PathBuf;

use aligned_bytes::AlignedBytes;
use blocking::unblock;
use futures::pin_mut;
use tracing::{debug, error, info};

/// page size
const PAGE_SIZE: usize = 4096;

/// max background
const MAX_BACKGROUND: u16 = 10;

/// max write size
const MAX_WRITE_SIZE: u32 = 128 * 1024;

/// request buffer size
const BUFFER_SIZE: usize = 128 * 1024 + PAGE_SIZE;

/// The oldest minor version whose structs match ours
const MIN_KERNEL_MINOR_VERSION: u32 = 23;

/// The builder of [`Server`]
#[derive(Debug)]
pub struct ServerBuilder<F> {
    /// mount point
    mount_point: PathBuf,
    /// mount options
    options: MountOptions,
    /// file system
    fs: F,
}

impl<F> ServerBuilder<F>
where
    F: FileSystem + Send + 'static,
{
    /// Starts to build a [`Server`]
    #[inline]
    pub fn new(mount_point: PathBuf, fs: F) -> Self {
        Self {
            mount_point,
            options: MountOptions::default(),
            fs,
        }
    }

    /// Sets the mount options
    #[inline]
    #[must_use]
    pub fn options(mut self, options: MountOptions) -> Self {
        self.options = options;
        self
    }

    /// Initializes a FUSE connection and returns a [`Server`]
    /// # Errors
    /// Returns [`io::Error`]
    #[inline]
    pub async fn initialize(self) -> io::Result<Server<F>> {
        let (reader, writer) = {
            debug!("connecting to /dev/fuse");
            let conn = connect().await?;

            debug!("connected");

            let mount_point = self.mount_point.clone();
            let options = self.options.clone();
            debug!(?mount_point, ?options, "mounting");

            let do_mount = move || {
                mount(conn.0.get_fd(), &mount_point, &options)?;
                <io::Result<_>>::Ok(conn)
            };

            unblock(do_mount).await?
        };

        debug!(fd = ?reader.get_fd(), "mounted");

        let mut server = Server {
            reader,
            writer,
            mount_point: self.mount_point,
            fs: self.fs,
            proto: ProtocolVersion {
                major: kernel::FUSE_KERNEL_VERSION,
                minor: kernel::FUSE_KERNEL_MINOR_VERSION,
            },
            buf: Some(AlignedBytes::new_zeroed(BUFFER_SIZE, PAGE_SIZE)),
        };

        if let Err(err) = server.handshake().await {
            error!(%err, "failed to initialize");
            let mount_point = server.mount_point.clone();
            drop(server);
            if let Err(err) = unblock(move || umount(&mount_point)).await {
                error!(%err, "failed to unmount");
            }
            return Err(err);
        }

        debug!("initialized");

        Ok(server)
    }
}

/// FUSE file system server
///
/// Requests are served one at a time, in the order the kernel delivers them.
#[derive(Debug)]
pub struct Server<F> {
    /// conn writer
    writer: ConnWriter,
    /// conn reader
    reader: ConnReader,
    /// mount point
    mount_point: PathBuf,
    /// file system
    fs: F,
    /// kernel prototol version
    proto: ProtocolVersion,
    /// request buffer, lent to the reader thread while a read is in flight
    buf: Option<AlignedBytes>,
}

/// What the loop does after a request
enum Flow {
    Continue,
    Shutdown,
}

impl<F> Server<F>
where
    F: FileSystem + Send + 'static,
{
    /// Starts to build a [`Server`] with the given mount point
    #[inline]
    pub fn mount(mount_point: PathBuf, fs: F) -> ServerBuilder<F> {
        ServerBuilder::new(mount_point, fs)
    }

    /// The mount point of this server
    #[inline]
    #[must_use]
    pub fn mount_point(&self) -> &std::path::Path {
        &self.mount_point
    }

    /// Reads one request into the buffer
    async fn read_request(&mut self) -> io::Result<(AlignedBytes, usize)> {
        let buf = match self.buf.take() {
            Some(buf) => buf,
            None => AlignedBytes::new_zeroed(BUFFER_SIZE, PAGE_SIZE),
        };
        let (buf, ret) = self.reader.read(buf).await;
        match ret {
            Ok(nread) => Ok((buf, nread)),
            Err(err) => {
                self.buf = Some(buf);
                Err(err)
            }
        }
    }

    /// Reads `FUSE_INIT` and replies to it
    async fn handshake(&mut self) -> io::Result<()> {
        let (buf, nread) = self.read_request().await?;

        let cx_writer = self.writer.clone();
        pin_mut!(cx_writer);

        let (cx, op) = FuseContext::new(&buf[..nread], cx_writer, self.proto)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        debug!(opcode = cx.header().opcode(), "got first request");

        let op = match op {
            Operation::Init(op) => op,
            _ => {
                let msg = "first request is not FUSE_INIT";
                return Err(io::Error::new(io::ErrorKind::InvalidData, msg));
            }
        };

        if op.major() != kernel::FUSE_KERNEL_VERSION
            || op.minor() < MIN_KERNEL_MINOR_VERSION
        {
            error!(major = op.major(), minor = op.minor(), "unsupported kernel protocol");
            cx.reply_err(crate::Errno::from_raw(libc::EPROTO)).await?;
            return Err(io::Error::from_raw_os_error(libc::EPROTO));
        }

        let proto = ProtocolVersion {
            major: op.major(),
            minor: op.minor().min(kernel::FUSE_KERNEL_MINOR_VERSION),
        };
        info!(major = proto.major, minor = proto.minor, "negotiated protocol");

        if let Err(err) = self.fs.init(proto).await {
            cx.reply_err(crate::Errno::from_io_error(&err)).await?;
            return Err(err);
        }

        let flags = op.flags()
            & (kernel::FUSE_ASYNC_READ | kernel::FUSE_BIG_WRITES | kernel::FUSE_ATOMIC_O_TRUNC);

        let mut reply = ops::ReplyInit::default();
        let _ = reply
            .major(kernel::FUSE_KERNEL_VERSION)
            .minor(proto.minor)
            .max_readahead(op.max_readahead())
            .flags(flags)
            .max_background(MAX_BACKGROUND)
            .congestion_threshold(MAX_BACKGROUND)
            .max_write(MAX_WRITE_SIZE)
            .time_gran(1)
            .max_pages(0);

        debug!(?op, ?reply);
        cx.reply(&op, reply).await?;

        self.proto = proto;
        self.buf = Some(buf);
        Ok(())
    }

    /// Decodes and serves one request
    async fn serve(&mut self, buf: &AlignedBytes, nread: usize) -> io::Result<Flow> {
        let cx_writer = self.writer.clone();
        pin_mut!(cx_writer);

        let (cx, op) = match FuseContext::new(&buf[..nread], cx_writer, self.proto) {
            Ok(r) => r,
            Err(err) => {
                error!(%err, len = nread, "failed to parse fuse request");
                return Ok(Flow::Continue);
            }
        };

        debug!(
            opcode = cx.header().opcode(),
            unique = cx.header().unique(),
            nodeid = cx.header().nodeid(),
            "got request"
        );

        match op {
            Operation::Init(op) => {
                error!(?op, "unexpected FUSE_INIT");
                cx.reply_err(crate::Errno::EIO).await?;
                Ok(Flow::Continue)
            }
            Operation::Destroy(op) => {
                self.fs.destroy().await;
                cx.reply(&op, ops::ReplyEmpty::new()).await?;
                Ok(Flow::Shutdown)
            }
            op => {
                if let Err(err) = self.fs.dispatch(cx, op).await {
                    error!(%err, "failed to reply");
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// Runs the file system until it is un-mounted
    /// # Errors
    /// Returns [`io::Error`]
    #[inline]
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            debug!("waiting for fuse request");

            let (buf, nread) = match self.read_request().await {
                Ok(r) => r,
                Err(err) => match err.raw_os_error() {
                    Some(libc::ENODEV) => {
                        info!("connection closed by the kernel");
                        self.fs.destroy().await;
                        break;
                    }
                    // ENOENT: the request was interrupted before we read it
                    Some(libc::EAGAIN) | Some(libc::EINTR) | Some(libc::ENOENT) => continue,
                    _ => {
                        error!(%err, "failed to read fuse connection");
                        self.fs.destroy().await;
                        return Err(err);
                    }
                },
            };

            let flow = self.serve(&buf, nread).await;
            self.buf = Some(buf);

            match flow? {
                Flow::Continue => continue,
                Flow::Shutdown => break,
            }
        }

        debug!("shutdown");

        Ok(())
    }
}
