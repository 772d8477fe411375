//! FUSE connection

use crate::fd::FuseDesc;
use crate::write::FuseWrite;

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use aligned_bytes::AlignedBytes;
use blocking::unblock;

/// Connects to `/dev/fuse`
pub async fn connect() -> io::Result<(ConnReader, ConnWriter)> {
    let fd = Arc::new(unblock(FuseDesc::open).await?);

    let writer = ConnWriter { fd };

    let reader = ConnReader {
        fd: Arc::clone(&writer.fd),
    };

    Ok((reader, writer))
}

/// The reader of a FUSE connection
#[derive(Debug)]
pub struct ConnReader {
    /// Arc fd
    fd: Arc<FuseDesc>,
}

/// The writer of a FUSE connection
#[derive(Debug, Clone)]
pub struct ConnWriter {
    /// Arc fd
    fd: Arc<FuseDesc>,
}

impl ConnReader {
    /// Gets the underlying fd
    pub fn get_fd(&self) -> &FuseDesc {
        &*self.fd
    }

    /// Reads a request into the buffer, using a thread pool.
    ///
    /// The buffer is always handed back, together with the result.
    pub async fn read(&mut self, mut buf: AlignedBytes) -> (AlignedBytes, io::Result<usize>) {
        let fd = Arc::clone(&self.fd);
        unblock(move || {
            let ret = (&*fd).read(&mut buf);
            (buf, ret)
        })
        .await
    }
}

impl FuseWrite for ConnWriter {
    fn poll_reply(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<()>> {
        // writev on the fuse fd is atomic and never blocks
        let len: usize = bufs.iter().map(|s| s.len()).sum();
        let nwrite = (&*self.fd).write_vectored(bufs)?;
        if nwrite != len {
            let msg = format!("short reply write: {} of {} bytes", nwrite, len);
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::WriteZero, msg)));
        }
        Poll::Ready(Ok(()))
    }
}
