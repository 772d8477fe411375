//! A FUSE protocol binding: connects to `/dev/fuse`, mounts, decodes kernel
//! requests into typed [`Operation`]s and encodes the replies.

#![deny(clippy::all)]

#[macro_use]
mod internal_macros;

// unsafe modules
mod abi_marker;
mod c_bytes;
mod c_str;
mod decode;
mod encode;
mod fd;
mod syscall;

// safe modules
mod conn;
mod context;
mod errno;
mod fs;
mod mount;
mod server;
mod write;

#[allow(
    dead_code,
    missing_docs,
    non_camel_case_types,
    missing_copy_implementations
)]
pub mod kernel;
pub mod ops;

pub use self::c_bytes::NulError;
pub use self::context::{FuseContext, ProtocolVersion};
pub use self::decode::DecodeError;
pub use self::encode::Encode;
pub use self::errno::Errno;
pub use self::fd::FuseDesc;
pub use self::fs::FileSystem;
pub use self::mount::MountOptions;
pub use self::ops::Operation;
pub use self::server::{Server, ServerBuilder};
pub use self::write::FuseWrite;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ReplyData, ReplyReadLink};

    use std::io;

    #[test]
    fn lifetime() {
        struct MockFs;

        #[async_trait::async_trait]
        impl FileSystem for MockFs {
            async fn dispatch<'b, 'a: 'b>(
                &'a self,
                cx: FuseContext<'b>,
                op: Operation<'b>,
            ) -> io::Result<()> {
                match op {
                    Operation::ReadLink(readlink) => {
                        let reply = ReplyReadLink::new(b"asd".to_vec()).unwrap();
                        cx.reply(&readlink, reply).await
                    }
                    Operation::Read(read) => {
                        let reply = ReplyData::new(b"asd".to_vec());
                        cx.reply(&read, reply).await
                    }
                    _ => cx.reply_err(Errno::ENOSYS).await,
                }
            }
        }

        let _ = MockFs;
    }
}
