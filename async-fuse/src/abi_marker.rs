//! Internal unsafe marker for FUSE ABI types

#[allow(clippy::wildcard_imports)]
use crate::kernel::*;

/// FUSE ABI types.
///
/// It is safe to transmute a `&[u8]` to `&T` where `T: FuseAbiData + Sized`.
///
/// [`FuseAbiData`] can not be implemented for ZSTs.
pub unsafe trait FuseAbiData {}

macro_rules! mark_abi_type {
    ($t:ty) => {
        unsafe impl FuseAbiData for $t {}
    };
}

macro_rules! mark_sized_types {
    (@primitive $($t:ty,)+) => {
        $(
            mark_abi_type!($t);
        )+
    };

    (@kernel $($t:ident,)+) => {
        $(
            mark_abi_type!($t);
        )+

        #[test]
        fn size_check() {
            use std::mem;

            $(
                assert!(mem::size_of::<$t>() > 0); // ZST makes no sense
            )+
            $(
                assert!(mem::size_of::<$t>() <= 256); // detect large types
            )+
            $(
                assert_eq!(mem::size_of::<$t>() % 8, 0); // padded to 64bit
            )+
        }
    };
}

mark_sized_types!(@primitive
    u8,
    u16,
    u32,
    u64,
    i32,
    i64,
);

mark_sized_types!(@kernel
    fuse_attr,
    fuse_kstatfs,
    fuse_entry_out,
    fuse_forget_in,
    fuse_forget_one,
    fuse_batch_forget_in,
    fuse_getattr_in,
    fuse_attr_out,
    fuse_mknod_in,
    fuse_mkdir_in,
    fuse_rename_in,
    fuse_link_in,
    fuse_setattr_in,
    fuse_open_in,
    fuse_create_in,
    fuse_open_out,
    fuse_release_in,
    fuse_flush_in,
    fuse_read_in,
    fuse_write_in,
    fuse_write_out,
    fuse_statfs_out,
    fuse_fsync_in,
    fuse_setxattr_in,
    fuse_getxattr_in,
    fuse_getxattr_out,
    fuse_access_in,
    fuse_init_in,
    fuse_init_out,
    fuse_interrupt_in,
    fuse_in_header,
    fuse_out_header,
    fuse_dirent_head,
);

#[test]
fn abi_sizes() {
    use std::mem::size_of;

    assert_eq!(size_of::<fuse_in_header>(), 40);
    assert_eq!(size_of::<fuse_out_header>(), 16);
    assert_eq!(size_of::<fuse_attr>(), 88);
    assert_eq!(size_of::<fuse_entry_out>(), 128);
    assert_eq!(size_of::<fuse_attr_out>(), 104);
    assert_eq!(size_of::<fuse_setattr_in>(), 88);
    assert_eq!(size_of::<fuse_init_out>(), 64);
    assert_eq!(size_of::<fuse_write_in>(), 40);
    assert_eq!(size_of::<fuse_kstatfs>(), 80);
    assert_eq!(size_of::<fuse_dirent_head>(), 24);
}
