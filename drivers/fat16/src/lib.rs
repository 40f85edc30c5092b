// Library crate root. No_std outside of `cargo test`; the ABI shim links it
// into a std cdylib.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block_dev;
pub mod bpb;
pub mod dir;
pub mod driver;
pub mod error;
pub mod fat;
pub mod file;
pub mod options;
pub mod volume;

pub use block_dev::{BlockDev, BlockStore, MemDisk};
pub use bpb::Geometry;
pub use dir::{DirEntry, FileAttributes, ShortName};
pub use driver::Driver;
pub use error::{Fat16Error, Result};
pub use fat::AllocationTable;
pub use fat16_api_types::OpenMode;
pub use file::Handle;
pub use options::MountOptions;
pub use volume::Volume;
