// Library crate for blobfs: POSIX-like files and directories on object stores.

pub mod cadapter;
pub mod config;
pub mod error;
pub mod path;
pub mod vfs;

pub use config::FsConfig;
pub use error::{ErrorKind, FsError, FsResult};
pub use path::{ObjectKey, PathResolver};
pub use vfs::{FileHandle, FileInfo, ObjectFs, OpenMode, OpenOptions};
