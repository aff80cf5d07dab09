//! VFS layer: POSIX-like files and directories on top of `cadapter`.
//!
//! Submodules:
//! - `index`: directory detection and listings over a flat key space
//! - `resource`: shared per-object cursor and the registry of open objects
//! - `handle`: per-open handles and open modes
//! - `fs`: the path-based facade
pub mod fs;
pub mod handle;
pub mod index;
pub mod resource;

pub use fs::ObjectFs;
pub use handle::{FileHandle, OpenMode, OpenOptions};
pub use index::{DirEntry, FileInfo, FileType};
