//! Filesystem-level configuration.

/// Size reported for directories; object stores have no notion of one.
pub const FOLDER_SIZE: u64 = 42;

/// Permission bits reported for directories and files. Object stores carry
/// no ownership or mode, so these are fixed.
pub const FOLDER_MODE: u32 = 0o755;
pub const FILE_MODE: u32 = 0o664;

#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Separator used inside object keys.
    pub separator: char,
    /// Optional store-address prefix stripped from caller paths.
    pub store_prefix: String,
    /// Largest single write used when padding a file during truncate.
    pub pad_chunk_size: usize,
    /// Parallel deletes allowed during `remove_all`.
    pub delete_concurrency: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            separator: '/',
            store_prefix: "s3://".to_string(),
            pad_chunk_size: 4096,
            delete_concurrency: 8,
        }
    }
}
