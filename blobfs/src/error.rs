use crate::cadapter::StoreError;
use std::io;
use thiserror::Error;

pub type FsResult<T> = Result<T, FsError>;

/// Coarse classification of [`FsError`]; compare these, never messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidName,
    NotFound,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    OutOfRange,
    AlreadyClosed,
    PermissionDenied,
    Unimplemented,
    Store,
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no container in name: {0:?}")]
    NoContainer(String),

    // Kept apart from NotFound: the container root is a directory, not a miss.
    #[error("empty object name: {0:?}")]
    EmptyObjectName(String),

    #[error("parent component in name: {0:?}")]
    ParentComponent(String),

    #[error("{0}: no such file or directory")]
    NotFound(String),

    #[error("{0}: not a directory")]
    NotADirectory(String),

    #[error("{0}: is a directory")]
    IsADirectory(String),

    #[error("{0}: directory not empty")]
    DirectoryNotEmpty(String),

    #[error("{0}: out of range")]
    OutOfRange(String),

    #[error("file already closed")]
    AlreadyClosed,

    #[error("{0}: permission denied")]
    PermissionDenied(String),

    #[error("{0} is not supported by object stores")]
    Unimplemented(&'static str),

    // Transport, auth and backend failures, surfaced as-is.
    #[error(transparent)]
    Store(StoreError),
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::NoContainer(_)
            | FsError::EmptyObjectName(_)
            | FsError::ParentComponent(_) => ErrorKind::InvalidName,
            FsError::NotFound(_) => ErrorKind::NotFound,
            FsError::NotADirectory(_) => ErrorKind::NotADirectory,
            FsError::IsADirectory(_) => ErrorKind::IsADirectory,
            FsError::DirectoryNotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            FsError::OutOfRange(_) => ErrorKind::OutOfRange,
            FsError::AlreadyClosed => ErrorKind::AlreadyClosed,
            FsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            FsError::Unimplemented(_) => ErrorKind::Unimplemented,
            FsError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => FsError::NotFound(key.to_string()),
            other => FsError::Store(other),
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        FsError::Store(StoreError::Io(err))
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        let kind = match err.kind() {
            ErrorKind::InvalidName => io::ErrorKind::InvalidInput,
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            ErrorKind::IsADirectory => io::ErrorKind::IsADirectory,
            ErrorKind::DirectoryNotEmpty => io::ErrorKind::DirectoryNotEmpty,
            ErrorKind::OutOfRange => io::ErrorKind::InvalidInput,
            ErrorKind::AlreadyClosed => io::ErrorKind::BrokenPipe,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::Unimplemented => io::ErrorKind::Unsupported,
            ErrorKind::Store => match &err {
                FsError::Store(StoreError::Io(e)) => e.kind(),
                _ => io::ErrorKind::Other,
            },
        };
        io::Error::new(kind, err)
    }
}
