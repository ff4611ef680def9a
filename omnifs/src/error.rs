use thiserror::Error;

/// Error taxonomy shared by every layer. The integer codes are part of the
/// wire protocol and must stay stable.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("Not found")]
    NotFound,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("Invalid path")]
    InvalidPath,
    #[error("File or directory already exists")]
    FileExists,
    #[error("No space left")]
    NoSpace,
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Not implemented")]
    NotImplemented,
    #[error("Invalid session")]
    InvalidSession,
    #[error("Directory not empty")]
    DirectoryNotEmpty,
    #[error("Invalid operation")]
    InvalidOperation,
}

/// Response code for faults inside the dispatcher itself, outside the
/// regular taxonomy.
pub const DISPATCH_FAULT: i32 = -500;

impl FsError {
    pub fn code(&self) -> i32 {
        match self {
            FsError::NotFound => -1,
            FsError::PermissionDenied => -2,
            FsError::Io(_) => -3,
            FsError::InvalidPath => -4,
            FsError::FileExists => -5,
            FsError::NoSpace => -6,
            FsError::InvalidConfig(_) => -7,
            FsError::NotImplemented => -8,
            FsError::InvalidSession => -9,
            FsError::DirectoryNotEmpty => -10,
            FsError::InvalidOperation => -11,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
