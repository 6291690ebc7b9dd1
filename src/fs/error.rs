use core::fmt;

/// Filesystem error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    InvalidPath,
    NameTooLong,
    NoSpace,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "No such file"),
            FsError::AlreadyExists => write!(f, "File exists"),
            FsError::InvalidPath => write!(f, "Invalid file name"),
            FsError::NameTooLong => write!(f, "File name too long"),
            FsError::NoSpace => write!(f, "No space left"),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
