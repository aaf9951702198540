use thiserror::Error;

#[derive(Error, Debug)]
pub enum EthersrvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link error on {interface}: {reason}")]
    Link { interface: String, reason: String },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EthersrvError>;

/// Result codes reported to the DOS client in the reply's AX word.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosError {
    #[error("file not found")]
    FileNotFound,

    #[error("path not found")]
    PathNotFound,

    #[error("access denied")]
    AccessDenied,

    #[error("no more files")]
    NoMoreFiles,

    #[error("general failure")]
    GeneralFailure,
}

impl DosError {
    pub fn code(self) -> u16 {
        match self {
            DosError::FileNotFound => 0x02,
            DosError::PathNotFound => 0x03,
            DosError::AccessDenied => 0x05,
            DosError::NoMoreFiles => 0x12,
            DosError::GeneralFailure => 0x1D,
        }
    }
}
