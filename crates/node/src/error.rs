//! Errors of the node daemon.

pub type Result<T> = std::result::Result<T, Error>;

/// Every error carries a numeric code. The hundreds give the category (5xx input,
/// 6xx ring operations, 8xx logging, 9xx files, 10xx serialization, 11xx lower
/// layers) and the rest the case.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
#[repr(u32)]
pub enum Error {
    #[error("Invalid did: {0}")]
    InvalidDid(String) = 500,
    #[error("Join error: {0}")]
    JoinError(chordring_core::error::Error) = 600,
    #[error("Lookup error: {0}")]
    LookupError(chordring_core::error::Error) = 601,
    #[error("Vnode error: {0}")]
    VnodeError(chordring_core::error::Error) = 603,
    #[error("Unknown log level: {0}")]
    InvalidLoggingLevel(String) = 809,
    #[error("Failed to create file: {0}")]
    CreateFileError(String) = 900,
    #[error("Failed to open file: {0}")]
    OpenFileError(String) = 901,
    #[error("No home directory to expand ~ with")]
    HomeDirError = 903,
    #[error("Path has no parent directory")]
    ParentDirError = 904,
    #[error("JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error) = 1000,
    #[error("YAML error: {0}")]
    SerdeYamlError(#[from] serde_yaml::Error) = 1001,
    #[error("Ring error: {0}")]
    CoreError(#[from] chordring_core::error::Error) = 1102,
    #[error("Transport error: {0}")]
    TransportError(#[from] chordring_transport::error::Error) = 1103,
}

impl Error {
    fn discriminant(&self) -> u32 {
        // SAFETY: `Self` is `repr(u32)`, so its layout is a `repr(C)` union of
        // `repr(C)` structs, each starting with the `u32` discriminant.
        // ref: https://doc.rust-lang.org/std/mem/fn.discriminant.html
        unsafe { *<*const _>::from(self).cast::<u32>() }
    }

    /// Numeric code of the error.
    pub fn code(&self) -> u32 {
        self.discriminant()
    }
}
