use std::path::PathBuf;

/// All errors that can occur within sparrow.
///
/// The variants fall into three families (see [`ErrorKind`]): configuration
/// errors, raised before any device resource is allocated; resource errors
/// from the accelerator; and input errors from the file readers. None of them
/// is retried. An inference call either completes for the whole batch or
/// fails with one of these.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid construction parameter (zero layers, bias out of range, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// No column block of the layer fits the device's fast memory.
    #[error("no column block of {neurons} neurons fits a fast-memory budget of {budget} elements")]
    NoColumnBlock { neurons: usize, budget: usize },

    /// A file or buffer disagrees with the geometry the engine was built for.
    #[error("geometry mismatch: {what}: expected {expected}, got {got}")]
    GeometryMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Device allocation, transfer, launch or synchronization failure.
    #[error("device error during {op}: {reason}")]
    Device { op: &'static str, reason: String },

    /// Reading a file from disk failed.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file's contents are not a valid weight/input file.
    #[error("malformed {file} file: {reason}")]
    Format { file: &'static str, reason: String },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Resource,
    Input,
    Other,
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn config(s: impl Into<String>) -> Self {
        Error::Config(s.into())
    }

    /// Wrap a backend failure for the named device operation.
    pub fn device(op: &'static str, reason: impl std::fmt::Display) -> Self {
        Error::Device {
            op,
            reason: reason.to_string(),
        }
    }

    pub fn format(file: &'static str, reason: impl Into<String>) -> Self {
        Error::Format {
            file,
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::NoColumnBlock { .. } | Error::GeometryMismatch { .. } => {
                ErrorKind::Configuration
            }
            Error::Device { .. } => ErrorKind::Resource,
            Error::Io { .. } | Error::Format { .. } => ErrorKind::Input,
            Error::Msg(_) => ErrorKind::Other,
        }
    }
}

/// Convenience Result type used throughout sparrow.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
