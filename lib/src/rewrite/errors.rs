use crate::jvm;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Jvm(#[from] jvm::Error),

    /// Failure of one method (identified as `Class.name(descriptor)`)
    #[error("{method}: {source}")]
    Method {
        method: String,
        #[source]
        source: jvm::Error,
    },

    #[error("{failed} method(s) could not be rewritten")]
    MethodsFailed { failed: usize },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Jvm(jvm::Error::IoError(err))
    }
}

impl From<jvm::ClassFormatError> for Error {
    fn from(err: jvm::ClassFormatError) -> Error {
        Error::Jvm(jvm::Error::ClassFormat(err))
    }
}
