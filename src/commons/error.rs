//! Errors shared between the kmsutil modules.

use std::{error, fmt, io};

//------------ KmsIoError ----------------------------------------------------

/// An io error with some context about what was being attempted.
#[derive(Debug)]
pub struct KmsIoError {
    context: String,
    cause: io::Error,
}

impl KmsIoError {
    pub fn new(context: String, cause: io::Error) -> Self {
        KmsIoError { context, cause }
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for KmsIoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}, underlying io::Error: {}", self.context, self.cause)
    }
}

impl error::Error for KmsIoError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.cause)
    }
}
