use std::fmt;

use openssl::error::ErrorStack;

use crate::commons::{error::KmsIoError, httpclient};

use super::{hash::HashAlgorithm, import::KeyType};

#[derive(Debug)]
pub enum SignerError {
    /// The KMS has no record at the path.
    NotFound(String),

    /// A KMS response violates the expected contract.
    MalformedResponse(String, String),

    /// A KMS response lacks a field.
    MissingField(String, &'static str),

    /// The key type is not one that can be used for this operation.
    UnsupportedKeyType(String),

    UnsupportedHash(HashAlgorithm),

    InvalidVersion { requested: u64, min: u64, max: u64 },

    /// The key was used before it was synchronized with the KMS.
    NotSynced(String),

    PublicKeyParseError { path: String, version: u64, reason: String },

    MalformedSignature(String),

    WrappingKeyUnavailable(String, String),

    InvalidPrivateKey(String),

    KeyWrap(String),

    ImportRejected(String, httpclient::Error),

    RemoteError(httpclient::Error),

    Csr(String),

    OpenSslError(ErrorStack),

    IoError(KmsIoError),
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignerError::NotFound(path) => write!(f, "No key found at '{}'", path),
            SignerError::MalformedResponse(path, msg) => write!(f, "Malformed response for '{}': {}", path, msg),
            SignerError::MissingField(path, field) => write!(f, "Response for '{}' lacks field '{}'", path, field),
            SignerError::UnsupportedKeyType(key_type) => write!(
                f,
                "Unsupported key type '{}', supported types: {}",
                key_type,
                KeyType::supported_list()
            ),
            SignerError::UnsupportedHash(hash) => write!(
                f,
                "Unsupported hash '{}', supported hashes: {}",
                hash,
                HashAlgorithm::supported_list()
            ),
            SignerError::InvalidVersion { requested, min, max } => write!(
                f,
                "Invalid key version {}, must be within min version {} and max version {}",
                requested, min, max
            ),
            SignerError::NotSynced(path) => write!(f, "Key '{}' was not synchronized with the KMS", path),
            SignerError::PublicKeyParseError { path, version, reason } => {
                write!(f, "Cannot parse public key version {} of '{}': {}", version, path, reason)
            }
            SignerError::MalformedSignature(sig) => write!(
                f,
                "Invalid signature, expecting '<prefix>:v<version>:<base64>' but got '{}'",
                sig
            ),
            SignerError::WrappingKeyUnavailable(path, msg) => {
                write!(f, "Wrapping key at '{}' is unavailable: {}", path, msg)
            }
            SignerError::InvalidPrivateKey(msg) => write!(f, "Invalid private key: {}", msg),
            SignerError::KeyWrap(msg) => write!(f, "Key wrap error: {}", msg),
            SignerError::ImportRejected(path, e) => write!(f, "Import into '{}' was rejected: {}", path, e),
            SignerError::RemoteError(e) => write!(f, "KMS error: {}", e),
            SignerError::Csr(msg) => write!(f, "Cannot generate CSR: {}", msg),
            SignerError::OpenSslError(e) => write!(f, "OpenSsl Error: {}", e),
            SignerError::IoError(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for SignerError {}

impl SignerError {
    pub fn malformed(path: &str, msg: impl fmt::Display) -> Self {
        SignerError::MalformedResponse(path.to_string(), msg.to_string())
    }

    pub fn public_key_parse(path: &str, version: u64, reason: impl fmt::Display) -> Self {
        SignerError::PublicKeyParseError {
            path: path.to_string(),
            version,
            reason: reason.to_string(),
        }
    }

    pub fn wrapping_key(path: &str, msg: impl fmt::Display) -> Self {
        SignerError::WrappingKeyUnavailable(path.to_string(), msg.to_string())
    }
}

impl From<ErrorStack> for SignerError {
    fn from(e: ErrorStack) -> Self {
        SignerError::OpenSslError(e)
    }
}

impl From<httpclient::Error> for SignerError {
    fn from(e: httpclient::Error) -> Self {
        SignerError::RemoteError(e)
    }
}

impl From<KmsIoError> for SignerError {
    fn from(e: KmsIoError) -> Self {
        SignerError::IoError(e)
    }
}
