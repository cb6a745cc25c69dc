//! Hash algorithms and their names in the KMS API.

use std::{fmt, str::FromStr};

use openssl::hash::MessageDigest;

use super::SignerError;

//------------ HashAlgorithm -------------------------------------------------

/// A hash algorithm a caller may ask a signature for.
///
/// Only some of these are known to the KMS, see [`HashAlgorithm::kms_name`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    Md5,
    Ripemd160,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 11] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Ripemd160,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Sha3_224,
        HashAlgorithm::Sha3_256,
        HashAlgorithm::Sha3_384,
        HashAlgorithm::Sha3_512,
    ];

    /// The name used for this hash in KMS sign and verify paths.
    pub fn kms_name(self) -> Result<&'static str, SignerError> {
        match self {
            HashAlgorithm::Sha1 => Ok("sha1"),
            HashAlgorithm::Sha224 => Ok("sha2-224"),
            HashAlgorithm::Sha256 => Ok("sha2-256"),
            HashAlgorithm::Sha384 => Ok("sha2-384"),
            HashAlgorithm::Sha512 => Ok("sha2-512"),
            HashAlgorithm::Sha3_224 => Ok("sha3-224"),
            HashAlgorithm::Sha3_256 => Ok("sha3-256"),
            HashAlgorithm::Sha3_384 => Ok("sha3-384"),
            HashAlgorithm::Sha3_512 => Ok("sha3-512"),
            HashAlgorithm::Md5 | HashAlgorithm::Ripemd160 => Err(SignerError::UnsupportedHash(self)),
        }
    }

    pub fn is_supported(self) -> bool {
        self.kms_name().is_ok()
    }

    /// The comma separated names of all hashes known to the KMS.
    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .filter_map(|hash| hash.kms_name().ok())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn message_digest(self) -> MessageDigest {
        match self {
            HashAlgorithm::Md5 => MessageDigest::md5(),
            HashAlgorithm::Ripemd160 => MessageDigest::ripemd160(),
            HashAlgorithm::Sha1 => MessageDigest::sha1(),
            HashAlgorithm::Sha224 => MessageDigest::sha224(),
            HashAlgorithm::Sha256 => MessageDigest::sha256(),
            HashAlgorithm::Sha384 => MessageDigest::sha384(),
            HashAlgorithm::Sha512 => MessageDigest::sha512(),
            HashAlgorithm::Sha3_224 => MessageDigest::sha3_224(),
            HashAlgorithm::Sha3_256 => MessageDigest::sha3_256(),
            HashAlgorithm::Sha3_384 => MessageDigest::sha3_384(),
            HashAlgorithm::Sha3_512 => MessageDigest::sha3_512(),
        }
    }

    /// Hashes the data locally.
    pub fn digest(self, data: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(openssl::hash::hash(self.message_digest(), data)?.to_vec())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Ripemd160 => "RIPEMD-160",
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha224 => "SHA-224",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
            HashAlgorithm::Sha3_224 => "SHA3-224",
            HashAlgorithm::Sha3_256 => "SHA3-256",
            HashAlgorithm::Sha3_384 => "SHA3-384",
            HashAlgorithm::Sha3_512 => "SHA3-512",
        };
        f.write_str(name)
    }
}

/// Parses either the KMS name (`sha2-256`) or the common name (`SHA-256`),
/// ignoring case.
impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|hash| hash.to_string().to_ascii_lowercase() == lower || hash.kms_name().ok() == Some(lower.as_str()))
            .ok_or_else(|| format!("unknown hash '{}', use one of: {}", s, Self::supported_list()))
    }
}
