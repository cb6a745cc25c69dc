//! Signing with, and importing of, keys that live in the KMS.

mod error;
pub use self::error::SignerError;

pub mod csr;
pub mod hash;
pub mod import;
pub mod key;
pub mod kwp;
pub mod signer;

pub use self::{
    csr::{generate_csr, CsrTemplate},
    hash::HashAlgorithm,
    import::{KeyImport, KeyType, WrappedKeyEnvelope},
    key::{KeySnapshot, TransitKey, VersionedPublicKey},
    signer::{parse_signature, MarshalingAlgorithm, RemoteCsrKey, SignatureScheme, TransitSigner},
};
