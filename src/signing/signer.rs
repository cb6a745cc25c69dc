//! Signing with a [`TransitKey`] as if it were a local key.

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, warn};
use openssl::{
    bn::BigNumContext,
    ec::PointConversionForm,
    pkey::Id,
};

use crate::constants::{TRANSIT_MARSHALING_ASN1, TRANSIT_SIGNATURE_PREFIX};

use super::{
    hash::HashAlgorithm,
    key::{TransitKey, VersionedPublicKey},
    SignerError,
};

//------------ SignatureScheme -----------------------------------------------

/// The signature scheme asked of the KMS.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureScheme {
    /// RSASSA-PKCS1-v1_5.
    Pkcs1v15,

    /// RSASSA-PSS.
    Pss,

    /// The only scheme of the key type, e.g. ECDSA or Ed25519. Sent
    /// without a qualifier.
    Native,
}

impl SignatureScheme {
    /// The `signature_algorithm` value, if this scheme needs one.
    pub fn kms_name(self) -> Option<&'static str> {
        match self {
            SignatureScheme::Pkcs1v15 => Some("pkcs1v15"),
            SignatureScheme::Pss => Some("pss"),
            SignatureScheme::Native => None,
        }
    }

    /// The default scheme for a key type: PKCS#1 v1.5 for RSA, the native
    /// scheme for everything else.
    pub fn for_key_type(key_type: &str) -> Self {
        if key_type.starts_with("rsa-") {
            SignatureScheme::Pkcs1v15
        } else {
            SignatureScheme::Native
        }
    }
}

impl FromStr for SignatureScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pkcs1v15" => Ok(SignatureScheme::Pkcs1v15),
            "pss" => Ok(SignatureScheme::Pss),
            "native" => Ok(SignatureScheme::Native),
            _ => Err(format!("unknown signature scheme '{}', use one of: pkcs1v15, pss, native", s)),
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.kms_name().unwrap_or("native"))
    }
}

//------------ MarshalingAlgorithm -------------------------------------------

/// How the KMS encodes ECDSA signatures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MarshalingAlgorithm {
    /// A DER encoded `Ecdsa-Sig-Value`.
    Asn1,
}

impl MarshalingAlgorithm {
    pub fn kms_name(self) -> &'static str {
        match self {
            MarshalingAlgorithm::Asn1 => TRANSIT_MARSHALING_ASN1,
        }
    }
}

//------------ TransitSigner -------------------------------------------------

/// Produces raw signature bytes using a synchronized [`TransitKey`].
///
/// The public key and the signing version are fixed when the signer is
/// created.
#[derive(Debug)]
pub struct TransitSigner {
    key: TransitKey,
    scheme: SignatureScheme,
    public: VersionedPublicKey,
}

impl TransitSigner {
    pub fn new(key: TransitKey, scheme: SignatureScheme) -> Result<Self, SignerError> {
        let snapshot = key.snapshot()?;
        let version = snapshot.signing_version();
        let public = match snapshot.public_key(version) {
            Some(public) => public.clone(),
            None => {
                let latest = snapshot
                    .public_keys()
                    .last()
                    .ok_or_else(|| SignerError::public_key_parse(&key.path(), version, "no public keys"))?;
                warn!(
                    "No public key for version {} of '{}', using version {}",
                    version,
                    key.path(),
                    latest.version()
                );
                latest.clone()
            }
        };

        Ok(TransitSigner { key, scheme, public })
    }

    pub fn key(&self) -> &TransitKey {
        &self.key
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// The public key of the version used for signing.
    pub fn public(&self) -> &VersionedPublicKey {
        &self.public
    }

    /// Signs a digest that was made with the given hash algorithm.
    pub fn sign_digest(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, SignerError> {
        let signature = self
            .key
            .sign(digest, self.scheme, hash, MarshalingAlgorithm::Asn1, true)?;
        let (version, bytes) = parse_signature(&signature)?;
        debug!("Got signature from version {} of '{}'", version, self.key.path());
        Ok(bytes)
    }

    /// Signs a complete message, leaving any hashing to the KMS. This is
    /// how Ed25519 signatures are made.
    pub fn sign_message(&self, message: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, SignerError> {
        let signature = self
            .key
            .sign(message, self.scheme, hash, MarshalingAlgorithm::Asn1, false)?;
        parse_signature(&signature).map(|(_, bytes)| bytes)
    }
}

/// Splits a `vault:v<version>:<base64>` signature into its version and the
/// decoded signature bytes.
pub fn parse_signature(signature: &str) -> Result<(u64, Vec<u8>), SignerError> {
    let malformed = || SignerError::MalformedSignature(signature.to_string());

    let rest = signature.strip_prefix(TRANSIT_SIGNATURE_PREFIX).ok_or_else(malformed)?;
    let (version, encoded) = rest.split_once(':').ok_or_else(malformed)?;
    if encoded.contains(':') {
        return Err(malformed());
    }
    let version = version.parse::<u64>().map_err(|_| malformed())?;
    let bytes = BASE64.decode(encoded).map_err(|_| malformed())?;
    if bytes.is_empty() {
        return Err(malformed());
    }
    Ok((version, bytes))
}

//------------ RemoteCsrKey --------------------------------------------------

/// Lets the CSR builder sign with a [`TransitSigner`].
///
/// The builder only sees an opaque error when signing fails, so the error
/// of the last failed attempt is kept and can be taken through the handle
/// returned by [`RemoteCsrKey::errors`].
pub struct RemoteCsrKey {
    signer: TransitSigner,
    public_key: Vec<u8>,
    algorithm: &'static rcgen::SignatureAlgorithm,
    hash: Option<HashAlgorithm>,
    last_error: Arc<Mutex<Option<SignerError>>>,
}

impl RemoteCsrKey {
    pub fn new(signer: TransitSigner) -> Result<Self, SignerError> {
        let key_type = signer.key().snapshot()?.key_type().to_string();
        let (algorithm, hash) = match key_type.as_str() {
            "rsa-2048" | "rsa-3072" | "rsa-4096" => (&rcgen::PKCS_RSA_SHA256, Some(HashAlgorithm::Sha256)),
            "ecdsa-p256" => (&rcgen::PKCS_ECDSA_P256_SHA256, Some(HashAlgorithm::Sha256)),
            "ecdsa-p384" => (&rcgen::PKCS_ECDSA_P384_SHA384, Some(HashAlgorithm::Sha384)),
            "ed25519" => (&rcgen::PKCS_ED25519, None),
            _ => return Err(SignerError::UnsupportedKeyType(key_type)),
        };
        let public_key = raw_public_key(signer.public())?;

        Ok(RemoteCsrKey {
            signer,
            public_key,
            algorithm,
            hash,
            last_error: Arc::new(Mutex::new(None)),
        })
    }

    pub fn errors(&self) -> Arc<Mutex<Option<SignerError>>> {
        self.last_error.clone()
    }

    fn sign_tbs(&self, msg: &[u8]) -> Result<Vec<u8>, SignerError> {
        match self.hash {
            Some(hash) => self.signer.sign_digest(&hash.digest(msg)?, hash),
            None => self.signer.sign_message(msg, HashAlgorithm::Sha256),
        }
    }
}

impl rcgen::RemoteKeyPair for RemoteCsrKey {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        self.sign_tbs(msg).map_err(|e| {
            if let Ok(mut slot) = self.last_error.lock() {
                *slot = Some(e);
            }
            rcgen::Error::RemoteKeyError
        })
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.algorithm
    }
}

/// The public key in the form the CSR builder puts in the
/// SubjectPublicKeyInfo: an `RSAPublicKey` for RSA, the uncompressed point
/// for EC and the raw key for Ed25519.
fn raw_public_key(public: &VersionedPublicKey) -> Result<Vec<u8>, SignerError> {
    let key = public.key();
    match key.id() {
        Id::RSA => Ok(key.rsa()?.public_key_to_der_pkcs1()?),
        Id::EC => {
            let ec = key.ec_key()?;
            let mut ctx = BigNumContext::new()?;
            Ok(ec
                .public_key()
                .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)?)
        }
        Id::ED25519 => Ok(key.raw_public_key()?),
        other => Err(SignerError::UnsupportedKeyType(format!("{:?}", other))),
    }
}
