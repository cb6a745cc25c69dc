//! Importing a local private key into the KMS.
//!
//! The key never travels in the clear. It is wrapped with a fresh AES key
//! using KWP, and that AES key is encrypted with RSA-OAEP under the
//! wrapping key published by the KMS. Only the KMS can unwrap the result.

use std::{fmt, path::Path, str::FromStr, sync::Arc};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, info};
use openssl::{
    encrypt::Encrypter,
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rand::rand_bytes,
    rsa::Padding,
};
use rustls_pemfile::Item;
use serde_json::json;
use zeroize::Zeroizing;

use crate::{
    commons::util::file,
    constants::{EPHEMERAL_KEY_LEN, TRANSIT_IMPORT_HASH_FUNCTION},
    kms::KmsClient,
};

use super::{kwp, SignerError};

const PKCS8_HINT: &str = "expected a PKCS#8 'PRIVATE KEY' PEM, convert it with: \
     openssl pkcs8 -topk8 -nocrypt -in <key.pem> -out <key.pkcs8.pem>";

//------------ KeyType -------------------------------------------------------

/// The key types the KMS can import.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyType {
    Rsa2048,
    Rsa3072,
    Rsa4096,
    EcdsaP256,
    EcdsaP384,
    EcdsaP521,
    Ed25519,
}

impl KeyType {
    pub const ALL: [KeyType; 7] = [
        KeyType::Rsa2048,
        KeyType::Rsa3072,
        KeyType::Rsa4096,
        KeyType::EcdsaP256,
        KeyType::EcdsaP384,
        KeyType::EcdsaP521,
        KeyType::Ed25519,
    ];

    pub fn kms_name(self) -> &'static str {
        match self {
            KeyType::Rsa2048 => "rsa-2048",
            KeyType::Rsa3072 => "rsa-3072",
            KeyType::Rsa4096 => "rsa-4096",
            KeyType::EcdsaP256 => "ecdsa-p256",
            KeyType::EcdsaP384 => "ecdsa-p384",
            KeyType::EcdsaP521 => "ecdsa-p521",
            KeyType::Ed25519 => "ed25519",
        }
    }

    pub fn supported_list() -> String {
        Self::ALL.iter().map(|t| t.kms_name()).collect::<Vec<_>>().join(", ")
    }

    /// Derives the KMS key type from the algorithm and size of a key.
    pub fn from_private_key(key: &PKey<Private>) -> Result<Self, SignerError> {
        match key.id() {
            Id::RSA => match key.bits() {
                2048 => Ok(KeyType::Rsa2048),
                3072 => Ok(KeyType::Rsa3072),
                4096 => Ok(KeyType::Rsa4096),
                bits => Err(SignerError::UnsupportedKeyType(format!("rsa-{}", bits))),
            },
            Id::EC => {
                let ec = key.ec_key()?;
                match ec.group().curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => Ok(KeyType::EcdsaP256),
                    Some(Nid::SECP384R1) => Ok(KeyType::EcdsaP384),
                    Some(Nid::SECP521R1) => Ok(KeyType::EcdsaP521),
                    Some(nid) => Err(SignerError::UnsupportedKeyType(format!(
                        "ec-{}",
                        nid.short_name().unwrap_or("unknown")
                    ))),
                    None => Err(SignerError::UnsupportedKeyType("ec with explicit parameters".to_string())),
                }
            }
            Id::ED25519 => Ok(KeyType::Ed25519),
            Id::ED448 => Err(SignerError::UnsupportedKeyType("ed448".to_string())),
            Id::DSA => Err(SignerError::UnsupportedKeyType("dsa".to_string())),
            Id::DH => Err(SignerError::UnsupportedKeyType("dh".to_string())),
            Id::X25519 => Err(SignerError::UnsupportedKeyType("x25519".to_string())),
            other => Err(SignerError::UnsupportedKeyType(format!("{:?}", other))),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.kms_name())
    }
}

impl FromStr for KeyType {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.kms_name() == s)
            .ok_or_else(|| SignerError::UnsupportedKeyType(s.to_string()))
    }
}

//------------ WrappedKeyEnvelope --------------------------------------------

/// A private key wrapped for transfer into the KMS: the RSA-OAEP encrypted
/// ephemeral key followed by the KWP wrapped private key.
pub struct WrappedKeyEnvelope {
    wrapped_key_len: usize,
    payload: Vec<u8>,
}

impl WrappedKeyEnvelope {
    /// Wraps the PKCS#8 DER of a private key under a new ephemeral key,
    /// and that ephemeral key under the wrapping key.
    ///
    /// The ephemeral key is used for this envelope only and is wiped when
    /// this function returns.
    pub fn seal(private_key_der: &[u8], wrapping_key: &PKey<Public>) -> Result<Self, SignerError> {
        let mut ephemeral = Zeroizing::new([0u8; EPHEMERAL_KEY_LEN]);
        rand_bytes(&mut ephemeral[..])?;

        let wrapped_target = kwp::wrap(&ephemeral[..], private_key_der)?;
        let mut payload = oaep_encrypt(wrapping_key, &ephemeral[..])?;
        let wrapped_key_len = payload.len();
        payload.extend_from_slice(&wrapped_target);

        Ok(WrappedKeyEnvelope {
            wrapped_key_len,
            payload,
        })
    }

    /// The length of the encrypted ephemeral key at the start of the
    /// payload. This is the modulus size of the wrapping key.
    pub fn wrapped_key_len(&self) -> usize {
        self.wrapped_key_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.payload)
    }
}

impl fmt::Debug for WrappedKeyEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "WrappedKeyEnvelope(wrapped key: {} bytes, total: {} bytes)",
            self.wrapped_key_len,
            self.payload.len()
        )
    }
}

fn oaep_encrypt(key: &PKey<Public>, data: &[u8]) -> Result<Vec<u8>, SignerError> {
    let mut encrypter = Encrypter::new(key)?;
    encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
    encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
    encrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

    let mut out = vec![0; encrypter.encrypt_len(data)?];
    let len = encrypter.encrypt(data, &mut out)?;
    out.truncate(len);
    Ok(out)
}

//------------ KeyImport -----------------------------------------------------

/// Imports a local private key as a new key under a transit mount.
pub struct KeyImport {
    client: Arc<dyn KmsClient>,
    mount: String,
    name: String,
}

impl KeyImport {
    pub fn new(client: Arc<dyn KmsClient>, mount: &str, name: &str) -> Self {
        KeyImport {
            client,
            mount: mount.trim_matches('/').to_string(),
            name: name.to_string(),
        }
    }

    /// The path of the imported key, e.g. `transit/keys/my-key`.
    pub fn path(&self) -> String {
        format!("{}/keys/{}", self.mount, self.name)
    }

    /// Reads a PEM encoded PKCS#8 private key from disk and imports it.
    pub fn import_file(&self, path: &Path) -> Result<KeyType, SignerError> {
        let pem = Zeroizing::new(file::read(path)?);
        self.import_pem(&pem)
    }

    /// Imports a PEM encoded PKCS#8 private key.
    ///
    /// Nothing is written to the KMS unless all local steps succeed. A
    /// failed import must be started over, which uses a new ephemeral key.
    pub fn import_pem(&self, pem: &[u8]) -> Result<KeyType, SignerError> {
        let der = load_pkcs8(pem)?;
        let private_key = PKey::private_key_from_pkcs8(&der)
            .map_err(|e| SignerError::InvalidPrivateKey(format!("cannot parse PKCS#8 key: {}", e)))?;
        let key_type = KeyType::from_private_key(&private_key)?;
        drop(private_key);
        debug!("Importing {} key into '{}'", key_type, self.path());

        let wrapping_key = self.wrapping_key()?;
        let envelope = WrappedKeyEnvelope::seal(&der, &wrapping_key)?;
        drop(der);
        debug!("Sealed key: {:?}", envelope);

        self.submit(&envelope, key_type)?;
        info!("Imported {} key as '{}'", key_type, self.path());
        Ok(key_type)
    }

    /// Reads the RSA public key the KMS uses to unwrap imported keys.
    pub fn wrapping_key(&self) -> Result<PKey<Public>, SignerError> {
        let path = format!("{}/wrapping_key", self.mount);
        let secret = self
            .client
            .read(&path)?
            .ok_or_else(|| SignerError::wrapping_key(&path, "no wrapping key published"))?;

        let pem = secret
            .get_str("public_key")
            .ok_or_else(|| SignerError::wrapping_key(&path, "field 'public_key' is missing"))?;
        debug!("Got wrapping key: {}", pem);

        let key = PKey::public_key_from_pem(pem.as_bytes()).map_err(|e| SignerError::wrapping_key(&path, e))?;
        if key.id() != Id::RSA {
            return Err(SignerError::wrapping_key(&path, "not an RSA public key"));
        }
        Ok(key)
    }

    fn submit(&self, envelope: &WrappedKeyEnvelope, key_type: KeyType) -> Result<(), SignerError> {
        let path = format!("{}/import", self.path());
        let body = json!({
            "ciphertext": envelope.to_base64(),
            "hash_function": TRANSIT_IMPORT_HASH_FUNCTION,
            "type": key_type.kms_name(),
            "exportable": false,
        });
        self.client
            .write(&path, &body)
            .map_err(|e| SignerError::ImportRejected(path, e))?;
        Ok(())
    }
}

/// Returns the DER of the first PKCS#8 private key in the PEM input.
fn load_pkcs8(pem: &[u8]) -> Result<Zeroizing<Vec<u8>>, SignerError> {
    let mut reader = pem;
    for item in rustls_pemfile::read_all(&mut reader) {
        match item.map_err(|e| SignerError::InvalidPrivateKey(format!("cannot read PEM: {}", e)))? {
            Item::Pkcs8Key(key) => return Ok(Zeroizing::new(key.secret_pkcs8_der().to_vec())),
            Item::Pkcs1Key(_) | Item::Sec1Key(_) => {
                return Err(SignerError::InvalidPrivateKey(PKCS8_HINT.to_string()));
            }
            _ => {}
        }
    }
    Err(SignerError::InvalidPrivateKey("no private key found in PEM".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use openssl::{dsa::Dsa, rsa::Rsa};
    use serde_json::Value;

    use crate::test::{generate_key, pkcs8_pem, public_key_pem, MockKms};

    #[test]
    fn should_derive_key_types() {
        for key_type in KeyType::ALL {
            let key = generate_key(key_type.kms_name());
            assert_eq!(KeyType::from_private_key(&key).unwrap(), key_type);
        }

        let small = PKey::from_rsa(Rsa::generate(1024).unwrap()).unwrap();
        match KeyType::from_private_key(&small) {
            Err(SignerError::UnsupportedKeyType(t)) => assert_eq!(t, "rsa-1024"),
            other => panic!("expected unsupported key type, got {:?}", other),
        }

        let err = SignerError::UnsupportedKeyType("dsa".to_string()).to_string();
        assert!(err.contains("rsa-2048, rsa-3072, rsa-4096, ecdsa-p256, ecdsa-p384, ecdsa-p521, ed25519"));
    }

    #[test]
    fn should_parse_key_type_names() {
        assert_eq!(KeyType::from_str("ecdsa-p384").unwrap(), KeyType::EcdsaP384);
        assert_eq!(KeyType::Ed25519.to_string(), "ed25519");
        assert!(matches!(KeyType::from_str("aes256-gcm96"), Err(SignerError::UnsupportedKeyType(_))));
    }

    #[test]
    fn envelope_length_is_deterministic() {
        let wrapping = generate_key("rsa-2048");
        let wrapping = PKey::public_key_from_pem(public_key_pem(&wrapping).as_bytes()).unwrap();
        let der = generate_key("rsa-2048").private_key_to_pkcs8().unwrap();

        let envelope = WrappedKeyEnvelope::seal(&der, &wrapping).unwrap();
        assert_eq!(envelope.wrapped_key_len(), 256);
        assert_eq!(envelope.payload().len(), 256 + kwp::wrapped_len(der.len()));
        assert_eq!(envelope.payload().len(), 256 + der.len().div_ceil(8) * 8 + 8);

        let decoded = BASE64.decode(envelope.to_base64()).unwrap();
        assert_eq!(decoded, envelope.payload());

        let again = WrappedKeyEnvelope::seal(&der, &wrapping).unwrap();
        assert_eq!(again.payload().len(), envelope.payload().len());
        assert_ne!(again.payload(), envelope.payload());
    }

    #[test]
    fn should_import_into_kms() {
        let kms = Arc::new(MockKms::new());
        let key = generate_key("ecdsa-p256");
        let import = KeyImport::new(kms.clone(), "transit", "imported");

        let key_type = import.import_pem(pkcs8_pem(&key).as_bytes()).unwrap();
        assert_eq!(key_type, KeyType::EcdsaP256);

        let imported = kms.imported("transit", "imported").unwrap();
        assert_eq!(imported.pkcs8_der, key.private_key_to_pkcs8().unwrap());
        assert_eq!(imported.key_type, "ecdsa-p256");
        assert_eq!(imported.hash_function, "SHA256");
        assert!(!imported.exportable);

        let body = kms.last_write("transit/keys/imported/import").unwrap();
        assert_eq!(body["exportable"], Value::Bool(false));
    }

    #[test]
    fn should_require_pkcs8() {
        let kms = Arc::new(MockKms::new());
        let import = KeyImport::new(kms.clone(), "transit", "imported");

        let rsa = Rsa::generate(2048).unwrap();
        let pkcs1 = rsa.private_key_to_pem().unwrap();
        match import.import_pem(&pkcs1) {
            Err(SignerError::InvalidPrivateKey(msg)) => assert!(msg.contains("openssl pkcs8 -topk8")),
            other => panic!("expected invalid private key, got {:?}", other),
        }

        assert!(matches!(
            import.import_pem(b"not a pem at all"),
            Err(SignerError::InvalidPrivateKey(_))
        ));
        assert!(kms.requests().is_empty());
    }

    #[test]
    fn should_reject_unsupported_key_before_contacting_kms() {
        let kms = Arc::new(MockKms::new());
        let import = KeyImport::new(kms.clone(), "transit", "imported");

        let dsa = PKey::from_dsa(Dsa::generate(2048).unwrap()).unwrap();
        let pem = dsa.private_key_to_pem_pkcs8().unwrap();
        match import.import_pem(&pem) {
            Err(SignerError::UnsupportedKeyType(t)) => assert_eq!(t, "dsa"),
            other => panic!("expected unsupported key type, got {:?}", other),
        }
        assert!(kms.requests().is_empty());
    }

    #[test]
    fn should_require_rsa_wrapping_key() {
        let kms = Arc::new(MockKms::new());
        let import = KeyImport::new(kms.clone(), "transit", "imported");
        let pem = pkcs8_pem(&generate_key("ed25519"));

        let ec_pem = public_key_pem(&generate_key("ecdsa-p256"));
        kms.set_read_response("transit/wrapping_key", Some(json!({ "public_key": ec_pem })));
        assert!(matches!(
            import.import_pem(pem.as_bytes()),
            Err(SignerError::WrappingKeyUnavailable(_, _))
        ));

        kms.set_read_response("transit/wrapping_key", None);
        assert!(matches!(
            import.import_pem(pem.as_bytes()),
            Err(SignerError::WrappingKeyUnavailable(_, _))
        ));

        kms.set_read_response("transit/wrapping_key", Some(json!({ "public_key": "garbage" })));
        assert!(matches!(
            import.import_pem(pem.as_bytes()),
            Err(SignerError::WrappingKeyUnavailable(_, _))
        ));

        assert!(kms.last_write("transit/keys/imported/import").is_none());
    }

    #[test]
    fn should_report_rejected_import() {
        let kms = Arc::new(MockKms::new());
        kms.add_key("transit", "existing", "rsa-2048", 1, 1);
        let import = KeyImport::new(kms.clone(), "transit", "existing");

        let pem = pkcs8_pem(&generate_key("rsa-2048"));
        match import.import_pem(pem.as_bytes()) {
            Err(SignerError::ImportRejected(path, _)) => assert_eq!(path, "transit/keys/existing/import"),
            other => panic!("expected rejected import, got {:?}", other),
        }
    }

    #[test]
    fn should_import_from_file() {
        let kms = Arc::new(MockKms::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        std::fs::write(&path, pkcs8_pem(&generate_key("rsa-3072"))).unwrap();

        let import = KeyImport::new(kms.clone(), "/transit/", "from-file");
        assert_eq!(import.path(), "transit/keys/from-file");
        assert_eq!(import.import_file(&path).unwrap(), KeyType::Rsa3072);

        assert!(matches!(
            import.import_file(&dir.path().join("missing.pem")),
            Err(SignerError::IoError(_))
        ));
    }
}
