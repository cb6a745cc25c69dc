//! A versioned asymmetric key that lives in the KMS transit backend.
//!
//! A [`TransitKey`] starts out with only its identity. [`TransitKey::sync`]
//! reads the key metadata and the public key of every version that can
//! still be used, and keeps these as a [`KeySnapshot`]. The snapshot is
//! replaced as a whole on every sync and is never refreshed behind the
//! back of the caller.

use std::{fmt, sync::Arc};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, info};
use openssl::pkey::{Id, PKey, Public};
use serde_json::{Map, Value};

use crate::{
    constants::TRANSIT_SIGNATURE_PREFIX,
    kms::{KmsClient, Secret},
};

use super::{
    hash::HashAlgorithm,
    signer::{MarshalingAlgorithm, SignatureScheme},
    SignerError,
};

//------------ VersionedPublicKey --------------------------------------------

/// The public key of a single key version.
#[derive(Clone)]
pub struct VersionedPublicKey {
    version: u64,
    key: PKey<Public>,
}

impl VersionedPublicKey {
    pub fn new(version: u64, key: PKey<Public>) -> Self {
        VersionedPublicKey { version, key }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn key(&self) -> &PKey<Public> {
        &self.key
    }

    /// Returns the key as a PEM encoded SubjectPublicKeyInfo.
    pub fn to_pem(&self) -> Result<String, SignerError> {
        let pem = self.key.public_key_to_pem()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }
}

impl PartialEq for VersionedPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.key.public_eq(&other.key)
    }
}

impl fmt::Debug for VersionedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "VersionedPublicKey({}, {:?})", self.version, self.key.id())
    }
}

//------------ KeySnapshot ---------------------------------------------------

/// The state of a key as read from the KMS by the last sync.
///
/// Invariant: `min_version <= signing_version, signature_version <=
/// latest_version`, and `public_keys` holds one entry for every version in
/// `min_version..=latest_version`, in ascending order.
#[derive(Clone, Debug, PartialEq)]
pub struct KeySnapshot {
    key_type: String,
    latest_version: u64,
    min_version: u64,
    signing_version: u64,
    signature_version: u64,
    public_keys: Vec<VersionedPublicKey>,
}

impl KeySnapshot {
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    pub fn latest_version(&self) -> u64 {
        self.latest_version
    }

    pub fn min_version(&self) -> u64 {
        self.min_version
    }

    /// The version used for new signatures.
    pub fn signing_version(&self) -> u64 {
        self.signing_version
    }

    /// The version tag put on signatures that are sent for verification.
    pub fn signature_version(&self) -> u64 {
        self.signature_version
    }

    pub fn public_keys(&self) -> &[VersionedPublicKey] {
        &self.public_keys
    }

    pub fn public_key(&self, version: u64) -> Option<&VersionedPublicKey> {
        self.public_keys.iter().find(|k| k.version == version)
    }

    fn check_version(&self, requested: u64) -> Result<(), SignerError> {
        if requested < self.min_version || requested > self.latest_version {
            Err(SignerError::InvalidVersion {
                requested,
                min: self.min_version,
                max: self.latest_version,
            })
        } else {
            Ok(())
        }
    }
}

//------------ TransitKey ----------------------------------------------------

/// A handle on a named key under a transit mount.
pub struct TransitKey {
    mount: String,
    name: String,
    client: Arc<dyn KmsClient>,
    snapshot: Option<KeySnapshot>,
}

impl TransitKey {
    pub fn new(client: Arc<dyn KmsClient>, mount: &str, name: &str) -> Self {
        TransitKey {
            mount: mount.trim_matches('/').to_string(),
            name: name.to_string(),
            client,
            snapshot: None,
        }
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The path of the key metadata, e.g. `transit/keys/my-key`.
    pub fn path(&self) -> String {
        format!("{}/keys/{}", self.mount, self.name)
    }

    pub fn is_synced(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Returns the state read by the last successful sync.
    pub fn snapshot(&self) -> Result<&KeySnapshot, SignerError> {
        self.snapshot.as_ref().ok_or_else(|| SignerError::NotSynced(self.path()))
    }

    fn snapshot_mut(&mut self) -> Result<&mut KeySnapshot, SignerError> {
        let path = self.path();
        self.snapshot.as_mut().ok_or(SignerError::NotSynced(path))
    }

    /// Reads the key metadata and all usable public keys from the KMS.
    ///
    /// On any error the previous state of this handle is kept.
    pub fn sync(&mut self) -> Result<(), SignerError> {
        let path = self.path();
        let secret = self
            .client
            .read(&path)?
            .ok_or_else(|| SignerError::NotFound(path.clone()))?;

        let snapshot = Self::parse_snapshot(&path, &secret)?;
        info!(
            "Synchronized key '{}' of type {}, versions {} to {}",
            path, snapshot.key_type, snapshot.min_version, snapshot.latest_version
        );
        self.snapshot = Some(snapshot);
        Ok(())
    }

    fn parse_snapshot(path: &str, secret: &Secret) -> Result<KeySnapshot, SignerError> {
        let key_type = secret
            .get_str("type")
            .ok_or_else(|| SignerError::malformed(path, "field 'type' is missing or not a string"))?
            .to_string();
        let latest_version = secret
            .get_u64("latest_version")
            .ok_or_else(|| SignerError::malformed(path, "field 'latest_version' is missing or not a number"))?;
        let min_version = secret
            .get_u64("min_decryption_version")
            .ok_or_else(|| SignerError::malformed(path, "field 'min_decryption_version' is missing or not a number"))?;

        if min_version == 0 || min_version > latest_version {
            return Err(SignerError::malformed(
                path,
                format!(
                    "min_decryption_version {} does not fit latest_version {}",
                    min_version, latest_version
                ),
            ));
        }

        let keys = secret
            .get("keys")
            .and_then(Value::as_object)
            .ok_or_else(|| SignerError::malformed(path, "field 'keys' is missing or not an object"))?;

        let public_keys = (min_version..=latest_version)
            .map(|version| {
                let key = parse_public_key(path, &key_type, version, keys)?;
                Ok(VersionedPublicKey::new(version, key))
            })
            .collect::<Result<Vec<_>, SignerError>>()?;

        Ok(KeySnapshot {
            key_type,
            latest_version,
            min_version,
            signing_version: latest_version,
            signature_version: latest_version,
            public_keys,
        })
    }

    /// Removes the public key of a version from the synchronized state,
    /// leaving the handle with a gap that a sync never produces.
    #[cfg(test)]
    pub(crate) fn forget_public_key(&mut self, version: u64) -> Result<(), SignerError> {
        self.snapshot_mut()?.public_keys.retain(|k| k.version != version);
        Ok(())
    }

    /// Uses the given version for subsequent signatures.
    pub fn pin_version(&mut self, version: u64) -> Result<(), SignerError> {
        let snapshot = self.snapshot_mut()?;
        snapshot.check_version(version)?;
        snapshot.signing_version = version;
        debug!("Pinned signing version {}", version);
        Ok(())
    }

    /// Sets the version tag used when submitting signatures for
    /// verification, i.e. the version that produced the signature.
    pub fn set_signature_version(&mut self, version: u64) -> Result<(), SignerError> {
        let snapshot = self.snapshot_mut()?;
        snapshot.check_version(version)?;
        snapshot.signature_version = version;
        Ok(())
    }

    /// Asks the KMS to sign the input with the pinned version.
    ///
    /// Returns the signature as produced by the KMS, including its
    /// `vault:v<version>:` prefix.
    pub fn sign(
        &self,
        input: &[u8],
        scheme: SignatureScheme,
        hash: HashAlgorithm,
        marshaling: MarshalingAlgorithm,
        prehashed: bool,
    ) -> Result<String, SignerError> {
        let snapshot = self.snapshot()?;
        let path = format!("{}/sign/{}/{}", self.mount, self.name, hash.kms_name()?);

        let mut body = Self::request_body(input, scheme, marshaling, prehashed);
        body.insert("key_version".to_string(), Value::from(snapshot.signing_version));

        debug!("Requesting signature from '{}' with version {}", path, snapshot.signing_version);
        let response = self.client.write(&path, &Value::Object(body))?;
        response
            .as_ref()
            .and_then(|secret| secret.get_str("signature"))
            .map(str::to_string)
            .ok_or(SignerError::MissingField(path, "signature"))
    }

    /// Asks the KMS whether the signature is valid for the input.
    ///
    /// The signature is the base64 part only, it is tagged with the
    /// signature version before it is sent.
    pub fn verify(
        &self,
        input: &[u8],
        signature: &str,
        scheme: SignatureScheme,
        hash: HashAlgorithm,
        marshaling: MarshalingAlgorithm,
        prehashed: bool,
    ) -> Result<bool, SignerError> {
        let snapshot = self.snapshot()?;
        let path = format!("{}/verify/{}/{}", self.mount, self.name, hash.kms_name()?);

        let mut body = Self::request_body(input, scheme, marshaling, prehashed);
        body.insert(
            "signature".to_string(),
            Value::from(format!(
                "{}{}:{}",
                TRANSIT_SIGNATURE_PREFIX, snapshot.signature_version, signature
            )),
        );

        debug!("Requesting verification from '{}' for version {}", path, snapshot.signature_version);
        let response = self.client.write(&path, &Value::Object(body))?;
        response
            .as_ref()
            .and_then(|secret| secret.get("valid"))
            .and_then(Value::as_bool)
            .ok_or(SignerError::MissingField(path, "valid"))
    }

    fn request_body(
        input: &[u8],
        scheme: SignatureScheme,
        marshaling: MarshalingAlgorithm,
        prehashed: bool,
    ) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("input".to_string(), Value::from(BASE64.encode(input)));
        if let Some(name) = scheme.kms_name() {
            body.insert("signature_algorithm".to_string(), Value::from(name));
        }
        body.insert("marshaling_algorithm".to_string(), Value::from(marshaling.kms_name()));
        body.insert("prehashed".to_string(), Value::from(prehashed));
        body
    }
}

impl fmt::Debug for TransitKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransitKey")
            .field("mount", &self.mount)
            .field("name", &self.name)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// Parses the public key of one version from the `keys` map.
///
/// Keys are expected as PEM. The KMS publishes Ed25519 keys as base64 of
/// the raw key, which is accepted for that type only.
fn parse_public_key(
    path: &str,
    key_type: &str,
    version: u64,
    keys: &Map<String, Value>,
) -> Result<PKey<Public>, SignerError> {
    let encoded = keys
        .get(&version.to_string())
        .and_then(|entry| entry.get("public_key"))
        .and_then(Value::as_str)
        .ok_or_else(|| SignerError::public_key_parse(path, version, "no public key for this version"))?;

    match PKey::public_key_from_pem(encoded.as_bytes()) {
        Ok(key) => Ok(key),
        Err(e) if key_type == "ed25519" => {
            let raw = BASE64
                .decode(encoded.trim())
                .map_err(|_| SignerError::public_key_parse(path, version, e))?;
            PKey::public_key_from_raw_bytes(&raw, Id::ED25519)
                .map_err(|e| SignerError::public_key_parse(path, version, e))
        }
        Err(e) => Err(SignerError::public_key_parse(path, version, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::test::{generate_key, public_key_pem, MockKms};

    fn rsa_key_response(min: u64, latest: u64, versions: &[u64]) -> Value {
        let mut keys = Map::new();
        for version in versions {
            let pem = public_key_pem(&generate_key("rsa-2048"));
            keys.insert(version.to_string(), json!({ "public_key": pem, "name": "rsa-2048" }));
        }
        json!({
            "type": "rsa-2048",
            "latest_version": latest,
            "min_decryption_version": min,
            "keys": keys,
        })
    }

    fn synced_key(kms: &Arc<MockKms>, key_type: &str, versions: usize, min: u64) -> TransitKey {
        kms.add_key("transit", "my-key", key_type, min, versions);
        let mut key = TransitKey::new(kms.clone(), "transit", "my-key");
        key.sync().unwrap();
        key
    }

    #[test]
    fn should_sync_version_range() {
        let kms = Arc::new(MockKms::new());
        kms.set_read_response("transit/keys/my-key", Some(rsa_key_response(2, 4, &[1, 2, 3, 4])));

        let mut key = TransitKey::new(kms.clone(), "transit", "my-key");
        key.sync().unwrap();

        let snapshot = key.snapshot().unwrap();
        assert_eq!(snapshot.key_type(), "rsa-2048");
        assert_eq!(snapshot.min_version(), 2);
        assert_eq!(snapshot.latest_version(), 4);
        assert_eq!(snapshot.signing_version(), 4);
        assert_eq!(snapshot.signature_version(), 4);

        let versions: Vec<_> = snapshot.public_keys().iter().map(|k| k.version()).collect();
        assert_eq!(versions, vec![2, 3, 4]);
    }

    #[test]
    fn should_fail_sync_on_gap_and_keep_state() {
        let kms = Arc::new(MockKms::new());
        kms.set_read_response("transit/keys/my-key", Some(rsa_key_response(2, 4, &[2, 4])));

        let mut key = TransitKey::new(kms.clone(), "transit", "my-key");
        match key.sync() {
            Err(SignerError::PublicKeyParseError { version, .. }) => assert_eq!(version, 3),
            other => panic!("expected public key error, got {:?}", other),
        }
        assert!(!key.is_synced());

        kms.set_read_response("transit/keys/my-key", Some(rsa_key_response(1, 2, &[1, 2])));
        key.sync().unwrap();
        let before = key.snapshot().unwrap().clone();

        kms.set_read_response("transit/keys/my-key", Some(rsa_key_response(1, 3, &[1, 3])));
        assert!(key.sync().is_err());
        assert_eq!(key.snapshot().unwrap(), &before);
    }

    #[test]
    fn should_fail_sync_on_malformed_metadata() {
        let kms = Arc::new(MockKms::new());
        let mut key = TransitKey::new(kms.clone(), "transit", "my-key");

        assert!(matches!(key.sync(), Err(SignerError::NotFound(_))));

        let mut response = rsa_key_response(1, 1, &[1]);
        response["latest_version"] = json!("four");
        kms.set_read_response("transit/keys/my-key", Some(response));
        assert!(matches!(key.sync(), Err(SignerError::MalformedResponse(_, _))));

        let mut response = rsa_key_response(1, 1, &[1]);
        response.as_object_mut().unwrap().remove("type");
        kms.set_read_response("transit/keys/my-key", Some(response));
        assert!(matches!(key.sync(), Err(SignerError::MalformedResponse(_, _))));

        let response = rsa_key_response(3, 2, &[2, 3]);
        kms.set_read_response("transit/keys/my-key", Some(response));
        assert!(matches!(key.sync(), Err(SignerError::MalformedResponse(_, _))));

        let mut response = rsa_key_response(1, 1, &[1]);
        response["keys"]["1"]["public_key"] = json!("not a key");
        kms.set_read_response("transit/keys/my-key", Some(response));
        assert!(matches!(key.sync(), Err(SignerError::PublicKeyParseError { .. })));

        assert!(!key.is_synced());
    }

    #[test]
    fn sync_is_idempotent() {
        let kms = Arc::new(MockKms::new());
        let mut key = synced_key(&kms, "ecdsa-p256", 3, 1);
        let first = key.snapshot().unwrap().clone();
        key.sync().unwrap();
        assert_eq!(key.snapshot().unwrap(), &first);
        assert_eq!(first.public_keys().len(), 3);
    }

    #[test]
    fn should_accept_raw_ed25519_public_keys() {
        let kms = Arc::new(MockKms::new());
        let key = synced_key(&kms, "ed25519", 2, 1);
        let snapshot = key.snapshot().unwrap();
        assert_eq!(snapshot.public_keys().len(), 2);
        assert_eq!(snapshot.public_keys()[0].key().id(), Id::ED25519);
    }

    #[test]
    fn should_require_sync() {
        let kms = Arc::new(MockKms::new());
        let mut key = TransitKey::new(kms.clone(), "transit", "my-key");

        assert!(matches!(key.snapshot(), Err(SignerError::NotSynced(_))));
        assert!(matches!(key.pin_version(1), Err(SignerError::NotSynced(_))));
        let res = key.sign(
            b"data",
            SignatureScheme::Pkcs1v15,
            HashAlgorithm::Sha256,
            MarshalingAlgorithm::Asn1,
            false,
        );
        assert!(matches!(res, Err(SignerError::NotSynced(_))));
        assert!(kms.requests().is_empty());
    }

    #[test]
    fn should_pin_version_within_range() {
        let kms = Arc::new(MockKms::new());
        let mut key = synced_key(&kms, "rsa-2048", 4, 2);

        match key.pin_version(5) {
            Err(SignerError::InvalidVersion { requested, min, max }) => {
                assert_eq!((requested, min, max), (5, 2, 4));
            }
            other => panic!("expected invalid version, got {:?}", other),
        }
        assert!(key.pin_version(1).is_err());
        assert!(key.set_signature_version(0).is_err());
        key.pin_version(3).unwrap();

        let digest = HashAlgorithm::Sha256.digest(b"to be signed").unwrap();
        let signature = key
            .sign(&digest, SignatureScheme::Pkcs1v15, HashAlgorithm::Sha256, MarshalingAlgorithm::Asn1, true)
            .unwrap();
        assert!(signature.starts_with("vault:v3:"));

        let request = kms.last_write("transit/sign/my-key/sha2-256").unwrap();
        assert_eq!(request["key_version"], json!(3));
        assert_eq!(request["signature_algorithm"], json!("pkcs1v15"));
        assert_eq!(request["marshaling_algorithm"], json!("asn1"));
        assert_eq!(request["prehashed"], json!(true));
        assert_eq!(request["input"], json!(BASE64.encode(&digest)));
    }

    #[test]
    fn should_omit_scheme_for_native_signatures() {
        let kms = Arc::new(MockKms::new());
        let key = synced_key(&kms, "ecdsa-p384", 1, 1);

        let digest = HashAlgorithm::Sha384.digest(b"to be signed").unwrap();
        key.sign(&digest, SignatureScheme::Native, HashAlgorithm::Sha384, MarshalingAlgorithm::Asn1, true)
            .unwrap();

        let request = kms.last_write("transit/sign/my-key/sha2-384").unwrap();
        assert!(request.get("signature_algorithm").is_none());
    }

    #[test]
    fn should_verify_with_signature_version() {
        let kms = Arc::new(MockKms::new());
        let mut key = synced_key(&kms, "ecdsa-p256", 2, 1);
        key.pin_version(1).unwrap();

        let message = b"a message";
        let signature = key
            .sign(message, SignatureScheme::Native, HashAlgorithm::Sha256, MarshalingAlgorithm::Asn1, false)
            .unwrap();
        let raw = signature.strip_prefix("vault:v1:").unwrap();

        // tagged with latest (2) by default, which did not produce it
        let valid = key
            .verify(message, raw, SignatureScheme::Native, HashAlgorithm::Sha256, MarshalingAlgorithm::Asn1, false)
            .unwrap();
        assert!(!valid);
        let request = kms.last_write("transit/verify/my-key/sha2-256").unwrap();
        assert_eq!(request["signature"], json!(format!("vault:v2:{}", raw)));

        key.set_signature_version(1).unwrap();
        let valid = key
            .verify(message, raw, SignatureScheme::Native, HashAlgorithm::Sha256, MarshalingAlgorithm::Asn1, false)
            .unwrap();
        assert!(valid);
    }

    #[test]
    fn should_report_missing_response_fields() {
        let kms = Arc::new(MockKms::new());
        let key = synced_key(&kms, "rsa-2048", 1, 1);

        kms.set_write_response("transit/sign/my-key/sha2-256", Some(json!({ "key_version": 1 })));
        let res = key.sign(
            b"x",
            SignatureScheme::Pkcs1v15,
            HashAlgorithm::Sha256,
            MarshalingAlgorithm::Asn1,
            false,
        );
        assert!(matches!(res, Err(SignerError::MissingField(_, "signature"))));

        kms.set_write_response("transit/verify/my-key/sha2-256", None);
        let res = key.verify(
            b"x",
            "AAAA",
            SignatureScheme::Pkcs1v15,
            HashAlgorithm::Sha256,
            MarshalingAlgorithm::Asn1,
            false,
        );
        assert!(matches!(res, Err(SignerError::MissingField(_, "valid"))));
    }

    #[test]
    fn should_reject_unsupported_hash_before_calling_kms() {
        let kms = Arc::new(MockKms::new());
        let key = synced_key(&kms, "rsa-2048", 1, 1);
        let requests = kms.requests().len();

        let res = key.sign(b"x", SignatureScheme::Pkcs1v15, HashAlgorithm::Md5, MarshalingAlgorithm::Asn1, false);
        assert!(matches!(res, Err(SignerError::UnsupportedHash(HashAlgorithm::Md5))));
        assert_eq!(kms.requests().len(), requests);
    }
}
