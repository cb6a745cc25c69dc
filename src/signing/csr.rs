//! Certificate signing requests for keys held in the KMS.
//!
//! Requests are described in the cfssl CSR JSON format. The PKCS#10
//! structure is built by rcgen, which calls back into a [`RemoteCsrKey`]
//! for the signature.

use std::{net::IpAddr, path::Path, sync::Arc};

use log::{debug, info};
use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};
use serde::{Deserialize, Serialize};

use crate::{commons::util::file, kms::KmsClient};

use super::{
    key::TransitKey,
    signer::{RemoteCsrKey, SignatureScheme, TransitSigner},
    SignerError,
};

//------------ CsrTemplate ---------------------------------------------------

/// A certificate request template in the cfssl JSON format.
///
/// Any other cfssl fields, such as `key`, are ignored: the key is the one
/// held by the KMS.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CsrTemplate {
    #[serde(rename = "CN", default)]
    pub common_name: String,

    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub names: Vec<CsrName>,
}

/// One set of subject name attributes.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CsrName {
    #[serde(rename = "C", default, skip_serializing_if = "String::is_empty")]
    pub country: String,

    #[serde(rename = "ST", default, skip_serializing_if = "String::is_empty")]
    pub state: String,

    #[serde(rename = "L", default, skip_serializing_if = "String::is_empty")]
    pub locality: String,

    #[serde(rename = "O", default, skip_serializing_if = "String::is_empty")]
    pub organization: String,

    #[serde(rename = "OU", default, skip_serializing_if = "String::is_empty")]
    pub organizational_unit: String,
}

impl CsrTemplate {
    pub fn load(path: &Path) -> Result<Self, SignerError> {
        let bytes = file::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SignerError::Csr(format!("invalid template '{}': {}", path.to_string_lossy(), e)))
    }

    pub fn distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        for name in &self.names {
            let attributes = [
                (DnType::CountryName, &name.country),
                (DnType::StateOrProvinceName, &name.state),
                (DnType::LocalityName, &name.locality),
                (DnType::OrganizationName, &name.organization),
                (DnType::OrganizationalUnitName, &name.organizational_unit),
            ];
            for (dn_type, value) in attributes {
                if !value.is_empty() {
                    dn.push(dn_type, value.as_str());
                }
            }
        }
        if !self.common_name.is_empty() {
            dn.push(DnType::CommonName, self.common_name.as_str());
        }
        dn
    }

    /// Classifies each host the way cfssl does: IP addresses, then email
    /// addresses, then URIs. Everything else is a DNS name.
    pub fn subject_alt_names(&self) -> Result<Vec<SanType>, SignerError> {
        self.hosts
            .iter()
            .map(|host| {
                if let Ok(ip) = host.parse::<IpAddr>() {
                    return Ok(SanType::IpAddress(ip));
                }
                let value = Ia5String::try_from(host.as_str())
                    .map_err(|e| SignerError::Csr(format!("invalid host '{}': {}", host, e)))?;
                if host.contains('@') {
                    Ok(SanType::Rfc822Name(value))
                } else if host.contains("://") {
                    Ok(SanType::URI(value))
                } else {
                    Ok(SanType::DnsName(value))
                }
            })
            .collect()
    }

    fn params(&self) -> Result<CertificateParams, SignerError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = self.distinguished_name();
        params.subject_alt_names = self.subject_alt_names()?;
        Ok(params)
    }
}

//------------ generate_csr --------------------------------------------------

/// Creates a PEM encoded CSR signed by a key in the KMS.
///
/// A `version` of 0 uses the latest version of the key, any other version
/// must be within the usable range of the key.
pub fn generate_csr(
    client: Arc<dyn KmsClient>,
    mount: &str,
    name: &str,
    template: &CsrTemplate,
    version: u64,
) -> Result<String, SignerError> {
    let mut key = TransitKey::new(client, mount, name);
    key.sync()?;
    if version != 0 {
        key.pin_version(version)?;
    }

    let snapshot = key.snapshot()?;
    let scheme = SignatureScheme::for_key_type(snapshot.key_type());
    debug!(
        "Creating CSR with version {} of '{}' using scheme {}",
        snapshot.signing_version(),
        key.path(),
        scheme
    );

    let signer = TransitSigner::new(key, scheme)?;
    let remote = RemoteCsrKey::new(signer)?;
    let errors = remote.errors();
    let key_pair = KeyPair::from_remote(Box::new(remote)).map_err(|e| SignerError::Csr(e.to_string()))?;

    let params = template.params()?;
    let csr = params.serialize_request(&key_pair).map_err(|e| {
        // prefer the signer error over the opaque one from rcgen
        let signer_error = errors.lock().ok().and_then(|mut slot| slot.take());
        signer_error.unwrap_or_else(|| SignerError::Csr(e.to_string()))
    })?;
    let pem = csr.pem().map_err(|e| SignerError::Csr(e.to_string()))?;

    info!("PEM encoded CSR");
    Ok(pem)
}

#[cfg(test)]
mod tests {
    use super::*;

    use openssl::{nid::Nid, x509::X509Req};
    use serde_json::json;

    use crate::test::MockKms;

    fn template() -> CsrTemplate {
        serde_json::from_value(json!({
            "CN": "signer.example.com",
            "hosts": ["signer.example.com", "192.0.2.1", "ops@example.com", "spiffe://example.com/signer"],
            "key": { "algo": "rsa", "size": 2048 },
            "names": [{ "C": "BE", "L": "Brussels", "O": "Example", "OU": "Ops", "ST": "Brussels" }],
        }))
        .unwrap()
    }

    fn common_name(req: &X509Req) -> String {
        let entry = req.subject_name().entries_by_nid(Nid::COMMONNAME).next().unwrap();
        entry.data().as_utf8().unwrap().to_string()
    }

    fn check_csr(key_type: &str) {
        let kms = Arc::new(MockKms::new());
        kms.add_key("transit", "csr-key", key_type, 1, 1);

        let pem = generate_csr(kms.clone(), "transit", "csr-key", &template(), 0).unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));

        let req = X509Req::from_pem(pem.as_bytes()).unwrap();
        let public = req.public_key().unwrap();
        assert!(req.verify(&public).unwrap(), "CSR for {} does not verify", key_type);
        assert!(public.public_eq(&kms.private_key("transit", "csr-key", 1).unwrap()));
        assert_eq!(common_name(&req), "signer.example.com");
    }

    #[test]
    fn should_create_rsa_csr() {
        check_csr("rsa-2048");
    }

    #[test]
    fn should_create_ecdsa_csrs() {
        check_csr("ecdsa-p256");
        check_csr("ecdsa-p384");
    }

    #[test]
    fn should_create_ed25519_csr() {
        check_csr("ed25519");
    }

    #[test]
    fn should_use_pinned_version() {
        let kms = Arc::new(MockKms::new());
        kms.add_key("transit", "csr-key", "ecdsa-p256", 1, 3);

        let pem = generate_csr(kms.clone(), "transit", "csr-key", &template(), 2).unwrap();
        let req = X509Req::from_pem(pem.as_bytes()).unwrap();
        let public = req.public_key().unwrap();
        assert!(req.verify(&public).unwrap());
        assert!(public.public_eq(&kms.private_key("transit", "csr-key", 2).unwrap()));

        let request = kms.last_write("transit/sign/csr-key/sha2-256").unwrap();
        assert_eq!(request["key_version"], json!(2));

        assert!(matches!(
            generate_csr(kms.clone(), "transit", "csr-key", &template(), 4),
            Err(SignerError::InvalidVersion { requested: 4, min: 1, max: 3 })
        ));
    }

    #[test]
    fn should_surface_signer_error() {
        let kms = Arc::new(MockKms::new());
        kms.add_key("transit", "csr-key", "rsa-2048", 1, 1);
        kms.set_write_response("transit/sign/csr-key/sha2-256", Some(json!({ "signature": "nope" })));

        match generate_csr(kms.clone(), "transit", "csr-key", &template(), 0) {
            Err(SignerError::MalformedSignature(s)) => assert_eq!(s, "nope"),
            other => panic!("expected malformed signature, got {:?}", other),
        }
    }

    #[test]
    fn should_reject_key_types_without_csr_support() {
        let kms = Arc::new(MockKms::new());
        kms.add_key("transit", "csr-key", "ecdsa-p521", 1, 1);
        assert!(matches!(
            generate_csr(kms.clone(), "transit", "csr-key", &template(), 0),
            Err(SignerError::UnsupportedKeyType(_))
        ));
        assert!(kms.last_write("transit/sign/csr-key/sha2-512").is_none());
    }

    #[test]
    fn should_classify_hosts() {
        let sans = template().subject_alt_names().unwrap();
        assert_eq!(
            sans,
            vec![
                SanType::DnsName(Ia5String::try_from("signer.example.com").unwrap()),
                SanType::IpAddress("192.0.2.1".parse().unwrap()),
                SanType::Rfc822Name(Ia5String::try_from("ops@example.com").unwrap()),
                SanType::URI(Ia5String::try_from("spiffe://example.com/signer").unwrap()),
            ]
        );

        let bad = CsrTemplate {
            hosts: vec!["bücher.example".to_string()],
            ..Default::default()
        };
        assert!(matches!(bad.subject_alt_names(), Err(SignerError::Csr(_))));
    }

    #[test]
    fn should_load_template_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = crate::test::save_file(dir.path(), "csr.json", br#"{"CN":"a","hosts":["a.example"]}"#);
        let template = CsrTemplate::load(&path).unwrap();
        assert_eq!(template.common_name, "a");
        assert_eq!(template.hosts, vec!["a.example".to_string()]);
        assert!(template.names.is_empty());

        let path = crate::test::save_file(dir.path(), "bad.json", b"{ not json");
        assert!(matches!(CsrTemplate::load(&path), Err(SignerError::Csr(_))));
    }
}
