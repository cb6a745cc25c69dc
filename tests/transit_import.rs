//! Importing keys through the command line interface.

use std::sync::Arc;

use clap::Parser;
use kmsutil::{
    cli::{options::Options, report::Output, Error, KmsUtilClient},
    signing::{KeyType, SignerError},
    test::{generate_key, pkcs8_pem, save_file, MockKms},
};

fn options(args: &[&str]) -> Options {
    let mut all = vec!["kmsutil", "--address", "https://vault.example.com:8200", "--token", "s.token"];
    all.extend_from_slice(args);
    Options::try_parse_from(all).unwrap()
}

#[test]
fn import_then_use_key() {
    let kms = Arc::new(MockKms::new());
    let client = KmsUtilClient::new(kms.clone());
    let dir = tempfile::tempdir().unwrap();

    let key = generate_key("rsa-2048");
    let path = save_file(dir.path(), "key.pem", pkcs8_pem(&key).as_bytes());
    let path = path.to_string_lossy().to_string();

    let output = client
        .process(options(&["transit", "import", "-t", "imported", "-k", &path]).command)
        .unwrap();
    assert_eq!(
        output,
        Output::Imported {
            path: "transit/keys/imported".to_string(),
            key_type: KeyType::Rsa2048,
        }
    );

    let imported = kms.imported("transit", "imported").unwrap();
    assert_eq!(imported.pkcs8_der, key.private_key_to_pkcs8().unwrap());

    // the imported key is now usable
    let output = client
        .process(options(&["transit", "info", "-t", "imported"]).command)
        .unwrap();
    match output {
        Output::KeyInfo(info) => {
            assert_eq!(info.key_type, "rsa-2048");
            assert_eq!(info.public_keys.len(), 1);
            assert_eq!(
                info.public_keys[0].public_key,
                String::from_utf8(key.public_key_to_pem().unwrap()).unwrap()
            );
        }
        other => panic!("expected key info, got {:?}", other),
    }
}

#[test]
fn import_into_other_mount() {
    let kms = Arc::new(MockKms::new());
    let client = KmsUtilClient::new(kms.clone());
    let dir = tempfile::tempdir().unwrap();
    let path = save_file(dir.path(), "key.pem", pkcs8_pem(&generate_key("ed25519")).as_bytes());
    let path = path.to_string_lossy().to_string();

    client
        .process(options(&["transit", "import", "--mount", "pki-transit", "-t", "edkey", "-k", &path]).command)
        .unwrap();
    assert!(kms.imported("pki-transit", "edkey").is_some());
    assert!(kms.imported("transit", "edkey").is_none());
}

#[test]
fn import_fails_on_missing_file() {
    let kms = Arc::new(MockKms::new());
    let client = KmsUtilClient::new(kms.clone());

    let res = client.process(options(&["transit", "import", "-t", "k", "-k", "/does/not/exist.pem"]).command);
    assert!(matches!(res, Err(Error::SignerError(SignerError::IoError(_)))));
    assert!(kms.requests().is_empty());
}
