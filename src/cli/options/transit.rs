//! Managing and using keys in the transit backend.

use std::{path::PathBuf, sync::Arc};

use log::info;

use crate::{
    cli::{
        report::{KeyInfo, Output},
        Error,
    },
    commons::util::file,
    constants::TRANSIT_DEFAULT_MOUNT,
    kms::KmsClient,
    signing::{
        generate_csr, parse_signature, CsrTemplate, HashAlgorithm, KeyImport, MarshalingAlgorithm, SignatureScheme,
        TransitKey,
    },
};

//------------ Command -------------------------------------------------------

#[derive(clap::Args)]
pub struct Command {
    #[command(subcommand)]
    pub command: Subcommand,
}

impl Command {
    pub fn run(self, kms: Arc<dyn KmsClient>) -> Result<Output, Error> {
        self.command.run(kms)
    }
}

//------------ Subcommand ----------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Subcommand {
    /// Import a PKCS#8 private key as a new transit key
    Import(Import),

    /// Generate a CSR signed by a transit key
    Gencsr(Gencsr),

    /// Show the type, versions and public keys of a transit key
    Info(Info),

    /// Sign a file with a transit key
    Sign(Sign),

    /// Verify a signature made by a transit key
    Verify(Verify),
}

impl Subcommand {
    pub fn run(self, kms: Arc<dyn KmsClient>) -> Result<Output, Error> {
        match self {
            Self::Import(cmd) => cmd.run(kms),
            Self::Gencsr(cmd) => cmd.run(kms),
            Self::Info(cmd) => cmd.run(kms),
            Self::Sign(cmd) => cmd.run(kms),
            Self::Verify(cmd) => cmd.run(kms),
        }
    }
}

//------------ KeyArgs -------------------------------------------------------

/// Identifies a key in the transit backend.
#[derive(clap::Args)]
pub struct KeyArgs {
    /// The name of the transit key
    #[arg(long, short = 't', value_name = "name")]
    pub transit_key: String,

    /// Mount path of the transit backend
    #[arg(long, value_name = "path", default_value = TRANSIT_DEFAULT_MOUNT)]
    pub mount: String,
}

impl KeyArgs {
    fn synced_key(&self, kms: Arc<dyn KmsClient>, version: u64) -> Result<TransitKey, Error> {
        let mut key = TransitKey::new(kms, &self.mount, &self.transit_key);
        key.sync()?;
        if version != 0 {
            key.pin_version(version)?;
        }
        Ok(key)
    }
}

//------------ Import --------------------------------------------------------

#[derive(clap::Args)]
pub struct Import {
    #[command(flatten)]
    pub key: KeyArgs,

    /// The PEM encoded PKCS#8 private key to import
    #[arg(long, short = 'k', value_name = "path")]
    pub pkcs8_pem_key: PathBuf,
}

impl Import {
    pub fn run(self, kms: Arc<dyn KmsClient>) -> Result<Output, Error> {
        let import = KeyImport::new(kms, &self.key.mount, &self.key.transit_key);
        let key_type = import.import_file(&self.pkcs8_pem_key)?;
        Ok(Output::Imported {
            path: import.path(),
            key_type,
        })
    }
}

//------------ Gencsr --------------------------------------------------------

#[derive(clap::Args)]
pub struct Gencsr {
    #[command(flatten)]
    pub key: KeyArgs,

    /// The path to a cfssl CSR JSON file
    #[arg(long, short = 'c', value_name = "path")]
    pub csr_json: PathBuf,

    /// Version of the transit key, or 0 for latest
    #[arg(long, value_name = "version", default_value = "0")]
    pub version: u64,
}

impl Gencsr {
    pub fn run(self, kms: Arc<dyn KmsClient>) -> Result<Output, Error> {
        let template = CsrTemplate::load(&self.csr_json)?;
        let pem = generate_csr(kms, &self.key.mount, &self.key.transit_key, &template, self.version)?;
        Ok(Output::Csr(pem))
    }
}

//------------ Info ----------------------------------------------------------

#[derive(clap::Args)]
pub struct Info {
    #[command(flatten)]
    pub key: KeyArgs,
}

impl Info {
    pub fn run(self, kms: Arc<dyn KmsClient>) -> Result<Output, Error> {
        let key = self.key.synced_key(kms, 0)?;
        Ok(Output::KeyInfo(KeyInfo::from_key(&key)?))
    }
}

//------------ Sign ----------------------------------------------------------

#[derive(clap::Args)]
pub struct Sign {
    #[command(flatten)]
    pub key: KeyArgs,

    /// The file to sign
    #[arg(long, short = 'i', value_name = "path")]
    pub input: PathBuf,

    /// The hash algorithm, e.g. 'sha2-256'
    #[arg(long, value_name = "hash", default_value = "sha2-256")]
    pub hash: HashAlgorithm,

    /// The RSA signature scheme: 'pkcs1v15' or 'pss'. Defaults to
    /// 'pkcs1v15' for RSA keys
    #[arg(long, value_name = "scheme")]
    pub signature_algorithm: Option<SignatureScheme>,

    /// Version of the transit key, or 0 for latest
    #[arg(long, value_name = "version", default_value = "0")]
    pub version: u64,
}

impl Sign {
    pub fn run(self, kms: Arc<dyn KmsClient>) -> Result<Output, Error> {
        let key = self.key.synced_key(kms, self.version)?;
        let data = file::read(&self.input)?;
        let (input, scheme, prehashed) = prepare_input(&key, &data, self.hash, self.signature_algorithm)?;

        let signature = key.sign(&input, scheme, self.hash, MarshalingAlgorithm::Asn1, prehashed)?;
        info!("Signed '{}' with '{}'", self.input.to_string_lossy(), key.path());
        Ok(Output::Signature(signature))
    }
}

//------------ Verify --------------------------------------------------------

#[derive(clap::Args)]
pub struct Verify {
    #[command(flatten)]
    pub key: KeyArgs,

    /// The file that was signed
    #[arg(long, short = 'i', value_name = "path")]
    pub input: PathBuf,

    /// The signature as produced by 'sign', i.e. 'vault:v<version>:<base64>'
    #[arg(long, short = 's', value_name = "signature")]
    pub signature: String,

    /// The hash algorithm, e.g. 'sha2-256'
    #[arg(long, value_name = "hash", default_value = "sha2-256")]
    pub hash: HashAlgorithm,

    /// The RSA signature scheme: 'pkcs1v15' or 'pss'. Defaults to
    /// 'pkcs1v15' for RSA keys
    #[arg(long, value_name = "scheme")]
    pub signature_algorithm: Option<SignatureScheme>,
}

impl Verify {
    pub fn run(self, kms: Arc<dyn KmsClient>) -> Result<Output, Error> {
        let (version, _) = parse_signature(&self.signature)?;
        let encoded = self.signature.rsplit(':').next().unwrap_or_default();

        let mut key = self.key.synced_key(kms, 0)?;
        key.set_signature_version(version)?;

        let data = file::read(&self.input)?;
        let (input, scheme, prehashed) = prepare_input(&key, &data, self.hash, self.signature_algorithm)?;

        let valid = key.verify(&input, encoded, scheme, self.hash, MarshalingAlgorithm::Asn1, prehashed)?;
        Ok(Output::Verification(valid))
    }
}

/// Hashes the data locally unless the key is Ed25519, which the KMS only
/// signs as a complete message.
fn prepare_input(
    key: &TransitKey,
    data: &[u8],
    hash: HashAlgorithm,
    scheme: Option<SignatureScheme>,
) -> Result<(Vec<u8>, SignatureScheme, bool), Error> {
    let key_type = key.snapshot()?.key_type();
    let scheme = scheme.unwrap_or_else(|| SignatureScheme::for_key_type(key_type));
    if key_type == "ed25519" {
        Ok((data.to_vec(), SignatureScheme::Native, false))
    } else {
        Ok((hash.digest(data)?, scheme, true))
    }
}
