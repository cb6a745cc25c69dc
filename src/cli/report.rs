//! Reporting the outcome of a command.

use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::signing::{KeyType, SignerError, TransitKey};

//------------ ReportFormat --------------------------------------------------

/// The format used to show the outcome of a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(ReportError::UnrecognizedFormat(s.to_string())),
        }
    }
}

//------------ Output --------------------------------------------------------

/// The result of a successful command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Output {
    Imported { path: String, key_type: KeyType },
    Csr(String),
    KeyInfo(KeyInfo),
    Signature(String),
    Verification(bool),
}

impl Output {
    pub fn report(&self, format: ReportFormat) -> Result<Option<String>, ReportError> {
        match format {
            ReportFormat::Text => Ok(self.text()),
            ReportFormat::Json => {
                let json = match self {
                    Output::Imported { path, key_type } => {
                        serde_json::json!({ "path": path, "type": key_type.kms_name() })
                    }
                    Output::Csr(pem) => serde_json::json!({ "csr": pem }),
                    Output::KeyInfo(info) => serde_json::to_value(info)?,
                    Output::Signature(signature) => serde_json::json!({ "signature": signature }),
                    Output::Verification(valid) => serde_json::json!({ "valid": valid }),
                };
                Ok(Some(serde_json::to_string_pretty(&json)?))
            }
        }
    }

    fn text(&self) -> Option<String> {
        match self {
            // the import is logged, there is nothing to print
            Output::Imported { .. } => None,
            Output::Csr(pem) => Some(pem.trim_end().to_string()),
            Output::KeyInfo(info) => Some(info.to_string()),
            Output::Signature(signature) => Some(signature.clone()),
            Output::Verification(true) => Some("valid".to_string()),
            Output::Verification(false) => Some("invalid".to_string()),
        }
    }

    /// The exit status for the process. A signature that did not verify
    /// is reported as a failure.
    pub fn exit_status(&self) -> i32 {
        match self {
            Output::Verification(false) => 1,
            _ => 0,
        }
    }
}

//------------ KeyInfo -------------------------------------------------------

/// The synchronized state of a transit key.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyInfo {
    pub path: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub latest_version: u64,
    pub min_version: u64,
    pub public_keys: Vec<VersionInfo>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VersionInfo {
    pub version: u64,
    pub public_key: String,
}

impl KeyInfo {
    pub fn from_key(key: &TransitKey) -> Result<Self, SignerError> {
        let snapshot = key.snapshot()?;
        let public_keys = snapshot
            .public_keys()
            .iter()
            .map(|k| {
                Ok(VersionInfo {
                    version: k.version(),
                    public_key: k.to_pem()?,
                })
            })
            .collect::<Result<Vec<_>, SignerError>>()?;

        Ok(KeyInfo {
            path: key.path(),
            key_type: snapshot.key_type().to_string(),
            latest_version: snapshot.latest_version(),
            min_version: snapshot.min_version(),
            public_keys,
        })
    }
}

impl fmt::Display for KeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Key:            {}", self.path)?;
        writeln!(f, "Type:           {}", self.key_type)?;
        writeln!(f, "Latest version: {}", self.latest_version)?;
        writeln!(f, "Min version:    {}", self.min_version)?;
        for key in &self.public_keys {
            writeln!(f)?;
            writeln!(f, "Version {}:", key.version)?;
            write!(f, "{}", key.public_key)?;
        }
        Ok(())
    }
}

//------------ ReportError ---------------------------------------------------

#[derive(Debug)]
pub enum ReportError {
    UnrecognizedFormat(String),
    Json(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReportError::UnrecognizedFormat(s) => write!(f, "Unrecognized format: {}", s),
            ReportError::Json(e) => write!(f, "Cannot render JSON: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::Json(e.to_string())
    }
}
