//! Configuration of the KMS connection and of logging.

use std::{convert::Infallible, fmt, io, path::PathBuf, str::FromStr};

use log::{warn, LevelFilter};
use url::Url;

use crate::commons::{error::KmsIoError, util::file};

//------------ Token ---------------------------------------------------------

/// The token used to authenticate against the KMS.
///
/// The token is never shown by `Debug`, so that configs can be logged.
#[derive(Clone, Eq, PartialEq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_string())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token(s)
    }
}

impl FromStr for Token {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Token::from(s))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

//------------ KmsConfig -----------------------------------------------------

/// How to reach and authenticate against the KMS.
#[derive(Clone, Debug)]
pub struct KmsConfig {
    pub address: Url,
    pub token: Token,
    pub ca_cert: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub skip_verify: bool,
}

impl KmsConfig {
    pub fn new(address: Url, token: Token) -> Self {
        KmsConfig {
            address,
            token,
            ca_cert: None,
            ca_path: None,
            skip_verify: false,
        }
    }

    /// Returns all configured root certificate files: the CA file first,
    /// followed by every file in the CA directory.
    pub fn root_cert_paths(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut paths = vec![];
        if let Some(ca_cert) = &self.ca_cert {
            paths.push(ca_cert.clone());
        }
        if let Some(ca_path) = &self.ca_path {
            paths.append(&mut file::list_files(ca_path)?);
        }
        if self.skip_verify {
            warn!("TLS verification of the KMS server is disabled");
        }
        Ok(paths)
    }
}

//------------ LogConfig -----------------------------------------------------

/// Logging settings. All log output goes to stderr, so that stdout only
/// carries command output such as a PEM encoded CSR.
#[derive(Clone, Debug)]
pub struct LogConfig {
    pub log_level: LevelFilter,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            log_level: LevelFilter::Info,
        }
    }
}

impl LogConfig {
    pub fn new(log_level: LevelFilter) -> Self {
        LogConfig { log_level }
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init stderr logging: {}", e)))
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target = self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("rustls", framework_level)
            .level_for("hyper", framework_level)
            .level_for("hyper_util", framework_level)
            .level_for("reqwest", framework_level)
            .level_for("want", framework_level)
            .level_for("h2", framework_level)
    }
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(KmsIoError),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<KmsIoError> for ConfigError {
    fn from(e: KmsIoError) -> Self {
        ConfigError::IoError(e)
    }
}
