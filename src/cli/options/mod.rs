//! The options for the kmsutil command line tool.

//------------ Sub-modules ---------------------------------------------------

pub mod transit;

//------------ Content -------------------------------------------------------

use std::path::PathBuf;

use clap::{builder::FalseyValueParser, Parser};
use log::LevelFilter;
use url::Url;

use crate::{
    cli::report::ReportFormat,
    config::{KmsConfig, LogConfig, Token},
    constants::{
        KMSUTIL_ENV_LOG_LEVEL, VAULT_ENV_ADDR, VAULT_ENV_CACERT, VAULT_ENV_CAPATH, VAULT_ENV_SKIP_VERIFY,
        VAULT_ENV_TOKEN,
    },
};

//------------ Options -------------------------------------------------------

/// The command line options for kmsutil.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Import keys into, and sign with keys held in, a Vault transit backend.",
)]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won’t result in usable options, exits the process.
    pub fn from_args() -> Self {
        Self::parse()
    }
}

//------------ GeneralOptions ------------------------------------------------

/// The options common to all commands.
#[derive(clap::Args)]
pub struct GeneralOptions {
    /// The address of the Vault server.
    #[arg(long, env = VAULT_ENV_ADDR, value_name = "URL")]
    pub address: Url,

    /// The token used to authenticate against Vault.
    #[arg(long, env = VAULT_ENV_TOKEN, hide_env_values = true)]
    pub token: Token,

    /// A PEM encoded CA certificate used to verify the Vault server.
    #[arg(long, env = VAULT_ENV_CACERT, value_name = "path")]
    pub ca_cert: Option<PathBuf>,

    /// A directory of PEM encoded CA certificates.
    #[arg(long, env = VAULT_ENV_CAPATH, value_name = "dir")]
    pub ca_path: Option<PathBuf>,

    /// Do not verify the TLS certificate of the Vault server.
    #[arg(long, env = VAULT_ENV_SKIP_VERIFY, value_parser = FalseyValueParser::new())]
    pub skip_verify: bool,

    /// The log level, e.g. 'warn', 'info' or 'debug'.
    #[arg(long, env = KMSUTIL_ENV_LOG_LEVEL, default_value = "info")]
    pub log_level: LevelFilter,

    /// Log at debug level, overrides '--log-level'.
    #[arg(short, long)]
    pub debug: bool,

    /// Report format
    #[arg(short, long, default_value = "text")]
    pub format: ReportFormat,
}

impl GeneralOptions {
    pub fn kms_config(&self) -> KmsConfig {
        let mut config = KmsConfig::new(self.address.clone(), self.token.clone());
        config.ca_cert = self.ca_cert.clone();
        config.ca_path = self.ca_path.clone();
        config.skip_verify = self.skip_verify;
        config
    }

    pub fn log_config(&self) -> LogConfig {
        if self.debug {
            LogConfig::new(LevelFilter::Debug)
        } else {
            LogConfig::new(self.log_level)
        }
    }
}

//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Manage and use keys in the transit backend
    Transit(transit::Command),
}
