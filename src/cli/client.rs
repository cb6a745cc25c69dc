use std::{fmt, sync::Arc};

use log::error;

use crate::{
    cli::{
        options::{Command, Options},
        report::{Output, ReportError, ReportFormat},
    },
    commons::error::KmsIoError,
    config::ConfigError,
    kms::{KmsClient, VaultClient},
    signing::SignerError,
};

/// Runs kmsutil commands against a KMS.
pub struct KmsUtilClient {
    kms: Arc<dyn KmsClient>,
}

impl KmsUtilClient {
    pub fn new(kms: Arc<dyn KmsClient>) -> Self {
        KmsUtilClient { kms }
    }

    /// Processes the options and prints the outcome. Returns the exit
    /// status for the process.
    ///
    /// Errors are logged rather than printed, so that stdout only ever
    /// carries the output of a successful command.
    pub fn report(options: Options) -> i32 {
        let format = options.general.format;
        let result = VaultClient::build(&options.general.kms_config())
            .map_err(Error::from)
            .and_then(|vault| KmsUtilClient::new(Arc::new(vault)).process(options.command));

        match result {
            Ok(output) => Self::print(&output, format),
            Err(e) => {
                error!("{}", e);
                1
            }
        }
    }

    pub fn process(&self, command: Command) -> Result<Output, Error> {
        match command {
            Command::Transit(cmd) => cmd.run(self.kms.clone()),
        }
    }

    fn print(output: &Output, format: ReportFormat) -> i32 {
        match output.report(format) {
            Ok(Some(text)) => {
                println!("{}", text);
                output.exit_status()
            }
            Ok(None) => output.exit_status(),
            Err(e) => {
                error!("{}", e);
                1
            }
        }
    }
}

//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    ConfigError(ConfigError),
    SignerError(SignerError),
    IoError(KmsIoError),
    ReportError(ReportError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ConfigError(e) => write!(f, "Configuration error: {}", e),
            Error::SignerError(e) => e.fmt(f),
            Error::IoError(e) => e.fmt(f),
            Error::ReportError(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::ConfigError(e)
    }
}

impl From<SignerError> for Error {
    fn from(e: SignerError) -> Self {
        Error::SignerError(e)
    }
}

impl From<KmsIoError> for Error {
    fn from(e: KmsIoError) -> Self {
        Error::IoError(e)
    }
}

impl From<ReportError> for Error {
    fn from(e: ReportError) -> Self {
        Error::ReportError(e)
    }
}
