//! The kmsutil command line interface.

pub mod options;
pub mod report;

mod client;
pub use self::client::{Error, KmsUtilClient};
