//! Access to the remote key management service.
//!
//! The signing and import logic only talks to the KMS through the
//! [`KmsClient`] trait, which offers the logical read and write operations
//! of a Vault style API. [`VaultClient`] is the HTTP implementation.

mod vault;
pub use self::vault::VaultClient;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::commons::httpclient;

//------------ KmsClient -----------------------------------------------------

/// The logical operations offered by the KMS.
///
/// Paths are relative to the API root, e.g. `transit/keys/my-key`.
pub trait KmsClient: Send + Sync {
    /// Reads the record at the given path. Returns `None` if there is no
    /// record.
    fn read(&self, path: &str) -> Result<Option<Secret>, httpclient::Error>;

    /// Writes the given body to the path. Returns the response record, if
    /// the KMS included one.
    fn write(&self, path: &str, body: &Value) -> Result<Option<Secret>, httpclient::Error>;
}

//------------ Secret --------------------------------------------------------

/// The response envelope used by the KMS for reads and writes.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Secret {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Map<String, Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
    Ok(Option::<Map<String, Value>>::deserialize(d)?.unwrap_or_default())
}

impl Secret {
    pub fn new(data: Map<String, Value>) -> Self {
        Secret { data }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Gets a non-negative integer field. Numeric strings are accepted as
    /// well as JSON numbers.
    pub fn get_u64(&self, field: &str) -> Option<u64> {
        match self.get(field)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<Value> for Secret {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(data) => Secret { data },
            _ => Secret::default(),
        }
    }
}
