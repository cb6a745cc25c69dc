//! Various kmsutil-wide constants.

//------------ Binary Names -------------------------------------------------

/// The friendly name of the `kmsutil` binary.
pub const KMSUTIL_APP: &str = "kmsutil";

/// The version of this crate, used in the user agent.
pub const KMSUTIL_VERSION: &str = env!("CARGO_PKG_VERSION");


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. The
/// default is “info.”
pub const KMSUTIL_ENV_LOG_LEVEL: &str = "KMSUTIL_LOG_LEVEL";

/// The address of the Vault server.
pub const VAULT_ENV_ADDR: &str = "VAULT_ADDR";

/// The token used to authenticate against Vault.
pub const VAULT_ENV_TOKEN: &str = "VAULT_TOKEN";

/// Path to a PEM encoded CA file used to verify the Vault server.
pub const VAULT_ENV_CACERT: &str = "VAULT_CACERT";

/// Path to a directory of PEM encoded CA files.
pub const VAULT_ENV_CAPATH: &str = "VAULT_CAPATH";

/// Disables TLS verification of the Vault server when true.
pub const VAULT_ENV_SKIP_VERIFY: &str = "VAULT_SKIP_VERIFY";


//------------ HTTP Client ---------------------------------------------------

/// Timeout for a single request to the KMS.
pub const HTTP_CLIENT_TIMEOUT_SECS: u64 = 30;

/// The header carrying the Vault token, lower case as required for a
/// static header name.
pub const VAULT_TOKEN_HEADER: &str = "x-vault-token";

/// The API prefix for all Vault paths.
pub const VAULT_API_PREFIX: &str = "v1";


//------------ Transit -------------------------------------------------------

/// The default mount path of the transit backend.
pub const TRANSIT_DEFAULT_MOUNT: &str = "transit";

/// The prefix of every signature produced by the transit backend.
pub const TRANSIT_SIGNATURE_PREFIX: &str = "vault:v";

/// The wire encoding requested for structured (ASN.1) signatures.
pub const TRANSIT_MARSHALING_ASN1: &str = "asn1";

/// The hash function declared when importing a wrapped key.
///
/// This is the OAEP hash used to wrap the ephemeral key, not a property of
/// the imported key.
pub const TRANSIT_IMPORT_HASH_FUNCTION: &str = "SHA256";

/// Size in bytes of the ephemeral AES key used to wrap an imported key.
pub const EPHEMERAL_KEY_LEN: usize = 32;
