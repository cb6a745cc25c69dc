use log::debug;
use reqwest::blocking::Client;
use serde_json::Value;

use crate::{
    commons::httpclient::{self, ClientSettings},
    config::{ConfigError, KmsConfig, Token},
    constants::{VAULT_API_PREFIX, VAULT_TOKEN_HEADER},
};

use super::{KmsClient, Secret};

//------------ VaultClient ---------------------------------------------------

/// A [`KmsClient`] talking to a Vault server over HTTPS.
pub struct VaultClient {
    base: String,
    token: Token,
    client: Client,
}

impl VaultClient {
    pub fn build(config: &KmsConfig) -> Result<Self, ConfigError> {
        let base = config.address.as_str().trim_end_matches('/').to_string();

        let root_certs = config.root_cert_paths()?;
        let settings = ClientSettings {
            root_certs: root_certs.iter().map(|p| p.as_path()).collect(),
            accept_invalid_certs: config.skip_verify,
        };
        let client = httpclient::client(&base, &settings)
            .map_err(|e| ConfigError::Other(format!("Cannot create client for KMS at {}: {}", base, e)))?;

        Ok(VaultClient {
            base,
            token: config.token.clone(),
            client,
        })
    }

    fn uri(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base, VAULT_API_PREFIX, path.trim_start_matches('/'))
    }
}

impl KmsClient for VaultClient {
    fn read(&self, path: &str) -> Result<Option<Secret>, httpclient::Error> {
        let uri = self.uri(path);
        debug!("Reading KMS path: {}", path);
        let headers = httpclient::headers(&uri, Some((VAULT_TOKEN_HEADER, self.token.as_str())))?;
        httpclient::get_opt_json(&self.client, &uri, headers)
    }

    fn write(&self, path: &str, body: &Value) -> Result<Option<Secret>, httpclient::Error> {
        let uri = self.uri(path);
        debug!("Writing KMS path: {}", path);
        let headers = httpclient::headers(&uri, Some((VAULT_TOKEN_HEADER, self.token.as_str())))?;
        httpclient::post_json_with_opt_response(&self.client, &uri, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use url::Url;

    #[test]
    fn should_resolve_api_paths() {
        for address in ["https://vault.example.com:8200", "https://vault.example.com:8200/"] {
            let config = KmsConfig::new(Url::parse(address).unwrap(), Token::from("t"));
            let client = VaultClient::build(&config).unwrap();
            assert_eq!(
                client.uri("transit/keys/my-key"),
                "https://vault.example.com:8200/v1/transit/keys/my-key"
            );
            assert_eq!(
                client.uri("/transit/wrapping_key"),
                "https://vault.example.com:8200/v1/transit/wrapping_key"
            );
        }
    }

    #[test]
    fn should_report_unreachable_server() {
        // nothing listens on port 1
        let config = KmsConfig::new(Url::parse("http://127.0.0.1:1").unwrap(), Token::from("t"));
        let client = VaultClient::build(&config).unwrap();
        let err = client.read("transit/keys/my-key").unwrap_err();
        assert!(matches!(err, httpclient::Error::RequestExecute(_, _)));
    }
}
