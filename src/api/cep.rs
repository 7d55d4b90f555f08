//! Postal-code (CEP) lookup used to prefill delivery addresses.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::domain::value_objects::PostalCode;
use crate::{Result, StorefrontError};

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CepAddress {
    #[serde(default)] pub cep: String,
    #[serde(default)] pub logradouro: String,
    #[serde(default)] pub complemento: String,
    #[serde(default)] pub bairro: String,
    #[serde(default)] pub localidade: String,
    #[serde(default)] pub uf: String,
    #[serde(default)] pub(crate) erro: Option<Value>,
}

impl CepAddress {
    /// The service answers unknown codes with `200 {"erro": true}` (or `"true"`).
    pub fn is_not_found(&self) -> bool {
        matches!(&self.erro, Some(Value::Bool(true))) || matches!(&self.erro, Some(Value::String(s)) if s == "true")
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn lookup(&self, cep: PostalCode) -> Result<CepAddress>;
}

#[derive(Debug, Clone)]
pub struct CepClient {
    base_url: String,
    http: Client,
}

impl CepClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self { base_url: config.cep_url.clone(), http })
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: Client::new() }
    }

    /// Accepts the code as typed (with or without punctuation).
    pub async fn fetch_address(&self, raw: &str) -> Result<CepAddress> {
        self.lookup(PostalCode::parse(raw)?).await
    }
}

#[async_trait]
impl AddressLookup for CepClient {
    #[instrument(skip(self), fields(cep = %cep))]
    async fn lookup(&self, cep: PostalCode) -> Result<CepAddress> {
        let url = format!("{}/{}/json/", self.base_url.trim_end_matches('/'), cep.as_str());
        let response = self.http.get(url).send().await.map_err(|e| {
            debug!(error = %e, "cep request failed");
            StorefrontError::AddressLookupFailed
        })?;
        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "cep lookup rejected");
            return Err(StorefrontError::AddressLookupFailed);
        }
        let address: CepAddress = response.json().await.map_err(|_| StorefrontError::AddressLookupFailed)?;
        if address.is_not_found() {
            return Err(StorefrontError::AddressNotFound);
        }
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_flag() {
        let missing: CepAddress = serde_json::from_str(r#"{"erro": true}"#).unwrap();
        assert!(missing.is_not_found());
        let missing: CepAddress = serde_json::from_str(r#"{"erro": "true"}"#).unwrap();
        assert!(missing.is_not_found());
        let found: CepAddress = serde_json::from_str(
            r#"{"cep":"01310-100","logradouro":"Avenida Paulista","complemento":"","bairro":"Bela Vista","localidade":"São Paulo","uf":"SP"}"#,
        ).unwrap();
        assert!(!found.is_not_found());
        assert_eq!(found.uf, "SP");
    }

    #[tokio::test]
    async fn test_invalid_cep_fails_before_request() {
        let client = CepClient::with_base_url("http://127.0.0.1:9");
        let err = client.fetch_address("123").await.unwrap_err();
        assert!(matches!(err, StorefrontError::PostalCode(_)));
    }
}
