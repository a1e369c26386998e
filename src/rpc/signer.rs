//! HTTP client for the remote signer sub-façade.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

#[async_trait]
pub trait SignerClient: Send + Sync {
    async fn fetch_public_key(&self, address: &str) -> anyhow::Result<String>;
    async fn sign(&self, address: &str, watermarked_bytes: &[u8]) -> anyhow::Result<String>;
}

pub struct HttpSignerClient {
    client: Client,
    base_url: Url,
}

impl HttpSignerClient {
    pub fn new(base_url: Url) -> Self {
        Self { client: Client::new(), base_url }
    }
}

#[derive(Debug, Deserialize)]
struct PublicKeyResponse {
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct SignatureResponse {
    signature: String,
}

#[async_trait]
impl SignerClient for HttpSignerClient {
    async fn fetch_public_key(&self, address: &str) -> anyhow::Result<String> {
        let url = self.base_url.join(&format!("keys/{address}"))?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("signer error: status {} fetching public key for {address}", status.as_u16());
        }
        Ok(response.json::<PublicKeyResponse>().await?.public_key)
    }

    async fn sign(&self, address: &str, watermarked_bytes: &[u8]) -> anyhow::Result<String> {
        let url = self.base_url.join(&format!("keys/{address}"))?;
        let body = hex::encode(watermarked_bytes);
        let response = self.client.post(url).body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("signer error: status {} signing for {address}", status.as_u16());
        }
        Ok(response.json::<SignatureResponse>().await?.signature)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use mockall::mock;

    mock! {
        pub SignerClient {}

        #[async_trait]
        impl SignerClient for SignerClient {
            async fn fetch_public_key(&self, address: &str) -> anyhow::Result<String>;
            async fn sign(&self, address: &str, watermarked_bytes: &[u8]) -> anyhow::Result<String>;
        }
    }
}
