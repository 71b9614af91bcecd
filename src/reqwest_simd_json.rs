use anyhow::{Context, Result};
use reqwest::Response;

/// Extension trait to add simd-json parsing support to reqwest responses
pub trait ResponseSimdJsonExt {
    /// Parse response body as JSON using simd-json
    async fn simd_json<T>(self) -> Result<T>
    where
        T: serde::de::DeserializeOwned;
}

impl ResponseSimdJsonExt for Response {
    async fn simd_json<T>(self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.url().clone();
        let mut bytes = self
            .bytes()
            .await
            .with_context(|| format!("reading response body from {url}"))?
            .to_vec();
        let result = simd_json::from_slice(&mut bytes)
            .with_context(|| format!("decoding JSON from {url}"))?;
        Ok(result)
    }
}
