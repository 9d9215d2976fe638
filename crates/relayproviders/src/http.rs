use async_trait::async_trait;
use relaycore::{Parameters, Provider, ProviderError, ProviderHandle};
use relayruntime::{ProviderFactory, ProviderMetadata};
use std::collections::HashMap;
use std::sync::Arc;

/// Provider reached over HTTP: one `POST {base_url}/{operation}` per call
pub struct HttpProvider {
    name: String,
    base_url: String,
    operations: Vec<String>,
    client: reqwest::Client,
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        operation: &str,
        parameters: Parameters,
    ) -> Result<serde_json::Value, ProviderError> {
        if !self.operations.iter().any(|op| op == operation) {
            return Err(ProviderError::UnknownOperation(operation.to_string()));
        }

        let url = format!("{}/{}", self.base_url, operation);
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&parameters)
            .send()
            .await
            .map_err(|e| ProviderError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| ProviderError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(ProviderError::ExecutionFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body_text
            )));
        }

        if body_text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| ProviderError::ExecutionFailed(format!("Response is not JSON: {}", e)))
    }
}

pub struct HttpProviderFactory {
    pub name: String,
    pub base_url: String,
    pub health_path: Option<String>,
    pub headers: HashMap<String, String>,
    pub operations: Vec<String>,
}

#[async_trait]
impl ProviderFactory for HttpProviderFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> Vec<String> {
        self.operations.clone()
    }

    async fn connect(&self) -> Result<ProviderHandle, ProviderError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &self.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ProviderError::ConnectionFailed(format!("bad header {}: {}", key, e)))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| ProviderError::ConnectionFailed(format!("bad header {}: {}", key, e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;
        let base_url = self.base_url.trim_end_matches('/').to_string();

        if let Some(path) = &self.health_path {
            let url = format!("{}{}", base_url, path);
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| ProviderError::ConnectionFailed(format!("{}: {}", url, e)))?;
            if !response.status().is_success() {
                return Err(ProviderError::ConnectionFailed(format!(
                    "{} answered {}",
                    url,
                    response.status()
                )));
            }
            tracing::info!(provider = %self.name, "health check passed");
        }

        Ok(Arc::new(HttpProvider {
            name: self.name.clone(),
            base_url,
            operations: self.operations.clone(),
            client,
        }))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            description: format!("HTTP service at {}", self.base_url),
            transport: "http".to_string(),
        }
    }
}
