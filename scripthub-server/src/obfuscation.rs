//! Remote obfuscation client
//!
//! Talks to a LuaObfuscator-style service in two steps: upload the source to
//! open a session, then request the obfuscated text for that session. Any
//! failure degrades to the local transform. The caller never sees an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scripthub_core::{CodeTransform, LocalTransform, TransformOptions, TransformOutput};
use serde::Deserialize;

use crate::config::ObfuscatorApiConfig;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Service returned status {0}")]
    Status(u16),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObfuscateResponse {
    code: Option<String>,
    message: Option<String>,
}

pub struct RemoteObfuscator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    attempts: u32,
    options: serde_json::Value,
    fallback: LocalTransform,
}

impl RemoteObfuscator {
    pub fn new(config: &ObfuscatorApiConfig, fallback: LocalTransform) -> Result<Self, TransformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            attempts: config.attempts.max(1),
            options: config.options.clone(),
            fallback,
        })
    }

    /// Run the two-step protocol, retrying up to the configured attempts
    pub async fn obfuscate_remote(&self, api_key: &str, source: &str) -> Result<String, TransformError> {
        let mut last_error = None;
        for attempt in 1..=self.attempts {
            match self.attempt(api_key, source).await {
                Ok(code) => return Ok(code),
                Err(e) => {
                    tracing::debug!("Obfuscation attempt {}/{} failed: {}", attempt, self.attempts, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| TransformError::Service("no attempts made".to_string())))
    }

    async fn attempt(&self, api_key: &str, source: &str) -> Result<String, TransformError> {
        let response = self
            .client
            .post(format!("{}/newscript", self.base_url))
            .header("apikey", api_key)
            .header("content-type", "text")
            .body(source.to_string())
            .send()
            .await?;
        let session: SessionResponse = parse_json(response).await?;
        if let Some(message) = session.message {
            return Err(TransformError::Service(message));
        }
        let session_id = session
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TransformError::Malformed("no sessionId returned".to_string()))?;

        let response = self
            .client
            .post(format!("{}/obfuscate", self.base_url))
            .header("apikey", api_key)
            .header("sessionId", &session_id)
            .json(&self.options)
            .send()
            .await?;
        let result: ObfuscateResponse = parse_json(response).await?;
        if let Some(message) = result.message {
            return Err(TransformError::Service(message));
        }
        result
            .code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| TransformError::Malformed("no code returned".to_string()))
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, TransformError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransformError::Status(status.as_u16()));
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| TransformError::Malformed(e.to_string()))
}

#[async_trait]
impl CodeTransform for RemoteObfuscator {
    async fn transform(&self, source: &str, options: &TransformOptions) -> TransformOutput {
        let Some(api_key) = self.api_key.as_deref() else {
            return self.fallback.apply(source, options);
        };

        match self.obfuscate_remote(api_key, source).await {
            Ok(code) => TransformOutput {
                code: self.fallback.wrap(&code),
                fallback: false,
            },
            Err(e) => {
                tracing::warn!("Obfuscation service unavailable, using local transform: {}", e);
                self.fallback.apply(source, options)
            }
        }
    }
}
