use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{LanguageModel, LlmError};
use crate::config::LlmConfig;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Serialize)]
struct SamplingOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Blocking client for Ollama's `/api/generate`.
pub struct OllamaClient {
    http: reqwest::blocking::Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.url)
    }
}

impl LanguageModel for OllamaClient {
    fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
            options: SamplingOptions {
                temperature: 0.7,
                top_p: 0.9,
                top_k: 40,
            },
        };

        debug!("Calling {} with model {}", self.endpoint(), self.model);
        let resp = self.http.post(self.endpoint()).json(&request).send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            error!("Model server error {status}: {body}");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = resp.json()?;
        if parsed.response.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let request = GenerateRequest {
            model: "llama3.1:8b",
            prompt: "用戶問題: 你好",
            system: None,
            stream: false,
            options: SamplingOptions {
                temperature: 0.7,
                top_p: 0.9,
                top_k: 40,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3.1:8b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["top_k"], 40);
        assert!(json.get("system").is_none());
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let config = LlmConfig {
            url: "http://localhost:11434/".to_string(),
            ..LlmConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:11434/api/generate");
        assert_eq!(client.model(), "llama3.1:8b");
    }

    #[test]
    fn test_unreachable_server_is_an_error() {
        let config = LlmConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..LlmConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert!(matches!(
            client.complete("hi", None),
            Err(LlmError::Request(_))
        ));
    }
}
