use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;

use crate::config::ServiceConfig;
use crate::error::ServiceError;

const TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub instructions: String,
    pub input: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait TextService: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    azure: bool,
    timeout: Duration,
}

impl ChatCompletionsService {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ServiceError::Transport(format!("build http client: {err}")))?;

        Ok(Self {
            client,
            endpoint: chat_completions_endpoint(
                &config.endpoint,
                &config.deployment,
                config.api_version.as_deref(),
            ),
            api_key: config.api_key.clone(),
            model: config.deployment.clone(),
            azure: config.api_version.is_some(),
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

pub fn chat_completions_endpoint(
    base_url: &str,
    deployment: &str,
    api_version: Option<&str>,
) -> String {
    let base_url = base_url.trim_end_matches('/');
    match api_version {
        Some(version) => format!(
            "{base_url}/openai/deployments/{deployment}/chat/completions?api-version={version}"
        ),
        None => format!("{base_url}/chat/completions"),
    }
}

#[async_trait]
impl TextService for ChatCompletionsService {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ServiceError> {
        let mut body = serde_json::json!({
            "messages": [
                { "role": "system", "content": request.instructions },
                { "role": "user", "content": request.input },
            ],
            "max_tokens": request.max_tokens,
            "temperature": TEMPERATURE,
        });
        if !self.azure
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("model".to_owned(), serde_json::json!(self.model));
        }

        let builder = self.client.post(&self.endpoint).json(&body);
        let builder = if self.azure {
            builder.header("api-key", &self.api_key)
        } else {
            builder.bearer_auth(&self.api_key)
        };

        let transport_error = |err: reqwest::Error| {
            if err.is_timeout() {
                ServiceError::Timeout(self.timeout)
            } else {
                ServiceError::Transport(err.to_string())
            }
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let raw = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            return Err(classify_status(status, message, retry_after));
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| ServiceError::Malformed(format!("parse response json: {err}")))?;
        extract_message_text(&value)
    }
}

pub fn classify_status(
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
) -> ServiceError {
    let code = status.as_u16();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Auth {
            status: code,
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => ServiceError::RateLimited {
            message,
            retry_after,
        },
        _ if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT => {
            ServiceError::Server {
                status: code,
                message,
            }
        }
        _ => ServiceError::Rejected {
            status: code,
            message,
        },
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_message_text(value: &serde_json::Value) -> Result<String, ServiceError> {
    let choices = value
        .get("choices")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ServiceError::Malformed("missing `choices` array in response".to_owned()))?;

    let text = choices
        .first()
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(|content| content.as_str())
        .ok_or_else(|| ServiceError::Malformed("missing `message.content` in first choice".to_owned()))?;

    Ok(text.to_owned())
}
