use std::sync::Arc;
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::limiter::RateLimiter;
use crate::service::{ChatCompletionsService, GenerateRequest, TextService};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn attempts(&self) -> usize {
        self.retries.saturating_add(1)
    }

    pub fn backoff(&self, retry: usize, retry_after: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(retry.min(16) as u32).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF);
        match retry_after {
            Some(hint) => delay.max(hint.min(MAX_BACKOFF)),
            None => delay,
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    service: Arc<dyn TextService>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    timeout: Duration,
    max_tokens: u32,
    concurrency: usize,
}

impl LlmClient {
    pub fn new(
        service: Arc<dyn TextService>,
        limiter: RateLimiter,
        retry: RetryPolicy,
        timeout: Duration,
        max_tokens: u32,
    ) -> Self {
        Self {
            service,
            limiter,
            retry,
            timeout,
            max_tokens,
            concurrency: 1,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let service = ChatCompletionsService::new(config)?;
        tracing::debug!(
            endpoint = service.endpoint(),
            deployment = %config.deployment,
            "text service configured"
        );
        Ok(Self::with_service(config, Arc::new(service)))
    }

    pub fn with_service(config: &ServiceConfig, service: Arc<dyn TextService>) -> Self {
        let limiter = RateLimiter::new(config.concurrency, config.rate_limit_delay);
        let retry = RetryPolicy {
            retries: config.retry_attempts,
            base_delay: config.retry_base_delay,
        };
        Self::new(service, limiter, retry, config.timeout, config.max_tokens)
            .with_concurrency(config.concurrency)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn generate(&self, instructions: &str, input: &str) -> Result<String, ServiceError> {
        let request = GenerateRequest {
            instructions: instructions.to_owned(),
            input: input.to_owned(),
            max_tokens: self.max_tokens,
        };

        let attempts = self.retry.attempts();
        let mut retry = 0usize;
        loop {
            let err = match self.attempt(&request).await {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };

            if !err.retryable() {
                return Err(err);
            }
            if retry >= self.retry.retries {
                tracing::warn!(attempts, error = %err, "service call failed; retries exhausted");
                return Err(ServiceError::Exhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            let delay = self.retry.backoff(retry, err.retry_after());
            tracing::warn!(
                attempt = retry + 1,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "service call failed; retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn attempt(&self, request: &GenerateRequest) -> Result<String, ServiceError> {
        let _permit = self.limiter.acquire().await;
        match tokio::time::timeout(self.timeout, self.service.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(self.timeout)),
        }
    }
}
